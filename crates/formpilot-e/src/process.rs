use async_trait::async_trait;
use formpilot_engine::process::{ProcessControl, ProcessError, ProcessHandle, ProcessInfo};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, PoisonError};
use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, info};

/// [`ProcessControl`] for the local machine.
///
/// Children started here are kept so they can be reaped; a stopped child
/// would otherwise linger as a zombie and still answer signal probes.
#[derive(Default)]
pub struct SystemProcessControl {
    children: Mutex<HashMap<u32, Child>>,
}

impl SystemProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reap `pid` if it is one of ours and has exited. Returns true when it
    /// was ours and is gone.
    fn reap(&self, pid: u32) -> bool {
        let mut children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        let exited = match children.get_mut(&pid) {
            Some(child) => matches!(child.try_wait(), Ok(Some(_))),
            None => return false,
        };
        if exited {
            children.remove(&pid);
        }
        exited
    }
}

fn to_pid(pid: u32) -> Result<Pid, ProcessError> {
    i32::try_from(pid)
        .map(Pid::from_raw)
        .map_err(|_| ProcessError::Signal {
            pid,
            reason: "pid out of range".to_string(),
        })
}

#[async_trait]
impl ProcessControl for SystemProcessControl {
    async fn launch(
        &self,
        executable: &Path,
        args: &[String],
    ) -> Result<ProcessHandle, ProcessError> {
        let child = Command::new(executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ProcessError::Launch {
                path: executable.to_path_buf(),
                reason: e.to_string(),
            })?;

        let pid = child.id();
        info!("Launched {} with PID: {}", executable.display(), pid);
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pid, child);

        Ok(ProcessHandle {
            pid,
            executable: executable.to_path_buf(),
        })
    }

    async fn enumerate(&self) -> Result<Vec<ProcessInfo>, ProcessError> {
        tokio::task::spawn_blocking(|| {
            let mut system = System::new();
            system.refresh_processes(ProcessesToUpdate::All, true);
            system
                .processes()
                .iter()
                .map(|(pid, process)| ProcessInfo {
                    pid: pid.as_u32(),
                    executable: process.exe().map(PathBuf::from),
                })
                .collect()
        })
        .await
        .map_err(|e| ProcessError::Enumerate(e.to_string()))
    }

    async fn terminate(&self, pid: u32, graceful: bool) -> Result<(), ProcessError> {
        let signal = if graceful {
            Signal::SIGTERM
        } else {
            Signal::SIGKILL
        };
        debug!(pid, ?signal, "signalling process");
        match kill(to_pid(pid)?, signal) {
            Ok(()) | Err(Errno::ESRCH) => {
                self.reap(pid);
                Ok(())
            }
            Err(errno) => Err(ProcessError::Signal {
                pid,
                reason: errno.desc().to_string(),
            }),
        }
    }

    async fn is_running(&self, pid: u32) -> bool {
        if self.reap(pid) {
            return false;
        }
        match to_pid(pid) {
            // Signal 0 only checks that the pid exists and may be signalled.
            Ok(pid) => !matches!(kill(pid, None), Err(Errno::ESRCH)),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_launch_and_terminate_child() {
        let control = SystemProcessControl::new();
        let handle = control
            .launch(Path::new("sleep"), &["30".to_string()])
            .await
            .unwrap();
        assert!(control.is_running(handle.pid).await);

        control.terminate(handle.pid, true).await.unwrap();
        let mut stopped = false;
        for _ in 0..50 {
            if !control.is_running(handle.pid).await {
                stopped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(stopped);
    }

    #[tokio::test]
    async fn test_missing_executable_is_launch_error() {
        let control = SystemProcessControl::new();
        let err = control
            .launch(Path::new("/nonexistent/formpilot/chromedriver"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_enumerate_sees_own_children() {
        let control = SystemProcessControl::new();
        let handle = control
            .launch(Path::new("sleep"), &["30".to_string()])
            .await
            .unwrap();

        let table = control.enumerate().await.unwrap();
        assert!(table.iter().any(|p| p.pid == handle.pid));

        control.terminate(handle.pid, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_signalling_a_gone_process_is_ok() {
        let control = SystemProcessControl::new();
        let handle = control
            .launch(Path::new("true"), &[])
            .await
            .unwrap();
        for _ in 0..50 {
            if !control.is_running(handle.pid).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(control.terminate(handle.pid, true).await.is_ok());
    }
}
