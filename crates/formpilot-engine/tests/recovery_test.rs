use async_trait::async_trait;
use formpilot_engine::error::EngineError;
use formpilot_engine::install::InstallLayout;
use formpilot_engine::logging::{RecordingSink, Reporter};
use formpilot_engine::process::{
    BrowserLaunch, Connector, ProcessControl, ProcessError, ProcessHandle, ProcessInfo,
};
use formpilot_engine::recovery::{RecoveryController, Task, TaskOutcome};
use formpilot_engine::session::{SessionManager, SessionSettings};
use formpilot_engine::transport::{
    ElementRef, ScriptArg, Selector, Transport, TransportError, TransportErrorKind,
};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fails with the given errors in order, then succeeds.
struct ScriptedTask {
    failures: Vec<EngineError>,
    runs: u32,
}

impl ScriptedTask {
    fn new(failures: Vec<EngineError>) -> Self {
        Self { failures, runs: 0 }
    }
}

#[async_trait]
impl Task for ScriptedTask {
    async fn run(&mut self, _sessions: &mut SessionManager) -> Result<(), EngineError> {
        self.runs += 1;
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(self.failures.remove(0))
        }
    }
}

fn lost() -> EngineError {
    EngineError::Transport(TransportError::new(
        TransportErrorKind::Other,
        "no such window: target window already closed",
    ))
}

#[derive(Default)]
struct SweepRecorder {
    table: Vec<ProcessInfo>,
    sweeps: Mutex<u32>,
    signals: Mutex<Vec<(u32, bool)>>,
}

#[async_trait]
impl ProcessControl for SweepRecorder {
    async fn launch(
        &self,
        executable: &Path,
        _args: &[String],
    ) -> Result<ProcessHandle, ProcessError> {
        Ok(ProcessHandle {
            pid: 1,
            executable: executable.to_path_buf(),
        })
    }
    async fn enumerate(&self) -> Result<Vec<ProcessInfo>, ProcessError> {
        *self.sweeps.lock().unwrap() += 1;
        Ok(self.table.clone())
    }
    async fn terminate(&self, pid: u32, graceful: bool) -> Result<(), ProcessError> {
        self.signals.lock().unwrap().push((pid, graceful));
        Ok(())
    }
    async fn is_running(&self, _pid: u32) -> bool {
        false
    }
}

struct Unreachable;

#[async_trait]
impl Connector for Unreachable {
    async fn connect(
        &self,
        _endpoint: &str,
        _browser: &BrowserLaunch,
    ) -> Result<Box<dyn Transport>, TransportError> {
        Err(TransportError::new(
            TransportErrorKind::SessionNotCreated,
            "not used",
        ))
    }
}

/// What happened to the transports a [`Handout`] gave out.
#[derive(Default)]
struct BrowserLog {
    persisted: AtomicBool,
    closes: AtomicU32,
    /// Whether the transport had been persisted when it was dropped.
    dropped: Mutex<Vec<bool>>,
    window_gone: AtomicBool,
}

struct TrackedTransport {
    log: Arc<BrowserLog>,
}

impl Drop for TrackedTransport {
    fn drop(&mut self) {
        let persisted = self.log.persisted.load(Ordering::SeqCst);
        self.log.dropped.lock().unwrap().push(persisted);
    }
}

#[async_trait]
impl Transport for TrackedTransport {
    async fn navigate(&self, _url: &str) -> Result<(), TransportError> {
        Ok(())
    }
    async fn find_elements(
        &self,
        _scope: Option<&ElementRef>,
        _selector: &Selector,
    ) -> Result<Vec<ElementRef>, TransportError> {
        Ok(vec![])
    }
    async fn execute_script(
        &self,
        _script: &str,
        _args: Vec<ScriptArg>,
    ) -> Result<Value, TransportError> {
        if self.log.window_gone.load(Ordering::SeqCst) {
            return Err(TransportError::new(
                TransportErrorKind::Other,
                "no such window: target window already closed",
            ));
        }
        Ok(json!("complete"))
    }
    async fn click(&self, _element: &ElementRef) -> Result<(), TransportError> {
        Ok(())
    }
    async fn clear(&self, _element: &ElementRef) -> Result<(), TransportError> {
        Ok(())
    }
    async fn send_keys(&self, _element: &ElementRef, _text: &str) -> Result<(), TransportError> {
        Ok(())
    }
    async fn attribute(
        &self,
        _element: &ElementRef,
        _name: &str,
    ) -> Result<Option<String>, TransportError> {
        Ok(None)
    }
    async fn text(&self, _element: &ElementRef) -> Result<String, TransportError> {
        Ok(String::new())
    }
    async fn is_displayed(&self, _element: &ElementRef) -> Result<bool, TransportError> {
        Ok(true)
    }
    async fn close(&self) -> Result<(), TransportError> {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn persist(&self) -> Result<(), TransportError> {
        self.log.persisted.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct Handout(Arc<BrowserLog>);

#[async_trait]
impl Connector for Handout {
    async fn connect(
        &self,
        _endpoint: &str,
        _browser: &BrowserLaunch,
    ) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(TrackedTransport {
            log: self.0.clone(),
        }))
    }
}

/// Opens a session, then fails with the given errors in order.
struct OpeningTask {
    failures: Vec<EngineError>,
    runs: u32,
}

#[async_trait]
impl Task for OpeningTask {
    async fn run(&mut self, sessions: &mut SessionManager) -> Result<(), EngineError> {
        self.runs += 1;
        sessions.open().await?;
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(self.failures.remove(0))
        }
    }
}

fn not_found() -> EngineError {
    EngineError::ElementNotFound {
        label: "イベント名".into(),
        waited: Duration::from_secs(10),
    }
}

fn sessions(processes: Arc<SweepRecorder>) -> SessionManager {
    sessions_with(processes, Arc::new(Unreachable))
}

fn sessions_with(processes: Arc<SweepRecorder>, connector: Arc<dyn Connector>) -> SessionManager {
    let root = Path::new("/opt/formpilot/cft");
    SessionManager::new(
        SessionSettings {
            form_url: "https://forms.example/viewform".into(),
            install: InstallLayout::new(root),
            profile_dir: root.join("profile"),
            profile_name: "Default".into(),
            driver_port: 9515,
            webdriver_url: Some("http://127.0.0.1:4444".into()),
            browser_args: vec![],
            headless: true,
            launch_attempts: 3,
            relaunch_delay: Duration::ZERO,
            orphan_wait: Duration::from_millis(5),
            poll_interval: Duration::from_millis(1),
        },
        processes,
        connector,
        Reporter::default(),
    )
}

fn controller(sink: &Arc<RecordingSink>) -> RecoveryController {
    RecoveryController::new(3, Duration::ZERO, Reporter::new(sink.clone()))
}

#[tokio::test]
async fn test_losing_session_max_times_aborts() {
    let sink = Arc::new(RecordingSink::new());
    let processes = Arc::new(SweepRecorder::default());
    let mut sessions = sessions(processes.clone());
    // Would succeed on the fourth run, which must never happen.
    let mut task = ScriptedTask::new(vec![lost(), lost(), lost()]);

    let err = controller(&sink)
        .run(&mut task, &mut sessions)
        .await
        .unwrap_err();

    match err {
        EngineError::RecoveryExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(last.contains("no such window"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(task.runs, 3);
    assert_eq!(*processes.sweeps.lock().unwrap(), 3);
    assert_eq!(sink.count_matching("(3/3)"), 1);
    assert_eq!(sink.count_matching("automatic retries stopped"), 1);
}

#[tokio::test]
async fn test_recovers_below_the_bound() {
    let sink = Arc::new(RecordingSink::new());
    let mut sessions = sessions(Arc::new(SweepRecorder::default()));
    let mut task = ScriptedTask::new(vec![lost(), lost()]);

    controller(&sink)
        .run(&mut task, &mut sessions)
        .await
        .unwrap();

    assert_eq!(task.runs, 3);
    assert_eq!(sink.count_matching("Form filled"), 1);
}

#[tokio::test]
async fn test_structural_disconnect_counts_as_loss() {
    let sink = Arc::new(RecordingSink::new());
    let mut sessions = sessions(Arc::new(SweepRecorder::default()));
    let mut task = ScriptedTask::new(vec![EngineError::Transport(TransportError::new(
        TransportErrorKind::Disconnected,
        "socket closed",
    ))]);

    controller(&sink)
        .run(&mut task, &mut sessions)
        .await
        .unwrap();
    assert_eq!(task.runs, 2);
}

#[tokio::test]
async fn test_other_errors_are_not_recovered() {
    let sink = Arc::new(RecordingSink::new());
    let processes = Arc::new(SweepRecorder::default());
    let mut sessions = sessions(processes.clone());
    let mut task = ScriptedTask::new(vec![EngineError::ElementNotFound {
        label: "イベント名".into(),
        waited: Duration::from_secs(10),
    }]);

    let err = controller(&sink)
        .run(&mut task, &mut sessions)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::ElementNotFound { .. }));
    assert_eq!(task.runs, 1);
    assert_eq!(*processes.sweeps.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_launch_failure_is_not_recovered() {
    let sink = Arc::new(RecordingSink::new());
    let mut sessions = sessions(Arc::new(SweepRecorder::default()));
    // Connection-refused text inside a launch error stays a launch error.
    let mut task = ScriptedTask::new(vec![EngineError::Launch(
        formpilot_engine::error::LaunchError::classify("connection refused"),
    )]);

    let outcome = controller(&sink)
        .run_to_outcome(&mut task, &mut sessions)
        .await;
    assert_eq!(outcome, TaskOutcome::Failure);
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(task.runs, 1);
}

#[tokio::test]
async fn test_sweep_targets_private_processes() {
    let sink = Arc::new(RecordingSink::new());
    let layout = InstallLayout::new("/opt/formpilot/cft");
    let processes = Arc::new(SweepRecorder {
        table: vec![
            ProcessInfo {
                pid: 7,
                executable: Some(layout.browser_executable()),
            },
            ProcessInfo {
                pid: 8,
                executable: Some(PathBuf::from("/usr/lib/chromium/chromium")),
            },
        ],
        ..Default::default()
    });
    let mut sessions = sessions(processes.clone());
    let mut task = ScriptedTask::new(vec![lost()]);

    controller(&sink)
        .run(&mut task, &mut sessions)
        .await
        .unwrap();
    assert_eq!(*processes.signals.lock().unwrap(), vec![(7, true)]);
}

#[tokio::test]
async fn test_cancelled_before_next_pass() {
    let sink = Arc::new(RecordingSink::new());
    let cancel = CancellationToken::new();
    let mut sessions = sessions(Arc::new(SweepRecorder::default()));
    let mut task = ScriptedTask::new(vec![lost()]);

    cancel.cancel();
    let err = controller(&sink)
        .with_cancellation(cancel)
        .run(&mut task, &mut sessions)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert_eq!(task.runs, 0);
}

#[tokio::test]
async fn test_success_reports_exit_zero() {
    let sink = Arc::new(RecordingSink::new());
    let mut sessions = sessions(Arc::new(SweepRecorder::default()));
    let mut task = ScriptedTask::new(vec![]);

    let outcome = controller(&sink)
        .run_to_outcome(&mut task, &mut sessions)
        .await;
    assert_eq!(outcome, TaskOutcome::Success);
    assert_eq!(outcome.exit_code(), 0);
}

#[tokio::test]
async fn test_success_leaves_browser_session_alive() {
    let sink = Arc::new(RecordingSink::new());
    let log = Arc::new(BrowserLog::default());
    let mut sessions = sessions_with(
        Arc::new(SweepRecorder::default()),
        Arc::new(Handout(log.clone())),
    );
    let mut task = OpeningTask {
        failures: vec![],
        runs: 0,
    };

    controller(&sink)
        .run(&mut task, &mut sessions)
        .await
        .unwrap();
    drop(sessions);

    assert_eq!(*log.dropped.lock().unwrap(), vec![true]);
    assert_eq!(log.closes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_fatal_error_leaves_browser_for_inspection() {
    let sink = Arc::new(RecordingSink::new());
    let log = Arc::new(BrowserLog::default());
    let mut sessions = sessions_with(
        Arc::new(SweepRecorder::default()),
        Arc::new(Handout(log.clone())),
    );
    let mut task = OpeningTask {
        failures: vec![not_found()],
        runs: 0,
    };

    let err = controller(&sink)
        .run(&mut task, &mut sessions)
        .await
        .unwrap_err();
    drop(sessions);

    assert!(matches!(err, EngineError::ElementNotFound { .. }));
    assert_eq!(*log.dropped.lock().unwrap(), vec![true]);
    assert_eq!(log.closes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_lookup_failure_on_dead_window_is_recovered() {
    let sink = Arc::new(RecordingSink::new());
    let log = Arc::new(BrowserLog::default());
    log.window_gone.store(true, Ordering::SeqCst);
    let processes = Arc::new(SweepRecorder::default());
    let mut sessions = sessions_with(processes.clone(), Arc::new(Handout(log.clone())));
    let mut task = OpeningTask {
        failures: vec![not_found()],
        runs: 0,
    };

    controller(&sink)
        .run(&mut task, &mut sessions)
        .await
        .unwrap();

    assert_eq!(task.runs, 2);
    assert_eq!(*processes.sweeps.lock().unwrap(), 1);
    // The dead session was closed; the second one was handed over.
    assert_eq!(log.closes.load(Ordering::SeqCst), 1);
    assert_eq!(sink.count_matching("(1/3)"), 1);
}
