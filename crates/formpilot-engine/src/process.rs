//! OS-facing collaborators used by the session manager.

use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to launch {path}: {reason}")]
    Launch { path: PathBuf, reason: String },
    #[error("failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },
    #[error("failed to list processes: {0}")]
    Enumerate(String),
}

/// A process this engine started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub executable: PathBuf,
}

/// A process seen while scanning the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub executable: Option<PathBuf>,
}

#[async_trait]
pub trait ProcessControl: Send + Sync {
    async fn launch(&self, executable: &Path, args: &[String])
    -> Result<ProcessHandle, ProcessError>;

    async fn enumerate(&self) -> Result<Vec<ProcessInfo>, ProcessError>;

    /// Ask the process to stop (`graceful`) or kill it outright.
    async fn terminate(&self, pid: u32, graceful: bool) -> Result<(), ProcessError>;

    async fn is_running(&self, pid: u32) -> bool;
}

/// How the controlled browser should be started by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserLaunch {
    pub browser_executable: PathBuf,
    pub profile_dir: PathBuf,
    pub profile_name: String,
    pub args: Vec<String>,
    /// Keep the browser alive after the automation session ends.
    pub detach: bool,
    pub headless: bool,
}

/// Creates an automation session against a driver endpoint. Creating the
/// session is what actually starts the browser.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
        browser: &BrowserLaunch,
    ) -> Result<Box<dyn Transport>, TransportError>;
}
