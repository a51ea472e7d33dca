//! Lifecycle of the controlled browser and its automation session.
//!
//! ```text
//! Unopened -> Launching -> Attached -> Operating -> Lost -> Closed
//! ```
//!
//! [`SessionManager`] owns at most one [`Session`]. A second `open()` while a
//! session is held is refused; the profile directory can only be used by one
//! browser at a time anyway.

use crate::config::EventConfig;
use crate::error::{EngineError, LaunchError, LaunchFailure, matches_window_crash};
use crate::install::InstallLayout;
use crate::logging::Reporter;
use crate::process::{
    BrowserLaunch, Connector, ProcessControl, ProcessError, ProcessHandle, ProcessInfo,
};
use crate::transport::Transport;
use chrono::{DateTime, Local};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Launching,
    Attached,
    Operating,
    Lost,
    Closed,
}

/// One live connection to the controlled browser. Not `Clone`: there is only
/// ever one owner.
pub struct Session {
    process: Option<ProcessHandle>,
    transport: Box<dyn Transport>,
    endpoint: String,
    created_at: DateTime<Local>,
    alive: bool,
}

impl Session {
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// The driver process, when this engine started one.
    pub fn process(&self) -> Option<&ProcessHandle> {
        self.process.as_ref()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("process", &self.process)
            .field("endpoint", &self.endpoint)
            .field("created_at", &self.created_at)
            .field("alive", &self.alive)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub form_url: String,
    pub install: InstallLayout,
    pub profile_dir: PathBuf,
    pub profile_name: String,
    pub driver_port: u16,
    /// Attach to this WebDriver server instead of starting the private driver.
    pub webdriver_url: Option<String>,
    pub browser_args: Vec<String>,
    pub headless: bool,
    pub launch_attempts: u32,
    pub relaunch_delay: Duration,
    pub orphan_wait: Duration,
    pub poll_interval: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &EventConfig) -> Self {
        let launch = &config.engine.launch;
        Self {
            form_url: config.form_url.clone(),
            install: launch.install_layout(),
            profile_dir: launch.profile_path(),
            profile_name: launch.profile_name.clone(),
            driver_port: launch.driver_port,
            webdriver_url: launch.webdriver_url.clone(),
            browser_args: launch.browser_args.clone(),
            headless: launch.headless,
            launch_attempts: launch.attempts.max(1),
            relaunch_delay: Duration::from_millis(launch.relaunch_delay_ms),
            orphan_wait: Duration::from_millis(launch.orphan_wait_ms),
            poll_interval: config.engine.timeouts.poll_interval(),
        }
    }

    pub fn browser_launch(&self) -> BrowserLaunch {
        BrowserLaunch {
            browser_executable: self.install.browser_executable(),
            profile_dir: self.profile_dir.clone(),
            profile_name: self.profile_name.clone(),
            args: self.browser_args.clone(),
            detach: true,
            headless: self.headless,
        }
    }

    fn local_endpoint(&self) -> String {
        format!("http://localhost:{}", self.driver_port)
    }
}

pub struct SessionManager {
    settings: SessionSettings,
    processes: Arc<dyn ProcessControl>,
    connector: Arc<dyn Connector>,
    reporter: Reporter,
    state: SessionState,
    session: Option<Session>,
}

impl SessionManager {
    pub fn new(
        settings: SessionSettings,
        processes: Arc<dyn ProcessControl>,
        connector: Arc<dyn Connector>,
        reporter: Reporter,
    ) -> Self {
        Self {
            settings,
            processes,
            connector,
            reporter,
            state: SessionState::Unopened,
            session: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Launch the browser and load the form.
    ///
    /// Up to `launch_attempts` launch+navigate rounds. Profile-lock and
    /// crash-on-start failures end the batch at once; a window that dies during
    /// the first navigation is relaunched; any other navigation error is fatal.
    pub async fn open(&mut self) -> Result<&Session, EngineError> {
        if self.session.is_some() {
            return Err(EngineError::SessionActive);
        }

        self.state = SessionState::Launching;
        if let Err(err) = self.check_install() {
            self.state = SessionState::Closed;
            return Err(err.into());
        }

        let browser = self.settings.browser_launch();
        let max_attempts = self.settings.launch_attempts.max(1);
        let mut attempt = 1;

        loop {
            let connected = match self.start_driver().await {
                Ok((endpoint, process)) => {
                    match self.connector.connect(&endpoint, &browser).await {
                        Ok(transport) => Ok((endpoint, process, transport)),
                        Err(err) => {
                            self.stop_process(process.as_ref()).await;
                            Err(LaunchError::classify(err.message))
                        }
                    }
                }
                Err(err) => Err(err),
            };

            let (endpoint, process, transport) = match connected {
                Ok(connected) => connected,
                Err(launch) => {
                    if !launch.kind.is_retryable() || attempt >= max_attempts {
                        self.state = SessionState::Closed;
                        self.reporter.warn(format!("Browser launch failed: {}", launch.message));
                        return Err(launch.into());
                    }
                    self.reporter.warn(format!(
                        "Browser launch failed ({attempt}/{max_attempts}): {}",
                        launch.message
                    ));
                    tokio::time::sleep(self.settings.relaunch_delay).await;
                    attempt += 1;
                    continue;
                }
            };

            match transport.navigate(&self.settings.form_url).await {
                Ok(()) => {
                    self.reporter.ok("Opened the form");
                    self.state = SessionState::Attached;
                    let session = Session {
                        process,
                        transport,
                        endpoint,
                        created_at: Local::now(),
                        alive: true,
                    };
                    return Ok(&*self.session.insert(session));
                }
                Err(err) if matches_window_crash(&err.message) => {
                    self.reporter.warn(format!(
                        "The browser window closed right after launch ({attempt}/{max_attempts})"
                    ));
                    if let Err(close_err) = transport.close().await {
                        tracing::debug!("closing crashed session failed: {close_err}");
                    }
                    self.stop_process(process.as_ref()).await;

                    if attempt >= max_attempts {
                        self.state = SessionState::Closed;
                        return Err(LaunchError::new(
                            LaunchFailure::WindowClosed,
                            format!(
                                "window closed immediately on all {max_attempts} launches: {}",
                                err.message
                            ),
                        )
                        .into());
                    }
                    tokio::time::sleep(self.settings.relaunch_delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if let Err(close_err) = transport.close().await {
                        tracing::debug!("closing session failed: {close_err}");
                    }
                    self.stop_process(process.as_ref()).await;
                    self.state = SessionState::Closed;
                    return Err(EngineError::Navigation(err.message));
                }
            }
        }
    }

    /// The open session, marked as being worked on.
    pub fn operate(&mut self) -> Result<&Session, EngineError> {
        match self.session.as_ref() {
            Some(session) => {
                self.state = SessionState::Operating;
                Ok(session)
            }
            None => Err(EngineError::NoSession),
        }
    }

    pub fn mark_lost(&mut self) {
        self.state = SessionState::Lost;
        if let Some(session) = self.session.as_mut() {
            session.alive = false;
        }
    }

    /// Probe the session with a trivial script.
    pub async fn health_check(&mut self) -> Result<(), EngineError> {
        let session = self.session.as_ref().ok_or(EngineError::NoSession)?;
        let probe = session
            .transport()
            .execute_script("return document.readyState;", Vec::new())
            .await;
        match probe {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = EngineError::from(err);
                if err.is_session_lost() {
                    self.mark_lost();
                }
                Err(err)
            }
        }
    }

    /// End the session and stop the driver. Never fails; problems are logged.
    pub async fn close(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if let Err(err) = session.transport.close().await {
            self.reporter
                .info(format!("Closing the browser session failed (ignored): {err}"));
        }
        self.stop_process(session.process.as_ref()).await;
        self.state = SessionState::Closed;
    }

    /// Give up ownership without closing, leaving the browser open.
    ///
    /// The transport is persisted first so dropping the returned session
    /// does not end the remote session.
    pub async fn release(&mut self) -> Option<Session> {
        let session = self.session.take()?;
        if let Err(err) = session.transport.persist().await {
            self.reporter
                .info(format!("Could not detach from the browser session: {err}"));
        }
        self.state = SessionState::Closed;
        Some(session)
    }

    /// Stop every process running from the private browser or driver
    /// directory. Graceful first, forced after `orphan_wait`.
    ///
    /// Returns how many processes were targeted.
    pub async fn terminate_orphans(&self) -> Result<usize, EngineError> {
        let owned: Vec<ProcessInfo> = self
            .processes
            .enumerate()
            .await?
            .into_iter()
            .filter(|p| {
                p.executable
                    .as_deref()
                    .is_some_and(|exe| self.settings.install.owns(exe))
            })
            .collect();

        if owned.is_empty() {
            return Ok(0);
        }

        for proc in &owned {
            if let Err(err) = self.processes.terminate(proc.pid, true).await {
                tracing::debug!("graceful stop of {} failed: {err}", proc.pid);
            }
        }

        let deadline = Instant::now() + self.settings.orphan_wait;
        loop {
            let mut still_running = Vec::new();
            for proc in &owned {
                if self.processes.is_running(proc.pid).await {
                    still_running.push(proc.pid);
                }
            }
            if still_running.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                for pid in still_running {
                    if let Err(err) = self.processes.terminate(pid, false).await {
                        self.reporter
                            .warn(format!("Could not kill leftover browser process {pid}: {err}"));
                    }
                }
                break;
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }

        self.reporter.info(format!(
            "Stopped {} leftover browser process(es)",
            owned.len()
        ));
        Ok(owned.len())
    }

    /// Start the private browser on its profile so the operator can sign in.
    /// The browser is left running.
    pub async fn bootstrap_profile(&self) -> Result<ProcessHandle, EngineError> {
        let browser = self.settings.install.browser_executable();
        if !browser.exists() {
            return Err(LaunchError::new(
                LaunchFailure::MissingBinary,
                browser.display().to_string(),
            )
            .into());
        }

        tokio::fs::create_dir_all(&self.settings.profile_dir)
            .await
            .map_err(|err| ProcessError::Launch {
                path: self.settings.profile_dir.clone(),
                reason: format!("cannot create profile directory: {err}"),
            })?;

        let args = vec![
            format!("--user-data-dir={}", self.settings.profile_dir.display()),
            format!("--profile-directory={}", self.settings.profile_name),
        ];
        let handle = self.processes.launch(&browser, &args).await?;
        self.reporter.ok(format!(
            "Started the browser on profile {}",
            self.settings.profile_dir.display()
        ));
        Ok(handle)
    }

    fn check_install(&self) -> Result<(), LaunchError> {
        if self.settings.webdriver_url.is_some() {
            return Ok(());
        }
        let missing = self.settings.install.missing_binaries();
        if missing.is_empty() {
            return Ok(());
        }
        let listed: Vec<String> = missing.iter().map(|p| p.display().to_string()).collect();
        Err(LaunchError::new(
            LaunchFailure::MissingBinary,
            listed.join(", "),
        ))
    }

    /// Endpoint to connect to, plus the driver process when one was started.
    /// A failed spawn is an unclassified launch failure.
    async fn start_driver(&self) -> Result<(String, Option<ProcessHandle>), LaunchError> {
        if let Some(url) = &self.settings.webdriver_url {
            return Ok((url.clone(), None));
        }
        let driver = self.settings.install.driver_executable();
        let args = vec![format!("--port={}", self.settings.driver_port)];
        let handle = self
            .processes
            .launch(&driver, &args)
            .await
            .map_err(|err| LaunchError::new(LaunchFailure::Unknown, err.to_string()))?;
        tracing::debug!(pid = handle.pid, "driver started");
        Ok((self.settings.local_endpoint(), Some(handle)))
    }

    async fn stop_process(&self, process: Option<&ProcessHandle>) {
        if let Some(handle) = process
            && let Err(err) = self.processes.terminate(handle.pid, true).await
        {
            tracing::debug!("stopping driver {} failed: {err}", handle.pid);
        }
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
