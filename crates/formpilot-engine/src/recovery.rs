//! Restart-the-whole-task loop around session loss.

use crate::config::RecoverySettings;
use crate::error::EngineError;
use crate::logging::Reporter;
use crate::session::SessionManager;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_RECOVERIES: u32 = 3;
pub const DEFAULT_RECOVERY_DELAY: Duration = Duration::from_secs(2);

/// A unit of work that needs a fresh session on every pass.
#[async_trait]
pub trait Task: Send {
    async fn run(&mut self, sessions: &mut SessionManager) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failure,
}

impl TaskOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            TaskOutcome::Success => 0,
            TaskOutcome::Failure => 1,
        }
    }
}

/// Consecutive session losses within one task invocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryState {
    recoveries: u32,
}

impl RecoveryState {
    pub fn recoveries(&self) -> u32 {
        self.recoveries
    }

    fn record(&mut self) -> u32 {
        self.recoveries += 1;
        self.recoveries
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryController {
    max_recoveries: u32,
    delay: Duration,
    reporter: Reporter,
    cancel: CancellationToken,
}

impl RecoveryController {
    pub fn new(max_recoveries: u32, delay: Duration, reporter: Reporter) -> Self {
        Self {
            max_recoveries: max_recoveries.max(1),
            delay,
            reporter,
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_settings(settings: &RecoverySettings, reporter: Reporter) -> Self {
        Self::new(
            settings.max_recoveries,
            Duration::from_millis(settings.delay_ms),
            reporter,
        )
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run `task` until it succeeds, fails for a reason other than session
    /// loss, or loses its session `max_recoveries` times.
    ///
    /// After each loss the dead session is closed, leftover browser processes
    /// are swept, and the task restarts from a fresh `open()`. On success or a
    /// fatal error the browser is released, not closed, so the operator can
    /// inspect the form.
    pub async fn run<T>(&self, task: &mut T, sessions: &mut SessionManager) -> Result<(), EngineError>
    where
        T: Task + ?Sized,
    {
        let mut state = RecoveryState::default();

        loop {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let err = match task.run(sessions).await {
                Ok(()) => {
                    self.reporter
                        .ok("Form filled. Leaving the browser open for review.");
                    sessions.release().await;
                    return Ok(());
                }
                Err(err) => self.confirm_session(err, sessions).await,
            };

            if !err.is_session_lost() {
                self.reporter.warn(format!("Form filling failed: {err}"));
                sessions.release().await;
                return Err(err);
            }

            let attempt = state.record();
            self.reporter.warn(format!(
                "Lost the connection to the browser while filling the form: {err}\n\
                 The automation window may have been closed by the OS or the browser. \
                 Another browser window on screen may be a different instance.\n\
                 Closing the browser and starting over ({attempt}/{}).",
                self.max_recoveries
            ));

            sessions.mark_lost();
            sessions.close().await;
            if let Err(sweep_err) = sessions.terminate_orphans().await {
                self.reporter
                    .warn(format!("Leftover browser cleanup failed: {sweep_err}"));
            }

            if attempt >= self.max_recoveries {
                self.reporter.warn(
                    "The browser connection was lost repeatedly; automatic retries stopped.",
                );
                return Err(EngineError::RecoveryExhausted {
                    attempts: attempt,
                    last: err.to_string(),
                });
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
    }

    /// A lookup or script failure can be the first symptom of a dead window.
    /// When the task error does not look like a loss, probe the session and
    /// report the loss instead if the probe finds one.
    async fn confirm_session(&self, err: EngineError, sessions: &mut SessionManager) -> EngineError {
        if err.is_session_lost() || matches!(err, EngineError::Cancelled) {
            return err;
        }
        match sessions.health_check().await {
            Err(probe) if probe.is_session_lost() => {
                tracing::debug!("task failed with {err}; health check found the session lost");
                probe
            }
            _ => err,
        }
    }

    /// [`run`](Self::run), reduced to a two-valued outcome. Fatal errors are
    /// reported once as an operator message.
    pub async fn run_to_outcome<T>(&self, task: &mut T, sessions: &mut SessionManager) -> TaskOutcome
    where
        T: Task + ?Sized,
    {
        match self.run(task, sessions).await {
            Ok(()) => TaskOutcome::Success,
            Err(err) => {
                self.reporter.warn(err.operator_message());
                TaskOutcome::Failure
            }
        }
    }
}

impl Default for RecoveryController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECOVERIES, DEFAULT_RECOVERY_DELAY, Reporter::default())
    }
}
