//! Bounded retry applied uniformly to every remote interaction.

use crate::error::{EngineError, ErrorClass};
use crate::logging::Reporter;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Constant-delay retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn with_attempts(self, max_attempts: u32) -> Self {
        Self::new(max_attempts, self.delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure { class: ErrorClass, error: String },
}

/// One attempt, rendered to the log sink and then dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord<'a> {
    pub operation: &'a str,
    pub attempt: u32,
    pub max_attempts: u32,
    pub outcome: AttemptOutcome,
}

impl fmt::Display for AttemptRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::Success => write!(
                f,
                "{}: attempt {}/{} succeeded",
                self.operation, self.attempt, self.max_attempts
            ),
            AttemptOutcome::Failure { class, error } => write!(
                f,
                "{}: attempt {}/{} failed [{}]: {}",
                self.operation, self.attempt, self.max_attempts, class, error
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryExecutor {
    reporter: Reporter,
    cancel: CancellationToken,
}

impl RetryExecutor {
    pub fn new(reporter: Reporter) -> Self {
        Self {
            reporter,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop requests are honoured between attempts, never mid-operation.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run `op` until it succeeds or `policy.max_attempts` is spent.
    ///
    /// The last error is returned unchanged once attempts run out.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        policy: RetryPolicy,
        mut op: F,
    ) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            match op().await {
                Ok(value) => {
                    self.reporter.ok(
                        AttemptRecord {
                            operation,
                            attempt,
                            max_attempts,
                            outcome: AttemptOutcome::Success,
                        }
                        .to_string(),
                    );
                    return Ok(value);
                }
                Err(err) => {
                    self.reporter.warn(
                        AttemptRecord {
                            operation,
                            attempt,
                            max_attempts,
                            outcome: AttemptOutcome::Failure {
                                class: err.classify(),
                                error: err.to_string(),
                            },
                        }
                        .to_string(),
                    );

                    if attempt >= max_attempts {
                        self.reporter.warn(format!(
                            "{operation}: max retries ({max_attempts}) reached, giving up"
                        ));
                        return Err(err);
                    }

                    tokio::time::sleep(policy.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_never_zero_attempts() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
        assert_eq!(RetryPolicy::default().max_attempts, 3);
        assert_eq!(RetryPolicy::default().delay, Duration::from_millis(500));
    }

    #[test]
    fn test_attempt_record_rendering() {
        let record = AttemptRecord {
            operation: "fill イベント名",
            attempt: 2,
            max_attempts: 3,
            outcome: AttemptOutcome::Failure {
                class: ErrorClass::NotFound,
                error: "gone".into(),
            },
        };
        assert_eq!(
            record.to_string(),
            "fill イベント名: attempt 2/3 failed [not-found]: gone"
        );
    }
}
