//! Error taxonomy shared by every engine layer.
//!
//! Low-level failures are retried where they happen. Anything classified as
//! [`ErrorClass::SessionLost`] travels up to the recovery controller, the only
//! place allowed to throw a session away and start a new one.

use crate::config::ConfigError;
use crate::normalizer::FormatError;
use crate::process::ProcessError;
use crate::transport::{TransportError, TransportErrorKind};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Remote error text that means the automation session is gone.
/// Matched case-insensitively as substrings.
pub const SESSION_LOSS_SIGNATURES: &[&str] = &[
    "no such window",
    "web view not found",
    "connection aborted",
    "max retries exceeded with url",
    "failed to establish a new connection",
    "connection refused",
    "err_connection_refused",
];

/// Subset of the signatures that show up when the browser window dies
/// right after launch, before the form ever loaded.
pub const WINDOW_CRASH_SIGNATURES: &[&str] = &["no such window", "web view not found"];

const PROFILE_LOCK_SIGNATURES: &[&str] = &["user data directory is already in use", "profile is in use"];

const CRASH_ON_START_SIGNATURES: &[&str] = &[
    "devtoolsactiveport file doesn't exist",
    "chrome failed to start: crashed",
];

fn contains_any(text: &str, needles: &[&str]) -> bool {
    let lowered = text.to_lowercase();
    needles.iter().any(|needle| lowered.contains(needle))
}

pub fn matches_session_loss(text: &str) -> bool {
    contains_any(text, SESSION_LOSS_SIGNATURES)
}

pub fn matches_window_crash(text: &str) -> bool {
    contains_any(text, WINDOW_CRASH_SIGNATURES)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchFailure {
    /// Another browser instance holds the profile directory.
    ProfileLocked,
    /// The browser died before writing its DevTools handshake file.
    CrashOnStart,
    /// The window closed straight after launch on every attempt.
    WindowClosed,
    /// Browser or driver executable is not installed.
    MissingBinary,
    Unknown,
}

impl LaunchFailure {
    /// Only unclassified failures are worth another launch in the same batch.
    pub fn is_retryable(self) -> bool {
        matches!(self, LaunchFailure::Unknown)
    }
}

impl fmt::Display for LaunchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LaunchFailure::ProfileLocked => "profile-locked",
            LaunchFailure::CrashOnStart => "crash-on-start",
            LaunchFailure::WindowClosed => "window-closed",
            LaunchFailure::MissingBinary => "missing-binary",
            LaunchFailure::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Error)]
#[error("browser launch failed ({kind}): {message}")]
pub struct LaunchError {
    pub kind: LaunchFailure,
    pub message: String,
}

impl LaunchError {
    pub fn new(kind: LaunchFailure, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a session-creation failure from its error text.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = if contains_any(&message, PROFILE_LOCK_SIGNATURES) {
            LaunchFailure::ProfileLocked
        } else if contains_any(&message, CRASH_ON_START_SIGNATURES) {
            LaunchFailure::CrashOnStart
        } else {
            LaunchFailure::Unknown
        };
        Self { kind, message }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Config,
    Launch,
    Navigation,
    NotFound,
    Interaction,
    SessionLost,
    Format,
    Cancelled,
    Other,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorClass::Config => "config",
            ErrorClass::Launch => "launch",
            ErrorClass::Navigation => "navigation",
            ErrorClass::NotFound => "not-found",
            ErrorClass::Interaction => "interaction",
            ErrorClass::SessionLost => "session-lost",
            ErrorClass::Format => "format",
            ErrorClass::Cancelled => "cancelled",
            ErrorClass::Other => "other",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("no element for \"{label}\" appeared within {waited:?}")]
    ElementNotFound { label: String, waited: Duration },

    #[error("interaction failed: {0}")]
    Interaction(String),

    #[error("form section did not change within {0:?}")]
    SectionUnchanged(Duration),

    #[error("session lost: {0}")]
    SessionLost(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("a session is already active; close it before opening another")]
    SessionActive,

    #[error("no active session")]
    NoSession,

    #[error("cancelled")]
    Cancelled,

    #[error("session lost {attempts} times in a row, last error: {last}")]
    RecoveryExhausted { attempts: u32, last: String },
}

impl EngineError {
    pub fn classify(&self) -> ErrorClass {
        if self.is_session_lost() {
            return ErrorClass::SessionLost;
        }
        match self {
            EngineError::Config(_) => ErrorClass::Config,
            EngineError::Launch(_) | EngineError::Process(_) => ErrorClass::Launch,
            EngineError::Navigation(_) => ErrorClass::Navigation,
            EngineError::ElementNotFound { .. } => ErrorClass::NotFound,
            EngineError::Interaction(_) | EngineError::SectionUnchanged(_) => {
                ErrorClass::Interaction
            }
            EngineError::Transport(e) => match e.kind {
                TransportErrorKind::NoSuchElement => ErrorClass::NotFound,
                TransportErrorKind::Timeout | TransportErrorKind::StaleElement => {
                    ErrorClass::Interaction
                }
                _ => ErrorClass::Other,
            },
            EngineError::Format(_) => ErrorClass::Format,
            EngineError::Cancelled => ErrorClass::Cancelled,
            EngineError::RecoveryExhausted { .. } => ErrorClass::SessionLost,
            _ => ErrorClass::Other,
        }
    }

    /// Structural signal first, then the text signatures.
    pub fn is_session_lost(&self) -> bool {
        match self {
            EngineError::SessionLost(_) => true,
            EngineError::Transport(e) if e.kind == TransportErrorKind::Disconnected => true,
            // Launch and navigation failures are fatal for the run, whatever their text says.
            EngineError::Cancelled
            | EngineError::Config(_)
            | EngineError::Launch(_)
            | EngineError::Navigation(_) => false,
            other => matches_session_loss(&other.to_string()),
        }
    }

    /// One human-readable explanation with the most likely cause and a remedy.
    pub fn operator_message(&self) -> String {
        match self {
            EngineError::Config(ConfigError::MissingKeys(keys)) => format!(
                "The configuration is missing required entries: {}. Fill them in and run again.",
                keys.join(", ")
            ),
            EngineError::Config(e) => {
                format!("The configuration could not be used: {e}. Fix the file and run again.")
            }
            EngineError::Launch(e) => match e.kind {
                LaunchFailure::ProfileLocked => "Could not start the browser: the profile appears to be in use.\n\
                     Close every browser window started by this tool, then run again."
                    .to_string(),
                LaunchFailure::CrashOnStart => "Could not start the browser: it crashed during startup.\n\
                     Check that security software is not blocking it, delete the private browser \
                     install directory so it is reinstalled, then run again."
                    .to_string(),
                LaunchFailure::WindowClosed => "The browser window closed immediately after every launch attempt.\n\
                     Security software, the OS, or a browser crash may be closing it; check the \
                     system logs before running again."
                    .to_string(),
                LaunchFailure::MissingBinary => format!(
                    "The private browser is not installed: {}.\nInstall it into the configured \
                     install directory and run again.",
                    e.message
                ),
                LaunchFailure::Unknown => format!("Could not start the browser: {}", e.message),
            },
            EngineError::Navigation(msg) => format!(
                "Could not open the form: {msg}.\nCheck that form_url is correct and reachable."
            ),
            EngineError::RecoveryExhausted { attempts, .. } => format!(
                "The connection to the browser was lost {attempts} times in a row, so automatic \
                 retries have stopped.\nClose the browser and run again; if it keeps happening, \
                 check for software that closes browser windows."
            ),
            EngineError::Cancelled => "Stopped at operator request.".to_string(),
            other if other.is_session_lost() => format!(
                "The connection to the browser was lost while filling the form: {other}.\n\
                 The automation window may have been closed by the OS or the browser."
            ),
            other => format!("An error occurred while filling the form: {other}"),
        }
    }
}
