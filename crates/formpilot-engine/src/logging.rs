//! Operator-facing log sink.
//!
//! Every component receives a [`Reporter`] at construction time. The default
//! sink routes lines into `tracing`; hosts (a GUI, a test) swap in their own
//! [`LogSink`] without touching any global state.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Ok,
    Warn,
    Info,
}

impl LogLevel {
    pub fn tag(self) -> &'static str {
        match self {
            LogLevel::Ok => "[OK]",
            LogLevel::Warn => "[WARN]",
            LogLevel::Info => "[INFO]",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Render a line the way the operator sees it, e.g. `[OK] Opened the form`.
pub fn render(level: LogLevel, message: &str) -> String {
    format!("{} {}", level.tag(), message)
}

pub trait LogSink: Send + Sync {
    fn emit(&self, level: LogLevel, message: &str);
}

/// Console fallback: forwards to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Ok | LogLevel::Info => tracing::info!("{}", render(level, message)),
            LogLevel::Warn => tracing::warn!("{}", render(level, message)),
        }
    }
}

/// Hands each rendered line to a host callback, and to `tracing` as well.
pub struct CallbackSink<F> {
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: Fn(&str) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> LogSink for CallbackSink<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn emit(&self, level: LogLevel, message: &str) {
        TracingSink.emit(level, message);
        (self.callback)(&render(level, message));
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries().into_iter().map(|(_, m)| m).collect()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.messages().iter().filter(|m| m.contains(needle)).count()
    }
}

impl LogSink for RecordingSink {
    fn emit(&self, level: LogLevel, message: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((level, message.to_string()));
    }
}

/// Cloneable handle to the active sink.
#[derive(Clone)]
pub struct Reporter {
    sink: Arc<dyn LogSink>,
}

impl Reporter {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    pub fn ok(&self, message: impl AsRef<str>) {
        self.sink.emit(LogLevel::Ok, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.sink.emit(LogLevel::Warn, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.sink.emit(LogLevel::Info, message.as_ref());
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_tags() {
        assert_eq!(render(LogLevel::Ok, "done"), "[OK] done");
        assert_eq!(render(LogLevel::Warn, "oops"), "[WARN] oops");
    }

    #[test]
    fn test_recording_sink_through_reporter() {
        let sink = Arc::new(RecordingSink::new());
        let reporter = Reporter::new(sink.clone());
        reporter.ok("first");
        reporter.warn("second");

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (LogLevel::Ok, "first".to_string()));
        assert_eq!(entries[1], (LogLevel::Warn, "second".to_string()));
    }

    #[test]
    fn test_callback_sink_receives_rendered_line() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = lines.clone();
        let reporter = Reporter::new(Arc::new(CallbackSink::new(move |line: &str| {
            captured.lock().unwrap().push(line.to_string());
        })));

        reporter.warn("browser lost");
        assert_eq!(*lines.lock().unwrap(), vec!["[WARN] browser lost".to_string()]);
    }
}
