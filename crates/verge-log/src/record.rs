//! Log records and their on-disk text form.

use chrono::{DateTime, Local};
use std::fmt;

/// Timestamp layout used inside log files (`2026-10-16 08:15:42.123`).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Record severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Map a `tracing` level onto the four record levels.
    ///
    /// TRACE has no counterpart and folds into DEBUG.
    pub fn from_tracing(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => Self::Error,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::INFO => Self::Info,
            _ => Self::Debug,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single diagnostic record.
///
/// Records are append-only: once rendered into a file they are never
/// rewritten or reordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub tag: String,
    pub message: String,
    pub stack_trace: Option<String>,
}

impl LogRecord {
    pub fn new(
        timestamp: DateTime<Local>,
        level: LogLevel,
        tag: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            level,
            tag: tag.into(),
            message: message.into(),
            stack_trace: None,
        }
    }

    /// Attach a stack trace, rendered on the lines after the header.
    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    /// Render as `"{timestamp} [{level}] [{tag}] {message}"` plus the
    /// optional trace, always newline-terminated.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{} [{}] [{}] {}\n",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.level,
            self.tag,
            self.message
        );
        if let Some(trace) = &self.stack_trace {
            out.push_str(trace);
            if !trace.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 16, 8, 15, 42).unwrap()
    }

    #[test]
    fn test_render_format() {
        let record = LogRecord::new(at(), LogLevel::Warn, "TunnelController", "already running");
        assert_eq!(
            record.render(),
            "2026-10-16 08:15:42.000 [WARN] [TunnelController] already running\n"
        );
    }

    #[test]
    fn test_render_with_trace() {
        let record = LogRecord::new(at(), LogLevel::Error, "Fatal", "boom")
            .with_stack_trace("  at main\n  at start");
        let text = record.render();
        assert!(text.starts_with("2026-10-16 08:15:42.000 [ERROR] [Fatal] boom\n"));
        assert!(text.ends_with("  at start\n"));
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(LogLevel::from_tracing(&tracing::Level::TRACE), LogLevel::Debug);
        assert_eq!(LogLevel::from_tracing(&tracing::Level::WARN), LogLevel::Warn);
        assert!(LogLevel::Error > LogLevel::Info);
    }
}
