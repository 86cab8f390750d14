//! Operator-facing activity log
//!
//! Collects session events and workflow milestones as timestamped lines.
//! In memory only; `render` produces the text an operator would copy out.

use std::fmt;

use chrono::{DateTime, Local};
use doorlock_transport::{CommandCode, LockEvent};

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// One log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

impl LogEvent {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Local::now(),
        }
    }

    /// `[HH:MM:SS] message`
    pub fn render(&self) -> String {
        format!("[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Bytes written out of the frame being sent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendProgress {
    pub sent: usize,
    pub total: usize,
}

impl fmt::Display for SendProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sent, self.total)
    }
}

#[derive(Debug, Default)]
pub struct ActivityLog {
    entries: Vec<LogEvent>,
    progress: SendProgress,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: LogEvent) -> &LogEvent {
        self.entries.push(event);
        &self.entries[self.entries.len() - 1]
    }

    pub fn info(&mut self, message: impl Into<String>) -> &LogEvent {
        self.push(LogEvent::new(LogLevel::Info, message))
    }

    pub fn success(&mut self, message: impl Into<String>) -> &LogEvent {
        self.push(LogEvent::new(LogLevel::Success, message))
    }

    pub fn warning(&mut self, message: impl Into<String>) -> &LogEvent {
        self.push(LogEvent::new(LogLevel::Warning, message))
    }

    pub fn error(&mut self, message: impl Into<String>) -> &LogEvent {
        self.push(LogEvent::new(LogLevel::Error, message))
    }

    /// Start tracking a frame of `code`'s size
    pub fn begin_send(&mut self, code: CommandCode) -> &LogEvent {
        self.progress = SendProgress {
            sent: 0,
            total: code.shape().len(),
        };
        self.info(format!("Sending {}", code.name()))
    }

    /// Record a session event
    pub fn record(&mut self, event: &LockEvent) -> &LogEvent {
        match event {
            LockEvent::Progress { byte, remaining } => {
                self.progress.sent = self.progress.total.saturating_sub(*remaining);
                let progress = self.progress;
                self.info(format!("Sent 0x{byte:02X} ({progress})"))
            }
            LockEvent::Complete => {
                self.progress = SendProgress::default();
                self.success("All bytes sent")
            }
            LockEvent::Error(message) => {
                self.progress = SendProgress::default();
                self.error(format!("Send failed: {message}"))
            }
            LockEvent::ConnectionStateChanged(state) => self.info(format!("Link {state}")),
        }
    }

    pub fn progress(&self) -> SendProgress {
        self.progress
    }

    pub fn entries(&self) -> &[LogEvent] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// All entries, one `[HH:MM:SS] message` line each
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(LogEvent::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use doorlock_transport::ConnectionState;

    fn at(h: u32, m: u32, s: u32, level: LogLevel, message: &str) -> LogEvent {
        LogEvent {
            level,
            message: message.to_string(),
            timestamp: Local.with_ymd_and_hms(2025, 3, 14, h, m, s).unwrap(),
        }
    }

    #[test]
    fn test_render_lines() {
        let mut log = ActivityLog::new();
        log.push(at(9, 5, 7, LogLevel::Info, "Scanning"));
        log.push(at(9, 5, 9, LogLevel::Success, "Connected"));
        assert_eq!(log.render(), "[09:05:07] Scanning\n[09:05:09] Connected");
    }

    #[test]
    fn test_clear() {
        let mut log = ActivityLog::new();
        log.info("a");
        log.warning("b");
        assert_eq!(log.len(), 2);
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.render(), "");
    }

    #[test]
    fn test_progress_tracking() {
        let mut log = ActivityLog::new();
        log.begin_send(CommandCode(0x1D));
        assert_eq!(log.progress(), SendProgress { sent: 0, total: 13 });

        let entry = log.record(&LockEvent::Progress {
            byte: 0xCC,
            remaining: 12,
        });
        assert_eq!(entry.message, "Sent 0xCC (1/13)");
        assert_eq!(log.progress().sent, 1);

        let entry = log.record(&LockEvent::Complete);
        assert_eq!(entry.level, LogLevel::Success);
        assert_eq!(log.progress(), SendProgress::default());
    }

    #[test]
    fn test_error_and_state_entries() {
        let mut log = ActivityLog::new();
        let entry = log.record(&LockEvent::Error("Failed to send byte: 0x01".into()));
        assert_eq!(entry.level, LogLevel::Error);
        assert_eq!(entry.message, "Send failed: Failed to send byte: 0x01");

        let entry = log.record(&LockEvent::ConnectionStateChanged(
            ConnectionState::Connected,
        ));
        assert_eq!(entry.message, "Link connected");
    }
}
