//! Logger capabilities and early-startup record buffering.

use std::collections::VecDeque;
use std::sync::Mutex;

use sdv_object::declare_interface;

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogSeverity {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl LogSeverity {
    pub fn parse(text: &str) -> Option<LogSeverity> {
        match text {
            "Trace" => Some(LogSeverity::Trace),
            "Debug" => Some(LogSeverity::Debug),
            "Info" => Some(LogSeverity::Info),
            "Warning" => Some(LogSeverity::Warning),
            "Error" => Some(LogSeverity::Error),
            "Fatal" => Some(LogSeverity::Fatal),
            _ => None,
        }
    }
}

/// Record sink capability of a logger service.
pub trait Logger: Send + Sync {
    fn log(&self, severity: LogSeverity, message: &str);
}

declare_interface!(Logger, "sdv.core.Logger");

/// Configuration capability of a logger service.
pub trait LoggerConfig: Send + Sync {
    /// Tag prefixed to forwarded records.
    fn set_program_tag(&self, tag: &str);

    /// `filter` bounds what is stored, `view_filter` what is surfaced to
    /// the console.
    fn set_log_filter(&self, filter: LogSeverity, view_filter: LogSeverity);
}

declare_interface!(LoggerConfig, "sdv.core.LoggerConfig");

/// Bounded ring retaining records emitted before the logger service is up;
/// replayed once the logger is configured so early errors are not lost.
pub struct StartupLogBuffer {
    ring: Mutex<VecDeque<(LogSeverity, String)>>,
    capacity: usize,
}

impl StartupLogBuffer {
    pub fn new(capacity: usize) -> Self {
        StartupLogBuffer {
            ring: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn push(&self, severity: LogSeverity, message: impl Into<String>) {
        let mut ring = self.ring.lock().unwrap();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back((severity, message.into()));
    }

    /// Drain the retained records into the logger.
    pub fn replay(&self, logger: &dyn Logger) {
        let mut ring = self.ring.lock().unwrap();
        for (severity, message) in ring.drain(..) {
            logger.log(severity, &message);
        }
    }

    pub fn len(&self) -> usize {
        self.ring.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
