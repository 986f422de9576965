//! Task log buffer
//!
//! Collects the log of one task execution. Entries are mirrored to `tracing`
//! as they arrive and rendered into `TaskResult.log` when the task finishes.

use conduit_core::domain::log::{LogEntry, LogLevel};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Thread-safe log buffer for one task
#[derive(Clone)]
pub struct TaskLog {
    task: Arc<str>,
    buffer: Arc<Mutex<Vec<LogEntry>>>,
}

impl TaskLog {
    /// Creates an empty log for the named task
    pub fn new(task: &str) -> Self {
        Self {
            task: Arc::from(task),
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds a log entry to the buffer
    pub fn add(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        debug!(task = %self.task, level = %level, "{}", message);
        self.entries().push(LogEntry {
            timestamp: chrono::Utc::now(),
            level,
            message,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.add(LogLevel::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.add(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.add(LogLevel::Error, message);
    }

    /// Records captured process output, one entry per non-empty line
    pub fn output(&self, level: LogLevel, output: &str) {
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            self.add(level, line);
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Renders the log, keeping at most `max_bytes` of the most recent output
    pub fn render(&self, max_bytes: usize) -> String {
        let rendered = self
            .entries()
            .iter()
            .map(LogEntry::render)
            .collect::<Vec<_>>()
            .join("\n");

        if rendered.len() <= max_bytes {
            return rendered;
        }

        let mut cut = rendered.len() - max_bytes;
        while !rendered.is_char_boundary(cut) {
            cut += 1;
        }
        format!("[{} bytes truncated]\n{}", cut, &rendered[cut..])
    }
}
