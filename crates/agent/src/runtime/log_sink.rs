use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One task-level log record.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Structured detail, `Value::Null` when there is none.
    pub fields: Value,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            fields: Value::Null,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, message)
    }

    pub fn with_fields(mut self, fields: Value) -> Self {
        self.fields = fields;
        self
    }
}

/// Best-effort destination for task log entries. Appending never fails
/// from the caller's point of view.
pub trait LogSink: Send + Sync {
    fn append(&self, entry: LogEntry);
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn append(&self, _entry: LogEntry) {}
}

/// Forwards entries to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn append(&self, entry: LogEntry) {
        let fields = &entry.fields;
        match entry.level {
            LogLevel::Debug => tracing::debug!(%fields, "{}", entry.message),
            LogLevel::Info => tracing::info!(%fields, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(%fields, "{}", entry.message),
            LogLevel::Error => tracing::error!(%fields, "{}", entry.message),
        }
    }
}

/// Thread-safe ring buffer of recent entries.
///
/// Evicts the oldest entry once `capacity` is reached.
pub struct MemoryLogSink {
    inner: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl MemoryLogSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Every retained entry, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.lock().iter().cloned().collect()
    }

    /// The `limit` most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.inner.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl LogSink for MemoryLogSink {
    fn append(&self, entry: LogEntry) {
        if self.capacity == 0 {
            return;
        }
        let mut buf = self.inner.lock();
        if buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ring_buffer_evicts_oldest() {
        let sink = MemoryLogSink::new(3);
        for i in 0..5 {
            sink.append(LogEntry::info(format!("entry-{i}")));
        }
        let messages: Vec<String> = sink.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["entry-2", "entry-3", "entry-4"]);
    }

    #[test]
    fn recent_is_newest_first() {
        let sink = MemoryLogSink::new(10);
        for i in 0..4 {
            sink.append(LogEntry::info(format!("entry-{i}")));
        }
        let recent = sink.recent(2);
        assert_eq!(recent[0].message, "entry-3");
        assert_eq!(recent[1].message, "entry-2");
    }

    #[test]
    fn zero_capacity_retains_nothing() {
        let sink = MemoryLogSink::new(0);
        sink.append(LogEntry::warn("dropped"));
        assert!(sink.is_empty());
    }

    #[test]
    fn entry_serializes_level_lowercase() {
        let entry = LogEntry::warn("slow tool").with_fields(json!({"tool": "click"}));
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["level"], "warn");
        assert_eq!(v["fields"]["tool"], "click");
    }
}
