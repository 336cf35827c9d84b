//! Per-request event log.
//!
//! Entries are appended to a JSONL file, kept in a bounded in-memory ring and
//! mirrored to `tracing` so they also show up on the console subscriber.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

const MAX_LOG_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.into(),
            message: message.into(),
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_context(mut self, ctx: serde_json::Value) -> Self {
        self.context = Some(ctx);
        self
    }

    fn emit_tracing(&self) {
        let request_id = self.request_id.as_deref().unwrap_or("-");
        let component = self.component.as_str();
        match self.level {
            LogLevel::Debug => tracing::debug!(component, request_id, "{}", self.message),
            LogLevel::Info => tracing::info!(component, request_id, "{}", self.message),
            LogLevel::Warn => tracing::warn!(component, request_id, "{}", self.message),
            LogLevel::Error => tracing::error!(component, request_id, "{}", self.message),
        }
    }
}

/// Ring-buffer logger that persists to JSONL
pub struct Logger {
    entries: VecDeque<LogEntry>,
    writer: BufWriter<File>,
}

impl Logger {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref();

        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut entries = VecDeque::with_capacity(MAX_LOG_ENTRIES);

        // Reload history so `recent` survives restarts
        if file_path.exists() {
            let reader = BufReader::new(File::open(file_path)?);
            for line in reader.lines().map_while(std::result::Result::ok) {
                if let Ok(entry) = serde_json::from_str::<LogEntry>(&line) {
                    if entries.len() >= MAX_LOG_ENTRIES {
                        entries.pop_front();
                    }
                    entries.push_back(entry);
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        Ok(Self {
            entries,
            writer: BufWriter::new(file),
        })
    }

    pub fn log(&mut self, entry: LogEntry) {
        if let Ok(json) = serde_json::to_string(&entry) {
            let _ = writeln!(self.writer, "{json}");
            let _ = self.writer.flush();
        }
        if self.entries.len() >= MAX_LOG_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }
}

#[derive(Clone)]
pub struct SharedLogger(Arc<Mutex<Logger>>);

impl SharedLogger {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(Logger::new(file_path)?))))
    }

    pub fn log(&self, entry: LogEntry) {
        entry.emit_tracing();
        if let Ok(mut logger) = self.0.lock() {
            logger.log(entry);
        }
    }

    pub fn info(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Info, component, message));
    }

    /// Handle that stamps `request_id` on everything it logs.
    pub fn for_request(&self, request_id: impl Into<String>) -> RequestLogger {
        RequestLogger {
            inner: self.clone(),
            request_id: request_id.into(),
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.0.lock().map(|l| l.recent(limit)).unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct RequestLogger {
    inner: SharedLogger,
    request_id: String,
}

impl RequestLogger {
    fn entry(&self, level: LogLevel, component: &str, message: String) -> LogEntry {
        LogEntry::new(level, component, message).with_request_id(self.request_id.clone())
    }

    pub fn debug(&self, component: &str, message: impl Into<String>) {
        self.inner.log(self.entry(LogLevel::Debug, component, message.into()));
    }

    pub fn info(&self, component: &str, message: impl Into<String>) {
        self.inner.log(self.entry(LogLevel::Info, component, message.into()));
    }

    pub fn warn(&self, component: &str, message: impl Into<String>) {
        self.inner.log(self.entry(LogLevel::Warn, component, message.into()));
    }

    pub fn error(&self, component: &str, message: impl Into<String>) {
        self.inner.log(self.entry(LogLevel::Error, component, message.into()));
    }

    pub fn info_with_context(
        &self,
        component: &str,
        message: impl Into<String>,
        context: serde_json::Value,
    ) {
        self.inner.log(
            self.entry(LogLevel::Info, component, message.into())
                .with_context(context),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_logger_stamps_id() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SharedLogger::new(dir.path().join("proxy.log")).unwrap();

        logger.info("startup", "booting");
        logger
            .for_request("req-1")
            .info_with_context("proxy", "forwarding", serde_json::json!({"deployment": "d"}));

        let recent = logger.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].request_id.as_deref(), Some("req-1"));
        assert_eq!(recent[0].context.as_ref().unwrap()["deployment"], "d");
        assert_eq!(recent[1].request_id, None);
    }

    #[test]
    fn test_history_reloaded_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("proxy.log");

        {
            let logger = SharedLogger::new(&path).unwrap();
            logger.for_request("r").warn("stream", "ended early");
        }

        let logger = SharedLogger::new(&path).unwrap();
        let recent = logger.recent(5);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].level, LogLevel::Warn);
        assert_eq!(recent[0].message, "ended early");
    }
}
