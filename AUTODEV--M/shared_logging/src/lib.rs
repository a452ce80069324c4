#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Structured JSONL logging shared by every autodev subsystem.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Severity tier attached to every log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Diagnostic chatter useful while developing a subsystem.
    Debug,
    /// Routine operational events.
    Info,
    /// Degraded behavior that the engine recovered from.
    Warn,
    /// Failures that dropped work on the floor.
    Error,
}

impl LogLevel {
    /// Stable uppercase label used in serialized records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured line in a JSONL log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Capture time in UTC.
    pub timestamp: DateTime<Utc>,
    /// Subsystem that produced the record.
    pub source: String,
    /// Severity tier.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// Optional structured payload merged in by the caller.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

impl LogRecord {
    /// Builds a record stamped with the current UTC time.
    #[must_use]
    pub fn new(source: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.into(),
            level,
            message: message.into(),
            fields: Map::new(),
        }
    }

    /// Attaches a structured field, replacing any previous value for the key.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

/// Append-only JSONL logger with a severity floor.
#[derive(Debug)]
pub struct JsonLogger {
    path: PathBuf,
    floor: LogLevel,
    writer: Mutex<File>,
}

impl JsonLogger {
    /// Opens (creating parents as needed) an append-mode log file.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_floor(path, LogLevel::Debug)
    }

    /// Like [`JsonLogger::new`] but drops records below `floor`.
    pub fn with_floor(path: impl AsRef<Path>, floor: LogLevel) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        Ok(Self {
            path,
            floor,
            writer: Mutex::new(file),
        })
    }

    /// Serializes one record as a JSON line and flushes it.
    pub fn log(&self, record: &LogRecord) -> Result<()> {
        if record.level < self.floor {
            return Ok(());
        }
        let mut file = self.writer.lock();
        serde_json::to_writer(&mut *file, record).context("encoding log record")?;
        file.write_all(b"\n").context("terminating log record")?;
        file.flush().context("flushing log record")?;
        Ok(())
    }

    /// Convenience wrapper building and writing a record with extra fields.
    pub fn log_with_fields(
        &self,
        source: &str,
        level: LogLevel,
        message: &str,
        fields: &Value,
    ) -> Result<()> {
        let mut record = LogRecord::new(source, level, message);
        if let Some(map) = fields.as_object() {
            record.fields.extend(map.clone());
        }
        self.log(&record)
    }

    /// Path of the underlying log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured severity floor.
    #[must_use]
    pub const fn floor(&self) -> LogLevel {
        self.floor
    }
}
