#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Structured JSON-lines logging shared by the pipeline crates.

use std::{
    fmt,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Environment variable overriding the minimum level of loggers built with [`JsonLogger::from_env`].
pub const LOG_LEVEL_ENV: &str = "LAPIDARY_LOG";

/// Log severity level, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Debug information.
    Debug,
    /// Informational events.
    Info,
    /// Warning indicator.
    Warn,
    /// Error indicator.
    Error,
}

impl LogLevel {
    /// Upper-case label used in JSON and console output.
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

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => bail!("unknown log level '{other}'"),
        }
    }
}

/// Structured log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Timestamp in ISO8601.
    pub timestamp: DateTime<Utc>,
    /// Component emitting the log (e.g. `preparation`, `trainer`).
    pub module: String,
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// Pipeline run the record belongs to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Arbitrary JSON payload for metrics/fields.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl LogRecord {
    /// Creates a record with the provided info.
    #[must_use]
    pub fn new(module: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            module: module.into(),
            level,
            message: message.into(),
            run_id: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Tags the record with a run identifier.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Copies the fields of a JSON object into the record metadata.
    ///
    /// Non-object values are stored under a single `value` key.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        match metadata {
            serde_json::Value::Object(map) => self.metadata = map,
            serde_json::Value::Null => {}
            other => {
                self.metadata.insert("value".into(), other);
            }
        }
        self
    }

    fn console_line(&self) -> String {
        let mut line = format!(
            "{} {:<5} [{}] {}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.level,
            self.module,
            self.message
        );
        if !self.metadata.is_empty() {
            line.push(' ');
            line.push_str(&serde_json::Value::Object(self.metadata.clone()).to_string());
        }
        line
    }
}

/// Thread-safe JSON-lines logger with an optional file sink and stderr echo.
///
/// Records below the minimum level are discarded before serialisation.
#[derive(Debug)]
pub struct JsonLogger {
    path: Option<PathBuf>,
    writer: Option<Mutex<File>>,
    echo_stderr: bool,
    min_level: LogLevel,
}

impl JsonLogger {
    /// Creates or opens an append-only logger at the desired path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path: Some(path),
            writer: Some(Mutex::new(file)),
            echo_stderr: false,
            min_level: LogLevel::Debug,
        })
    }

    /// Logger that only echoes human-readable lines to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            path: None,
            writer: None,
            echo_stderr: true,
            min_level: LogLevel::Info,
        }
    }

    /// Applies the minimum level from [`LOG_LEVEL_ENV`] when it is set and valid.
    #[must_use]
    pub fn from_env(self) -> Self {
        match std::env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|raw| raw.parse::<LogLevel>().ok())
        {
            Some(level) => self.with_min_level(level),
            None => self,
        }
    }

    /// Sets the minimum level that reaches the sinks.
    #[must_use]
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Toggles mirroring of records to stderr.
    #[must_use]
    pub fn with_stderr_echo(mut self, echo: bool) -> Self {
        self.echo_stderr = echo;
        self
    }

    /// Whether a record at `level` would be written.
    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    /// Writes a log record as a JSON line (and echoes it when configured).
    pub fn log(&self, record: &LogRecord) -> Result<()> {
        if !self.enabled(record.level) {
            return Ok(());
        }
        if self.echo_stderr {
            eprintln!("{}", record.console_line());
        }
        if let Some(writer) = &self.writer {
            let mut writer = writer.lock();
            serde_json::to_writer(&mut *writer, record)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Returns the underlying file path, if the logger writes to a file.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
