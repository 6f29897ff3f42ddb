//! Audit trail sinks
//!
//! Decoded events are recorded as text lines through the [`AuditSink`]
//! trait. A sink is built once at startup from an [`AuditTarget`] and shared
//! by every session.

use crate::error::{ProxyError, Result};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::{self, LineWriter, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// Append-only acceptor of audit lines
pub trait AuditSink: Send + Sync {
    /// Record one line; `line` carries no trailing newline
    fn append(&self, line: &str);
}

/// Where audit lines are written
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum AuditTarget {
    /// Append to a file, truncated when opened
    File(PathBuf),

    /// Write to standard output
    Stdout,

    /// Discard everything
    Null,
}

impl Default for AuditTarget {
    fn default() -> Self {
        AuditTarget::File(PathBuf::from("db-proxy.log"))
    }
}

impl FromStr for AuditTarget {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" => Err(ProxyError::Config("audit log target is empty".to_string())),
            "-" => Ok(AuditTarget::Stdout),
            "none" => Ok(AuditTarget::Null),
            path => Ok(AuditTarget::File(PathBuf::from(path))),
        }
    }
}

impl TryFrom<String> for AuditTarget {
    type Error = ProxyError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for AuditTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditTarget::File(path) => write!(f, "{}", path.display()),
            AuditTarget::Stdout => f.write_str("-"),
            AuditTarget::Null => f.write_str("none"),
        }
    }
}

/// Open the sink described by `target`
pub fn open_sink(target: &AuditTarget) -> Result<Arc<dyn AuditSink>> {
    let sink: Arc<dyn AuditSink> = match target {
        AuditTarget::File(path) => Arc::new(FileSink::create(path.clone())?),
        AuditTarget::Stdout => Arc::new(StdoutSink),
        AuditTarget::Null => Arc::new(NullSink),
    };
    Ok(sink)
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Timestamped lines appended to a file
#[derive(Debug)]
pub struct FileSink {
    /// Path of the audit file
    path: PathBuf,

    /// Line-buffered writer, flushed on every newline
    writer: Mutex<LineWriter<File>>,
}

impl FileSink {
    /// Create (or truncate) the audit file
    pub fn create(path: PathBuf) -> Result<Self> {
        let file = File::create(&path).map_err(|e| {
            ProxyError::AuditSink(format!("Failed to open {}: {}", path.display(), e))
        })?;

        Ok(Self {
            path,
            writer: Mutex::new(LineWriter::new(file)),
        })
    }

    /// Path of the audit file
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl AuditSink for FileSink {
    fn append(&self, line: &str) {
        let mut writer = match self.writer.lock() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Err(e) = writeln!(writer, "{} {}", timestamp(), line) {
            log::error!("Failed to write audit line to {}: {}", self.path.display(), e);
        }
    }
}

/// Timestamped lines written to standard output
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl AuditSink for StdoutSink {
    fn append(&self, line: &str) {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        let _ = writeln!(handle, "{} {}", timestamp(), line);
    }
}

/// Sink that discards every line
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AuditSink for NullSink {
    fn append(&self, _line: &str) {}
}

/// In-memory sink that keeps every line, used by tests and embedders
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the lines recorded so far
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for MemorySink {
    fn append(&self, line: &str) {
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line.to_string()),
            Err(poisoned) => poisoned.into_inner().push(line.to_string()),
        }
    }
}
