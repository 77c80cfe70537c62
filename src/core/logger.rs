//! Response logging
//!
//! Collects the traffic of a session in memory and persists it to a file
//! named after the sample identifier found in the received text.

use crate::core::codec::TextEncoding;
use crate::core::queue::{Message, MessageKind};
use crate::core::sample_id::{self, SampleCategory, SampleId};
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Data direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Direction {
    /// Response from the device
    Received,
    /// Command sent to the device
    Sent,
    /// Error reported by the connection
    Error,
}

/// A single log entry
#[derive(Debug, Clone, serde::Serialize)]
pub struct LogEntry {
    /// When the data was enqueued or sent
    pub timestamp: DateTime<Local>,
    /// Direction
    pub direction: Direction,
    /// Decoded text
    pub text: String,
}

impl LogEntry {
    /// Format as text
    pub fn to_text(&self, show_timestamp: bool) -> String {
        let dir = match self.direction {
            Direction::Received => "RX",
            Direction::Sent => "TX",
            Direction::Error => "!!",
        };

        if show_timestamp {
            format!(
                "[{}] {} {}",
                self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                dir,
                self.text
            )
        } else {
            format!("{} {}", dir, self.text)
        }
    }
}

/// Log persistence errors
#[derive(Error, Debug)]
pub enum LogError {
    /// Nothing to save
    #[error("Log is empty")]
    Empty,

    /// File system failure
    #[error("Failed to write log {path}: {source}")]
    Io {
        /// Target path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
}

/// Where a log was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedLog {
    /// Written file
    pub path: PathBuf,
    /// Identifier the file was named after, if any
    pub sample: Option<SampleId>,
}

impl SavedLog {
    /// Category directory the file landed in
    pub fn category(&self) -> SampleCategory {
        self.sample
            .as_ref()
            .map_or(SampleCategory::Others, |id| id.category)
    }
}

/// In-memory log of one session
#[derive(Debug, Clone)]
pub struct ResponseLog {
    entries: Vec<LogEntry>,
    encoding: TextEncoding,
    timestamps: bool,
}

impl ResponseLog {
    /// Create an empty log decoding responses with `encoding`
    pub fn new(encoding: TextEncoding) -> Self {
        Self {
            entries: Vec::new(),
            encoding,
            timestamps: true,
        }
    }

    /// Set timestamp prefix for saved lines
    #[must_use]
    pub fn timestamps(mut self, show: bool) -> Self {
        self.timestamps = show;
        self
    }

    /// Record a drained message
    pub fn record(&mut self, message: &Message) {
        let direction = match message.kind() {
            MessageKind::Data => Direction::Received,
            MessageKind::Error => Direction::Error,
        };
        self.entries.push(LogEntry {
            timestamp: message.enqueued_at(),
            direction,
            text: message.text(self.encoding),
        });
    }

    /// Record a sent command
    pub fn record_sent(&mut self, command: &str) {
        self.entries.push(LogEntry {
            timestamp: Local::now(),
            direction: Direction::Sent,
            text: command.trim().to_string(),
        });
    }

    /// Entries so far
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Check if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Concatenated device responses, used to find the sample identifier
    pub fn received_text(&self) -> String {
        self.entries
            .iter()
            .filter(|e| e.direction == Direction::Received)
            .map(|e| e.text.as_str())
            .collect()
    }

    /// Render every entry as text lines
    pub fn export(&self) -> String {
        let mut result = String::new();
        for entry in &self.entries {
            result.push_str(entry.to_text(self.timestamps).trim_end_matches(['\r', '\n']));
            result.push('\n');
        }
        result
    }

    /// Write the log under `root`, named after the sample identifier or, when
    /// none is found, after the current time in `others/`
    pub fn save(&self, root: &Path) -> Result<SavedLog, LogError> {
        if self.entries.is_empty() {
            return Err(LogError::Empty);
        }

        let (path, sample) = match sample_id::classify(&self.received_text(), root) {
            Some(found) => (found.path, Some(found.id)),
            None => (sample_id::fallback_log_path(root, Local::now()), None),
        };

        write_new(&path, &self.export()).map_err(|source| LogError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::info!("Saved log to {}", path.display());
        Ok(SavedLog { path, sample })
    }
}

fn write_new(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // create_new: never overwrite a log that appeared after path resolution
    let file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(content.as_bytes())?;
    writer.flush()
}
