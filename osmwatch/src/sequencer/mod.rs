//! Replication cursor, state descriptor codec, and the diff sequencer.
//!
//! The producer publishes a small `key=value` state descriptor next to every
//! diff. The cursor tracks the sequence number currently being consumed and
//! only moves forward once a batch has been fully processed and the next
//! descriptor has been fetched and persisted.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::osc::TIMESTAMP_FORMAT;

/// Error type for cursor and state-descriptor handling.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state descriptor missing key '{0}'")]
    MissingKey(&'static str),

    #[error("invalid sequence number '{0}' in state descriptor")]
    InvalidSequence(String),

    #[error("invalid timestamp '{0}' in state descriptor")]
    InvalidTimestamp(String),

    /// The cursor never rolls back; a descriptor proposing an older or equal
    /// sequence number is rejected.
    #[error("cursor would not move forward: {current} -> {proposed}")]
    NonMonotonic { current: u64, proposed: u64 },

    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Splits a sequence number into the zero-padded 3/3/3 path triple used to
/// address replication resources.
pub fn split_sequence(sequence: u64) -> (String, String, String) {
    let padded = format!("{sequence:09}");
    (
        padded[0..3].to_string(),
        padded[3..6].to_string(),
        padded[6..9].to_string(),
    )
}

/// Replication progress marker: the sequence number being consumed and the
/// producer timestamp that came with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl Cursor {
    /// Parses a state descriptor.
    ///
    /// The format is `key=value` lines; lines starting with `#` are
    /// comments, and values may escape colons as `\:`.
    pub fn from_state_text(text: &str) -> Result<Self, StateError> {
        let mut sequence: Option<&str> = None;
        let mut timestamp: Option<String> = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim() {
                "sequenceNumber" => sequence = Some(value.trim()),
                "timestamp" => timestamp = Some(value.trim().replace("\\:", ":")),
                _ => {}
            }
        }

        let sequence = sequence.ok_or(StateError::MissingKey("sequenceNumber"))?;
        let sequence: u64 = sequence
            .parse()
            .map_err(|_| StateError::InvalidSequence(sequence.to_string()))?;

        let timestamp = timestamp.ok_or(StateError::MissingKey("timestamp"))?;
        let timestamp = NaiveDateTime::parse_from_str(&timestamp, TIMESTAMP_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(|_| StateError::InvalidTimestamp(timestamp))?;

        Ok(Self {
            sequence,
            timestamp,
        })
    }

    /// Serializes the cursor back into the state descriptor format,
    /// escaping colons the way the producer does.
    pub fn to_state_text(&self) -> String {
        let stamp = self
            .timestamp
            .format(TIMESTAMP_FORMAT)
            .to_string()
            .replace(':', "\\:");
        format!("sequenceNumber={}\ntimestamp={stamp}\n", self.sequence)
    }
}

/// Capability to load and persist the raw state descriptor text.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<String, StateError>;
    fn save(&self, text: &str) -> Result<(), StateError>;
}

/// State store backed by a plain file, conventionally `state.txt`.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<String, StateError> {
        Ok(fs::read_to_string(&self.path)?)
    }

    fn save(&self, text: &str) -> Result<(), StateError> {
        Ok(fs::write(&self.path, text)?)
    }
}

/// Owns the cursor and derives replication resource identifiers from it.
#[derive(Debug, Clone)]
pub struct DiffSequencer {
    cursor: Cursor,
}

impl DiffSequencer {
    pub fn new(cursor: Cursor) -> Self {
        Self { cursor }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Sequence number of the batch to process next.
    pub fn current_sequence(&self) -> u64 {
        self.cursor.sequence
    }

    /// Path-shaped resource id for the current sequence number, e.g.
    /// `000/000/042` for sequence 42.
    pub fn resource_id(&self) -> String {
        let (a, b, c) = split_sequence(self.cursor.sequence);
        format!("{a}/{b}/{c}")
    }

    /// Advances the cursor to the descriptor fetched for the follow-on
    /// sequence number. Callers invoke this only after the current batch was
    /// fully processed and the descriptor was persisted.
    pub fn advance_to(&mut self, next: Cursor) -> Result<(), StateError> {
        if next.sequence <= self.cursor.sequence {
            return Err(StateError::NonMonotonic {
                current: self.cursor.sequence,
                proposed: next.sequence,
            });
        }
        debug!(
            from = self.cursor.sequence,
            to = next.sequence,
            "cursor advanced"
        );
        self.cursor = next;
        Ok(())
    }
}
