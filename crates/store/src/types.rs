//! Core types shared by every chunk store backend.

use std::fmt::Display;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Identifier of one logical stream.
///
/// Opaque to the store: any non-empty string a caller picks (or a generated
/// uuid) works. Cheap to clone and usable as a map key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Create a new stream id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StreamId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for StreamId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Final state of a stream. Absence means the stream is still running.
///
/// Written exactly once per stream; later writes with a different state are
/// rejected by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalState {
    /// Upstream ended naturally
    Completed,
    /// Explicitly canceled before the upstream ended
    Canceled,
    /// Upstream or storage failure ended the stream
    Failed,
}

impl Display for TerminalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Canceled => write!(f, "canceled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One persisted unit of producer output.
///
/// Immutable once written. For a single stream the sequence numbers form a
/// contiguous range `[0, next_seq)` with no gaps and no duplicates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// Position of this chunk within its stream
    pub seq: u64,
    /// Raw producer payload, opaque to the store
    pub payload: Bytes,
    /// Unix millis at which the chunk was persisted
    pub written_at: u64,
}

/// Durable per-stream metadata row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamMeta {
    /// Next sequence number to assign (also the count of persisted chunks)
    pub next_seq: u64,
    /// Terminal state, or `None` while the stream is running
    pub terminal: Option<TerminalState>,
    /// Error message recorded with a failed terminal state
    pub error_message: Option<String>,
    /// Unix millis at which the stream row was created
    pub created_at: u64,
    /// Unix millis at which the terminal state was written
    pub terminal_at: Option<u64>,
}

/// Result of an append call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The chunk was persisted
    Appended,
    /// The `(stream id, seq)` pair already existed; nothing was written
    Duplicate,
}
