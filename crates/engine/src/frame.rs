//! Frames delivered to attached readers.

use std::fmt::Display;

use bytes::Bytes;
use restream_store::TerminalState;
use serde::{Deserialize, Serialize};

/// Observable state of a stream: running, or one of the terminal states.
///
/// This is the transport-level view; the store's terminal flag stays the
/// authoritative record. `Running` at the end of a reading means the body is
/// exhausted but the stream itself has not finished: no live producer, the
/// orphaned-stream condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    /// No terminal state written yet
    Running,
    /// Upstream ended naturally
    Completed,
    /// Explicitly canceled
    Canceled,
    /// Upstream or storage failure
    Failed,
}

impl StreamState {
    /// The terminal state this maps to, or `None` for `Running`
    pub fn terminal(self) -> Option<TerminalState> {
        match self {
            Self::Running => None,
            Self::Completed => Some(TerminalState::Completed),
            Self::Canceled => Some(TerminalState::Canceled),
            Self::Failed => Some(TerminalState::Failed),
        }
    }
}

impl From<TerminalState> for StreamState {
    fn from(state: TerminalState) -> Self {
        match state {
            TerminalState::Completed => Self::Completed,
            TerminalState::Canceled => Self::Canceled,
            TerminalState::Failed => Self::Failed,
        }
    }
}

impl From<Option<TerminalState>> for StreamState {
    fn from(state: Option<TerminalState>) -> Self {
        state.map_or(Self::Running, Self::from)
    }
}

impl Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Canceled => write!(f, "canceled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One frame of an attached reading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamFrame {
    /// A sequenced chunk payload
    Chunk {
        /// Position of the chunk within the stream
        seq: u64,
        /// Raw persisted payload
        payload: Bytes,
    },
    /// End of the reading; no further frames follow
    End {
        /// Stream state at close time
        state: StreamState,
        /// Error message when the stream failed
        message: Option<String>,
    },
}
