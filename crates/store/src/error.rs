use crate::types::{StreamId, TerminalState};

/// Result type for chunk store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in chunk store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Storage backend error
    #[error("storage backend error: {0}")]
    Backend(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream does not exist
    #[error("stream not found: {0}")]
    StreamNotFound(StreamId),

    /// Append attempted on a stream that is already terminal
    #[error("stream {stream_id} is already terminal ({state})")]
    StreamTerminal {
        /// Stream the append was addressed to
        stream_id: StreamId,
        /// Terminal state the stream is in
        state: TerminalState,
    },

    /// A different terminal state was already written (first write wins)
    #[error("stream {stream_id} already terminal as {existing}, rejected {requested}")]
    TerminalConflict {
        /// Stream the write was addressed to
        stream_id: StreamId,
        /// Terminal state already persisted
        existing: TerminalState,
        /// Terminal state the caller tried to write
        requested: TerminalState,
    },
}
