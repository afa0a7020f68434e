//! Engine error taxonomy.
//!
//! Two failure conditions never appear here: a second produce call for an
//! actively-producing stream joins it instead of failing, and an upstream
//! failure becomes the stream's terminal failed state, reaching readers
//! through the end sentinel rather than through a `Result`.

use restream_store::{StoreError, StreamId};

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in the stream engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Attachment or cancel addressed a stream that does not exist
    #[error("stream not found: {0}")]
    StreamNotFound(StreamId),

    /// The chunk store rejected or failed an operation
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The reader's sink went away mid-attachment; local to that reader
    #[error("reader sink closed")]
    SinkClosed,

    /// The store is missing a chunk that must exist below the fan-out
    /// watermark; indicates a broken backend
    #[error("storage inconsistency on stream {stream_id}: missing chunk {missing_seq}")]
    StorageInconsistency {
        /// Stream the backfill was reading
        stream_id: StreamId,
        /// First sequence number the store failed to return
        missing_seq: u64,
    },

    /// The engine has been shut down
    #[error("engine is shut down")]
    ShutDown,
}
