//! The durable log contract every backend implements.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreResult;
use crate::types::{AppendOutcome, Chunk, StreamId, StreamMeta, TerminalState};

/// Append-only chunk log keyed by `(stream id, sequence number)`.
///
/// Implementations must guarantee that concurrent appends for different
/// `(stream id, seq)` pairs never corrupt each other and that a duplicate
/// append is an idempotent no-op, never a silent overwrite.
#[async_trait]
pub trait ChunkStore: Clone + Send + Sync + 'static {
    /// Persist one chunk.
    ///
    /// A fresh `(stream id, seq)` pair is written and advances the stream's
    /// `next_seq` to `max(next_seq, seq + 1)`; a pair that already exists
    /// leaves the stored bytes untouched and reports
    /// [`AppendOutcome::Duplicate`]. Appending to a terminal stream is
    /// rejected with [`StoreError::StreamTerminal`].
    ///
    /// [`StoreError::StreamTerminal`]: crate::StoreError::StreamTerminal
    async fn append(
        &self,
        stream_id: &StreamId,
        seq: u64,
        payload: Bytes,
    ) -> StoreResult<AppendOutcome>;

    /// Read up to `max_chunks` chunks with `seq >= from_seq`, ascending.
    ///
    /// Each call re-queries the log; this is a finite, restartable read, not
    /// a live subscription. Callers page by advancing `from_seq` past the
    /// last returned chunk until a short batch comes back. Unknown streams
    /// read as empty.
    async fn read_range(
        &self,
        stream_id: &StreamId,
        from_seq: u64,
        max_chunks: usize,
    ) -> StoreResult<Vec<Chunk>>;

    /// Fetch the metadata row for a stream, or `None` if it never existed.
    async fn stream_meta(&self, stream_id: &StreamId) -> StoreResult<Option<StreamMeta>>;

    /// Write the terminal state for a stream. First write wins.
    ///
    /// Repeating the already-persisted state is an idempotent no-op; a
    /// different state is rejected with [`StoreError::TerminalConflict`].
    /// An unknown stream id creates the metadata row, since a stream can
    /// finish before its first chunk is appended.
    ///
    /// [`StoreError::TerminalConflict`]: crate::StoreError::TerminalConflict
    async fn set_terminal(
        &self,
        stream_id: &StreamId,
        state: TerminalState,
        error_message: Option<String>,
    ) -> StoreResult<()>;

    /// Retention sweep: delete streams whose terminal state is older than
    /// `age`, returning the ids removed. Streams still running are never
    /// touched.
    async fn delete_older_than(&self, age: Duration) -> StoreResult<Vec<StreamId>>;
}

/// Implement ChunkStore for Arc<T> where T: ChunkStore
#[async_trait]
impl<T: ChunkStore> ChunkStore for std::sync::Arc<T> {
    async fn append(
        &self,
        stream_id: &StreamId,
        seq: u64,
        payload: Bytes,
    ) -> StoreResult<AppendOutcome> {
        (**self).append(stream_id, seq, payload).await
    }

    async fn read_range(
        &self,
        stream_id: &StreamId,
        from_seq: u64,
        max_chunks: usize,
    ) -> StoreResult<Vec<Chunk>> {
        (**self).read_range(stream_id, from_seq, max_chunks).await
    }

    async fn stream_meta(&self, stream_id: &StreamId) -> StoreResult<Option<StreamMeta>> {
        (**self).stream_meta(stream_id).await
    }

    async fn set_terminal(
        &self,
        stream_id: &StreamId,
        state: TerminalState,
        error_message: Option<String>,
    ) -> StoreResult<()> {
        (**self).set_terminal(stream_id, state, error_message).await
    }

    async fn delete_older_than(&self, age: Duration) -> StoreResult<Vec<StreamId>> {
        (**self).delete_older_than(age).await
    }
}
