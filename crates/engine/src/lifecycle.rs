//! Stream lifecycle: cancellation and status reads.

use std::sync::Arc;

use restream_store::{ChunkStore, StoreError, StreamId, TerminalState};
use serde::Serialize;
use tracing::{debug, info};

use crate::engine::EngineInner;
use crate::error::{EngineError, EngineResult};
use crate::frame::StreamState;

/// Point-in-time view of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    /// The stream id
    pub stream_id: StreamId,
    /// Count of persisted chunks, equal to the next sequence number
    pub seq: u64,
    /// Running, or the terminal state
    pub state: StreamState,
    /// Failure message when the stream failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Pure read of the stream's persisted metadata.
pub(crate) async fn status<C: ChunkStore>(
    inner: &Arc<EngineInner<C>>,
    stream_id: &StreamId,
) -> EngineResult<StreamStatus> {
    let Some(meta) = inner.store.stream_meta(stream_id).await? else {
        return Err(EngineError::StreamNotFound(stream_id.clone()));
    };
    Ok(StreamStatus {
        stream_id: stream_id.clone(),
        seq: meta.next_seq,
        state: StreamState::from(meta.terminal),
        error_message: meta.error_message,
    })
}

/// Cancel a stream, idempotently, and report its final status.
///
/// An active producer is stopped cooperatively and the call waits for it to
/// persist the terminal state. With no producer, a non-terminal stream is
/// the orphan case: the terminal state is forced directly. Canceling an
/// already-terminal stream is a no-op success.
pub(crate) async fn cancel<C: ChunkStore>(
    inner: &Arc<EngineInner<C>>,
    stream_id: &StreamId,
) -> EngineResult<StreamStatus> {
    if let Some(handle) = inner.registry.producer_handle(stream_id) {
        info!("canceling active producer for stream {stream_id}");
        handle.cancel.cancel();
        tokio::select! {
            () = handle.done.cancelled() => {}
            () = inner.shutdown.cancelled() => return Err(EngineError::ShutDown),
        }
        return status(inner, stream_id).await;
    }

    let Some(meta) = inner.store.stream_meta(stream_id).await? else {
        return Err(EngineError::StreamNotFound(stream_id.clone()));
    };

    if let Some(state) = meta.terminal {
        debug!("cancel of stream {stream_id}: already terminal ({state})");
        return status(inner, stream_id).await;
    }

    // No producer and not terminal: the producer died (or was shut down)
    // before marking the stream. Force the terminal state; first write still
    // wins if something else terminates it concurrently.
    info!("force-canceling orphaned stream {stream_id}");
    match inner
        .store
        .set_terminal(stream_id, TerminalState::Canceled, None)
        .await
    {
        Ok(()) => {}
        Err(StoreError::TerminalConflict { existing, .. }) => {
            debug!("stream {stream_id} went terminal ({existing}) during cancel");
        }
        Err(error) => return Err(error.into()),
    }

    let resolved = status(inner, stream_id).await?;
    // Stray live readers are closed with the resolved state; catching-up
    // slots are left to their attachment tasks, which will observe the
    // terminal stream and close in order.
    for slot in inner.registry.finish_produce(stream_id) {
        slot.flush_and_close(resolved.state, resolved.error_message.as_deref());
    }
    Ok(resolved)
}
