//! Producer coordination: single-flight admission and the per-stream
//! production task.

use std::sync::Arc;

use restream_store::{AppendOutcome, ChunkStore, StoreError, StreamId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::attach;
use crate::engine::EngineInner;
use crate::error::EngineResult;
use crate::frame::StreamState;
use crate::registry::ProducerAdmission;
use crate::sink::StreamReading;
use crate::source::UpstreamSource;

/// Result of a produce request.
#[derive(Debug)]
pub struct ProduceOutcome {
    /// The caller's own reading of the stream, from seq 0
    pub reading: StreamReading,
    /// True when this call won the single-flight race and started the
    /// producer; false when it joined an existing or finished stream
    pub started: bool,
    /// Sequence position at admission time (the resumability marker)
    pub next_seq: u64,
}

/// Start producing, or join the stream that is already producing.
///
/// Exactly one producer task runs per stream id; a losing caller is attached
/// as a reader of the winner's stream. A terminal stream degrades to a plain
/// replay attachment.
pub(crate) async fn start_or_join<C: ChunkStore, U: UpstreamSource>(
    inner: &Arc<EngineInner<C>>,
    stream_id: &StreamId,
    source: U,
) -> EngineResult<ProduceOutcome> {
    let meta = inner.store.stream_meta(stream_id).await?;

    if let Some(state) = meta.as_ref().and_then(|m| m.terminal) {
        debug!("produce request for terminal stream {stream_id} ({state}), replaying instead");
        let next_seq = meta.as_ref().map_or(0, |m| m.next_seq);
        inner.registry.observe(stream_id, next_seq);
        let reading = attach::attach(inner, stream_id, 0).await?;
        return Ok(ProduceOutcome {
            reading,
            started: false,
            next_seq,
        });
    }

    let persisted_next = meta.as_ref().map_or(0, |m| m.next_seq);
    match inner.registry.admit_producer(stream_id, persisted_next) {
        ProducerAdmission::Busy => {
            info!("stream {stream_id} already producing, joining as reader");
            let reading = attach::attach(inner, stream_id, 0).await?;
            Ok(ProduceOutcome {
                reading,
                started: false,
                next_seq: persisted_next,
            })
        }
        ProducerAdmission::Admitted { cancel, first_seq } => {
            info!("starting producer for stream {stream_id} at seq {first_seq}");
            spawn_producer(inner, stream_id.clone(), source, first_seq, cancel);
            let reading = attach::attach(inner, stream_id, 0).await?;
            Ok(ProduceOutcome {
                reading,
                started: true,
                next_seq: first_seq,
            })
        }
    }
}

fn spawn_producer<C: ChunkStore, U: UpstreamSource>(
    inner: &Arc<EngineInner<C>>,
    stream_id: StreamId,
    source: U,
    first_seq: u64,
    cancel: CancellationToken,
) {
    let task_inner = inner.clone();
    let shutdown = inner.shutdown.clone();
    inner.tasks.spawn(async move {
        tokio::select! {
            () = run_producer(task_inner, stream_id.clone(), source, first_seq, cancel) => {}
            () = shutdown.cancelled() => {
                // Abandon without a terminal write: a shut-down process must
                // look exactly like a crashed one to its successor.
                debug!("producer for stream {stream_id} abandoned at shutdown");
            }
        }
    });
}

async fn run_producer<C: ChunkStore, U: UpstreamSource>(
    inner: Arc<EngineInner<C>>,
    stream_id: StreamId,
    mut source: U,
    first_seq: u64,
    cancel: CancellationToken,
) {
    let mut next_seq = first_seq;

    let (state, message) = loop {
        let pulled = tokio::select! {
            () = cancel.cancelled() => {
                info!("producer for stream {stream_id} canceled after {next_seq} chunks");
                break (StreamState::Canceled, None);
            }
            pulled = source.next_chunk() => pulled,
        };

        match pulled {
            Ok(Some(payload)) => {
                let seq = next_seq;
                match inner.store.append(&stream_id, seq, payload.clone()).await {
                    Ok(AppendOutcome::Appended) => {}
                    Ok(AppendOutcome::Duplicate) => {
                        warn!("stream {stream_id} seq {seq} was already persisted");
                    }
                    Err(StoreError::StreamTerminal { state, .. }) => {
                        // Something else already finished the stream; the
                        // store is authoritative, so stand down.
                        warn!("stream {stream_id} went terminal ({state}) under the producer");
                        break (StreamState::from(state), None);
                    }
                    Err(error) => {
                        error!("store append failed for stream {stream_id} seq {seq}: {error}");
                        break (
                            StreamState::Failed,
                            Some(format!("store write failure: {error}")),
                        );
                    }
                }
                next_seq = seq + 1;
                // Persisted first, then broadcast: a reader must never see a
                // chunk a replay-after-restart could not reproduce.
                inner.registry.fan_out(
                    &stream_id,
                    seq,
                    &payload,
                    inner.config.catchup_buffer_limit,
                );
                inner.text.ingest(&stream_id, seq, &payload);
            }
            Ok(None) => {
                info!("stream {stream_id} completed with {next_seq} chunks");
                break (StreamState::Completed, None);
            }
            Err(error) => {
                warn!("upstream failure on stream {stream_id}: {error}");
                break (StreamState::Failed, Some(error.to_string()));
            }
        }
    };

    finish_stream(&inner, &stream_id, state, message).await;
}

/// Persist the terminal state, then detach and close every live reader.
pub(crate) async fn finish_stream<C: ChunkStore>(
    inner: &Arc<EngineInner<C>>,
    stream_id: &StreamId,
    state: StreamState,
    message: Option<String>,
) {
    let mut close_state = state;
    let mut close_message = message.clone();

    if let Some(terminal) = state.terminal() {
        match inner
            .store
            .set_terminal(stream_id, terminal, message)
            .await
        {
            Ok(()) => {}
            Err(StoreError::TerminalConflict { existing, .. }) => {
                // First write won elsewhere; report that state to readers.
                warn!("stream {stream_id} already terminal as {existing}");
                close_state = StreamState::from(existing);
                close_message = None;
            }
            Err(error) => {
                error!("failed to persist terminal state for stream {stream_id}: {error}");
            }
        }
    }

    for slot in inner.registry.finish_produce(stream_id) {
        slot.flush_and_close(close_state, close_message.as_deref());
    }
}
