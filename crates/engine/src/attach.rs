//! Reader attachment: replay, gap backfill, live registration.
//!
//! An attachment delivers every persisted chunk from `from_seq` onward and
//! then, if the stream is still producing, joins the live fan-out with no
//! gap and no duplicate. The race between "finished replaying" and
//! "registered as a reader" is closed by the registration watermark: chunks
//! at or above it arrive through the slot's catch-up buffer, chunks below it
//! are read back from the store.
//!
//! The replay can also run ahead of the fan-out, because a chunk is readable
//! the moment its append commits, before the producer's append call has
//! necessarily returned. The slot therefore registers with its floor at the
//! replay position, and the catch-up flush skips seqs the replay already
//! covered, so a fan-out arriving late for a replayed chunk is filtered
//! instead of delivered twice.

use std::sync::Arc;

use restream_store::{ChunkStore, StreamId};
use tracing::{debug, warn};

use crate::engine::EngineInner;
use crate::error::{EngineError, EngineResult};
use crate::frame::StreamState;
use crate::registry::{CatchupOutcome, StreamRegistry};
use crate::sink::{ChannelSink, Sink, StreamReading};

/// Attach a reader to a stream, replaying from `from_seq`.
///
/// Fails fast with [`EngineError::StreamNotFound`] for ids the store has
/// never seen; everything else happens on the returned reading's pump task,
/// so a bounded consumer can pull at its own pace.
pub(crate) async fn attach<C: ChunkStore>(
    inner: &Arc<EngineInner<C>>,
    stream_id: &StreamId,
    from_seq: u64,
) -> EngineResult<StreamReading> {
    match inner.store.stream_meta(stream_id).await? {
        Some(meta) => inner.registry.observe(stream_id, meta.next_seq),
        None => {
            // A freshly admitted producer may not have persisted anything
            // yet; only an id neither store nor registry knows is missing.
            if !inner.registry.is_producing(stream_id) {
                return Err(EngineError::StreamNotFound(stream_id.clone()));
            }
        }
    }

    let (sink, reading) = ChannelSink::channel(inner.config.reader_channel_capacity);
    let sink = Arc::new(sink);

    let pump_inner = inner.clone();
    let pump_sink = sink.clone();
    let shutdown = inner.shutdown.clone();
    let id = stream_id.clone();
    inner.tasks.spawn(async move {
        tokio::select! {
            result = run_attach(pump_inner, id.clone(), from_seq, pump_sink.clone()) => {
                if let Err(error) = result {
                    warn!("attachment to stream {id} failed: {error}");
                    pump_sink
                        .close_wait(StreamState::Failed, Some(error.to_string()))
                        .await;
                }
            }
            () = shutdown.cancelled() => {
                debug!("attachment to stream {id} abandoned at shutdown");
            }
        }
    });

    Ok(reading)
}

async fn run_attach<C: ChunkStore>(
    inner: Arc<EngineInner<C>>,
    stream_id: StreamId,
    from_seq: u64,
    sink: Arc<ChannelSink>,
) -> EngineResult<()> {
    let mut next = replay_persisted(&inner, &stream_id, from_seq, sink.as_ref()).await?;

    loop {
        // Floor at the replay position, not the caller's from_seq: chunks
        // below it are already delivered, and the fan-out for one of them
        // may still be in flight.
        if let Some(registration) = inner.registry.register_reader(&stream_id, next, sink.clone()) {
            let guard = ReaderGuard::new(&inner.registry, &stream_id, registration.reader_id);
            next = backfill_to_watermark(
                &inner,
                &stream_id,
                next,
                registration.watermark,
                sink.as_ref(),
            )
            .await?;

            match inner
                .registry
                .finish_reader_catchup(&stream_id, registration.reader_id, next)
            {
                CatchupOutcome::MadeLive => {
                    guard.disarm();
                    debug!(
                        "reader {} live on stream {stream_id} from seq {next} ({} readers attached)",
                        registration.reader_id,
                        inner.registry.reader_count(&stream_id)
                    );
                    return Ok(());
                }
                CatchupOutcome::ProducerFinished { flushed_next } => {
                    guard.disarm();
                    if let Some(flushed) = flushed_next {
                        next = next.max(flushed);
                    }
                }
                CatchupOutcome::Gone => {
                    // The slot was dropped while catching up; whoever removed
                    // it owns the close, so do not send a second sentinel.
                    guard.disarm();
                    debug!(
                        "reader {} on stream {stream_id} vanished during catch-up",
                        registration.reader_id
                    );
                    return Ok(());
                }
            }
        }

        // No live producer (or it finished under us): deliver whatever else
        // got persisted, then close by what the store says.
        next = replay_persisted(&inner, &stream_id, next, sink.as_ref()).await?;

        let meta = inner.store.stream_meta(&stream_id).await?;
        if let Some(state) = meta.as_ref().and_then(|m| m.terminal) {
            let message = meta.and_then(|m| m.error_message);
            sink.close_wait(StreamState::from(state), message).await;
            return Ok(());
        }
        if inner.registry.is_producing(&stream_id) {
            // A producer appeared while draining; register with it.
            continue;
        }

        // Not terminal, no producer: the orphaned-stream condition. Report
        // the running state and leave resolution to cancel or a re-produce.
        debug!("stream {stream_id} is idle with no terminal state");
        sink.close_wait(StreamState::Running, None).await;
        return Ok(());
    }
}

/// Replay persisted chunks from `from_seq` until a short page, with
/// backpressure. Returns the next undelivered seq.
async fn replay_persisted<C: ChunkStore>(
    inner: &EngineInner<C>,
    stream_id: &StreamId,
    from_seq: u64,
    sink: &ChannelSink,
) -> EngineResult<u64> {
    let batch = inner.config.replay_batch_size;
    let mut next = from_seq;
    loop {
        let chunks = inner.store.read_range(stream_id, next, batch).await?;
        let short = chunks.len() < batch;
        for chunk in chunks {
            sink.write(chunk.seq, chunk.payload)
                .await
                .map_err(|_| EngineError::SinkClosed)?;
            next = chunk.seq + 1;
        }
        if short {
            return Ok(next);
        }
    }
}

/// Read back the gap `[next, watermark)` the replay missed.
///
/// Everything below the watermark was persisted before the reader slot
/// registered, so these reads must find a contiguous run; a hole means the
/// backend lost data.
async fn backfill_to_watermark<C: ChunkStore>(
    inner: &EngineInner<C>,
    stream_id: &StreamId,
    from_seq: u64,
    watermark: u64,
    sink: &ChannelSink,
) -> EngineResult<u64> {
    let batch = inner.config.replay_batch_size;
    let mut next = from_seq;
    while next < watermark {
        let limit = batch.min((watermark - next) as usize);
        let chunks = inner.store.read_range(stream_id, next, limit).await?;
        if chunks.is_empty() {
            return Err(EngineError::StorageInconsistency {
                stream_id: stream_id.clone(),
                missing_seq: next,
            });
        }
        for chunk in chunks {
            if chunk.seq != next {
                return Err(EngineError::StorageInconsistency {
                    stream_id: stream_id.clone(),
                    missing_seq: next,
                });
            }
            sink.write(chunk.seq, chunk.payload)
                .await
                .map_err(|_| EngineError::SinkClosed)?;
            next += 1;
        }
    }
    Ok(next)
}

/// Removes the reader slot if the attachment bails out while registered.
struct ReaderGuard<'a> {
    registry: &'a StreamRegistry,
    stream_id: &'a StreamId,
    reader_id: u64,
    armed: bool,
}

impl<'a> ReaderGuard<'a> {
    fn new(registry: &'a StreamRegistry, stream_id: &'a StreamId, reader_id: u64) -> Self {
        Self {
            registry,
            stream_id,
            reader_id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.remove_reader(self.stream_id, self.reader_id);
        }
    }
}
