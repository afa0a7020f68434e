//! Per-process stream bookkeeping.
//!
//! The registry is a cache, never authoritative: everything in it can be
//! rebuilt from the chunk store. It owns the two things the store does not
//! persist (the per-stream producing flag that enforces single-flight, and
//! the set of live reader sinks) plus a `next_seq` cache that tells an
//! attaching reader where the fan-out currently stands.
//!
//! All mutation happens under the per-stream map entry and never awaits, so
//! a shard lock is held only for map/buffer operations and non-blocking
//! sink writes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use restream_store::StreamId;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::frame::StreamState;
use crate::sink::{Sink, SinkError};

/// Tokens for one active producer task.
#[derive(Clone)]
pub(crate) struct ProducerHandle {
    /// Cancels the producer loop cooperatively
    pub cancel: CancellationToken,
    /// Fired by the registry once the producer has fully finished
    pub done: CancellationToken,
}

/// Result of a producer admission attempt.
pub(crate) enum ProducerAdmission {
    /// This caller owns production; the token cancels it
    Admitted {
        cancel: CancellationToken,
        first_seq: u64,
    },
    /// Another producer is active for this stream
    Busy,
}

/// Registration of a catching-up reader.
pub(crate) struct ReaderRegistration {
    pub reader_id: u64,
    /// Fan-out position at registration time: every chunk at or above this
    /// seq reaches the reader's catch-up buffer, everything below it must
    /// come from the store
    pub watermark: u64,
}

/// Result of completing a reader's catch-up.
pub(crate) enum CatchupOutcome {
    /// The reader is now live on the fan-out path
    MadeLive,
    /// The producer finished while the reader was catching up; the buffer
    /// was flushed and the slot removed. Carries the next undelivered seq
    /// after the flush, when anything was flushed.
    ProducerFinished { flushed_next: Option<u64> },
    /// The slot no longer exists (reader was dropped)
    Gone,
}

/// One registered reader.
pub(crate) struct ReaderSlot {
    id: u64,
    /// Chunks below this seq are not delivered; the reader's attachment has
    /// already replayed them from the store
    floor: u64,
    sink: Arc<dyn Sink>,
    /// Buffered live chunks while the reader is still catching up; `None`
    /// once live
    catchup: Option<VecDeque<(u64, Bytes)>>,
}

impl ReaderSlot {
    /// Deliver one live chunk; returns false when the reader must be dropped.
    fn deliver(&mut self, seq: u64, payload: &Bytes, buffer_limit: usize) -> bool {
        if seq < self.floor {
            return true;
        }
        match &mut self.catchup {
            Some(buffer) => {
                if buffer.len() >= buffer_limit {
                    warn!("reader {} dropped: catch-up buffer overflow", self.id);
                    self.sink.close_with_error("reader lagged during catch-up");
                    false
                } else {
                    buffer.push_back((seq, payload.clone()));
                    true
                }
            }
            None => match self.sink.try_write(seq, payload.clone()) {
                Ok(()) => true,
                Err(SinkError::Full) => {
                    warn!("reader {} dropped: channel full", self.id);
                    self.sink.close_with_error("reader lagging, dropped");
                    false
                }
                Err(SinkError::Closed) => {
                    debug!("reader {} dropped: channel closed", self.id);
                    false
                }
            },
        }
    }

    /// Flush any buffered chunks, then close with the given state.
    pub(crate) fn flush_and_close(mut self, state: StreamState, message: Option<&str>) {
        if let Some(buffer) = self.catchup.take() {
            for (seq, payload) in buffer {
                if self.sink.try_write(seq, payload).is_err() {
                    break;
                }
            }
        }
        match message {
            Some(message) => self.sink.close_with_error(message),
            None => self.sink.close(state),
        }
    }
}

struct StreamEntry {
    producer: Option<ProducerHandle>,
    /// Cache of the store's next_seq, advanced by the local fan-out
    next_seq: u64,
    readers: Vec<ReaderSlot>,
}

/// In-memory index of streams known to this process.
pub(crate) struct StreamRegistry {
    streams: DashMap<StreamId, StreamEntry>,
    next_reader_id: AtomicU64,
}

impl StreamRegistry {
    pub(crate) fn new() -> Self {
        Self {
            streams: DashMap::new(),
            next_reader_id: AtomicU64::new(0),
        }
    }

    /// Record a stream observed in the store, warming the next_seq cache.
    pub(crate) fn observe(&self, stream_id: &StreamId, persisted_next: u64) {
        match self.streams.entry(stream_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if persisted_next > entry.next_seq {
                    entry.next_seq = persisted_next;
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StreamEntry {
                    producer: None,
                    next_seq: persisted_next,
                    readers: Vec::new(),
                });
            }
        }
    }

    /// Single-flight check-and-set: install a producer unless one is active.
    pub(crate) fn admit_producer(
        &self,
        stream_id: &StreamId,
        persisted_next: u64,
    ) -> ProducerAdmission {
        let handle = ProducerHandle {
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
        };
        match self.streams.entry(stream_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.producer.is_some() {
                    return ProducerAdmission::Busy;
                }
                if persisted_next > entry.next_seq {
                    entry.next_seq = persisted_next;
                }
                let first_seq = entry.next_seq;
                let cancel = handle.cancel.clone();
                entry.producer = Some(handle);
                ProducerAdmission::Admitted { cancel, first_seq }
            }
            Entry::Vacant(vacant) => {
                let cancel = handle.cancel.clone();
                vacant.insert(StreamEntry {
                    producer: Some(handle),
                    next_seq: persisted_next,
                    readers: Vec::new(),
                });
                ProducerAdmission::Admitted {
                    cancel,
                    first_seq: persisted_next,
                }
            }
        }
    }

    /// Whether a producer task is currently active for the stream.
    pub(crate) fn is_producing(&self, stream_id: &StreamId) -> bool {
        self.streams
            .get(stream_id)
            .is_some_and(|entry| entry.producer.is_some())
    }

    /// Cancellation tokens of the active producer, if any.
    pub(crate) fn producer_handle(&self, stream_id: &StreamId) -> Option<ProducerHandle> {
        self.streams
            .get(stream_id)
            .and_then(|entry| entry.producer.clone())
    }

    /// Broadcast one persisted chunk to every registered reader.
    ///
    /// Readers that cannot keep up are dropped here; catching-up readers
    /// receive the chunk via their buffer. Never blocks.
    pub(crate) fn fan_out(
        &self,
        stream_id: &StreamId,
        seq: u64,
        payload: &Bytes,
        buffer_limit: usize,
    ) {
        let Some(mut entry) = self.streams.get_mut(stream_id) else {
            return;
        };
        if seq + 1 > entry.next_seq {
            entry.next_seq = seq + 1;
        }
        entry
            .readers
            .retain_mut(|slot| slot.deliver(seq, payload, buffer_limit));
    }

    /// Register a sink as a catching-up reader of an actively-producing
    /// stream. Returns `None` when no producer is active.
    pub(crate) fn register_reader(
        &self,
        stream_id: &StreamId,
        floor: u64,
        sink: Arc<dyn Sink>,
    ) -> Option<ReaderRegistration> {
        let mut entry = self.streams.get_mut(stream_id)?;
        if entry.producer.is_none() {
            return None;
        }
        let reader_id = self.next_reader_id.fetch_add(1, Ordering::Relaxed);
        let watermark = entry.next_seq;
        entry.readers.push(ReaderSlot {
            id: reader_id,
            floor,
            sink,
            catchup: Some(VecDeque::new()),
        });
        Some(ReaderRegistration {
            reader_id,
            watermark,
        })
    }

    /// Complete a reader's catch-up: flush its buffer in order and put it on
    /// the live fan-out path.
    ///
    /// `delivered_through` is the seq the attachment's own store replay has
    /// reached. A chunk is readable the moment its append commits, so the
    /// replay can run ahead of the fan-out; buffered chunks below this seq
    /// were already delivered that way, and the slot's floor rises to it so
    /// a fan-out still in flight for a replayed chunk is filtered.
    pub(crate) fn finish_reader_catchup(
        &self,
        stream_id: &StreamId,
        reader_id: u64,
        delivered_through: u64,
    ) -> CatchupOutcome {
        let Some(mut entry) = self.streams.get_mut(stream_id) else {
            return CatchupOutcome::Gone;
        };
        let Some(position) = entry.readers.iter().position(|slot| slot.id == reader_id) else {
            return CatchupOutcome::Gone;
        };

        let producing = entry.producer.is_some();
        let buffer = entry.readers[position].catchup.take();
        let sink = entry.readers[position].sink.clone();
        let mut flushed_next = None;

        if let Some(buffer) = buffer {
            for (seq, payload) in buffer {
                if seq >= delivered_through && sink.try_write(seq, payload).is_err() {
                    entry.readers.remove(position);
                    return CatchupOutcome::Gone;
                }
                flushed_next = Some(seq + 1);
            }
        }

        if producing {
            let slot = &mut entry.readers[position];
            slot.floor = slot.floor.max(delivered_through);
            CatchupOutcome::MadeLive
        } else {
            // Producer finished while this reader was catching up; the
            // attachment drains the rest from the store and closes.
            entry.readers.remove(position);
            CatchupOutcome::ProducerFinished { flushed_next }
        }
    }

    /// Drop one reader slot, if it is still registered.
    pub(crate) fn remove_reader(&self, stream_id: &StreamId, reader_id: u64) {
        if let Some(mut entry) = self.streams.get_mut(stream_id) {
            entry.readers.retain(|slot| slot.id != reader_id);
        }
    }

    /// Clear the producer and detach every live reader for closing.
    ///
    /// Catching-up readers stay registered: their attachment tasks own
    /// delivery until catch-up completes and will observe the cleared
    /// producer. Fires the producer's done token.
    pub(crate) fn finish_produce(&self, stream_id: &StreamId) -> Vec<ReaderSlot> {
        let Some(mut entry) = self.streams.get_mut(stream_id) else {
            return Vec::new();
        };
        if let Some(handle) = entry.producer.take() {
            handle.done.cancel();
        }
        let mut live = Vec::new();
        let mut index = 0;
        while index < entry.readers.len() {
            if entry.readers[index].catchup.is_none() {
                live.push(entry.readers.remove(index));
            } else {
                index += 1;
            }
        }
        live
    }

    /// Drop all bookkeeping for a stream the store no longer knows.
    pub(crate) fn forget(&self, stream_id: &StreamId) {
        self.streams.remove(stream_id);
    }

    /// Drop every entry, ending any readings still held by consumers.
    pub(crate) fn clear(&self) {
        self.streams.clear();
    }

    /// Number of registered readers, for logging and tests.
    pub(crate) fn reader_count(&self, stream_id: &StreamId) -> usize {
        self.streams
            .get(stream_id)
            .map_or(0, |entry| entry.readers.len())
    }
}
