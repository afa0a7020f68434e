//! The engine facade tying the pieces together.

use std::sync::Arc;

use restream_store::{ChunkStore, StreamId};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::attach;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::{self, StreamStatus};
use crate::producer::{self, ProduceOutcome};
use crate::registry::StreamRegistry;
use crate::retention;
use crate::sink::StreamReading;
use crate::source::UpstreamSource;
use crate::text_index::{self, TextIndex};

/// State shared by the engine handle and its background tasks.
pub(crate) struct EngineInner<C: ChunkStore> {
    pub(crate) store: C,
    pub(crate) config: EngineConfig,
    pub(crate) registry: StreamRegistry,
    pub(crate) text: TextIndex,
    pub(crate) shutdown: CancellationToken,
    pub(crate) tasks: TaskTracker,
}

/// Resumable multi-reader stream broadcast engine over a chunk store.
///
/// One engine serves any number of streams: at most one producer task per
/// stream id pulls from its upstream source, every chunk is persisted before
/// it is broadcast, and readers can attach at any time, from any sequence
/// position, before or after the stream finishes.
///
/// The handle is cheap to clone; all state lives behind an `Arc`. Must be
/// created inside a Tokio runtime.
#[derive(Clone)]
pub struct StreamEngine<C: ChunkStore> {
    inner: Arc<EngineInner<C>>,
}

impl<C: ChunkStore> StreamEngine<C> {
    /// Create an engine over the given store and start its background tasks.
    pub fn new(store: C, config: EngineConfig) -> Self {
        let inner = Arc::new(EngineInner {
            store,
            config,
            registry: StreamRegistry::new(),
            text: TextIndex::new(),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        });
        retention::spawn_sweeper(&inner);
        Self { inner }
    }

    /// Start producing the stream, or join it if it is already producing.
    ///
    /// Exactly one producer runs per stream id; concurrent calls all receive
    /// the same chunks. A call for a terminal stream degrades to a replay
    /// attachment. The returned reading starts at seq 0.
    pub async fn produce<U: UpstreamSource>(
        &self,
        stream_id: &StreamId,
        source: U,
    ) -> EngineResult<ProduceOutcome> {
        self.ensure_running()?;
        producer::start_or_join(&self.inner, stream_id, source).await
    }

    /// Attach a reader to a stream, replaying from `from_seq`.
    ///
    /// The reading replays every persisted chunk from `from_seq` onward,
    /// then tails the live stream if one is producing, or ends with the
    /// stream's state. Each persisted chunk arrives exactly once.
    pub async fn attach(&self, stream_id: &StreamId, from_seq: u64) -> EngineResult<StreamReading> {
        self.ensure_running()?;
        attach::attach(&self.inner, stream_id, from_seq).await
    }

    /// Cancel a stream and report its final status. Idempotent.
    pub async fn cancel(&self, stream_id: &StreamId) -> EngineResult<StreamStatus> {
        self.ensure_running()?;
        lifecycle::cancel(&self.inner, stream_id).await
    }

    /// Read a stream's current status from the store.
    pub async fn status(&self, stream_id: &StreamId) -> EngineResult<StreamStatus> {
        lifecycle::status(&self.inner, stream_id).await
    }

    /// Accumulated text extracted from the stream's chunks so far.
    pub async fn text_so_far(&self, stream_id: &StreamId) -> EngineResult<String> {
        text_index::text_so_far(&self.inner, stream_id).await
    }

    /// Whether this process is currently producing the stream.
    pub fn is_producing(&self, stream_id: &StreamId) -> bool {
        self.inner.registry.is_producing(stream_id)
    }

    /// Stop background tasks and wait for them to finish.
    ///
    /// Producers are abandoned without terminal writes, so a successor
    /// process sees unfinished streams the same way it would after a crash:
    /// as orphans, resolvable by cancel or a new produce call. Readings
    /// still held by consumers end once the bookkeeping is dropped.
    pub async fn shutdown(&self) {
        info!("stream engine shutting down");
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.registry.clear();
    }

    fn ensure_running(&self) -> EngineResult<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::ShutDown);
        }
        Ok(())
    }
}

impl<C: ChunkStore> std::fmt::Debug for StreamEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEngine").finish_non_exhaustive()
    }
}
