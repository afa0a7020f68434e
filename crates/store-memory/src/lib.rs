//! In-memory chunk store implementation
//!
//! Default backend for the chunk log contract. Everything lives in one
//! process, so this is also the restart-simulation vehicle for tests: drop
//! the engine, keep the store, attach again.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use bytes::Bytes;
use restream_store::{
    AppendOutcome, Chunk, StoreError, StoreResult, StreamId, StreamMeta, TerminalState,
};
use tokio::sync::RwLock;
use tracing::debug;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Per-stream slot: ordered chunk log plus the metadata row.
struct StreamSlot {
    chunks: BTreeMap<u64, Chunk>,
    meta: StreamMeta,
}

impl StreamSlot {
    fn new(created_at: u64) -> Self {
        Self {
            chunks: BTreeMap::new(),
            meta: StreamMeta {
                next_seq: 0,
                terminal: None,
                error_message: None,
                created_at,
                terminal_at: None,
            },
        }
    }
}

/// In-memory chunk store using a BTreeMap per stream for seq ordering
#[derive(Clone)]
pub struct MemoryChunkStore {
    streams: Arc<RwLock<HashMap<StreamId, StreamSlot>>>,
}

impl MemoryChunkStore {
    /// Create a new in-memory chunk store
    pub fn new() -> Self {
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl restream_store::ChunkStore for MemoryChunkStore {
    async fn append(
        &self,
        stream_id: &StreamId,
        seq: u64,
        payload: Bytes,
    ) -> StoreResult<AppendOutcome> {
        let now = now_millis();
        let mut streams = self.streams.write().await;

        let slot = streams
            .entry(stream_id.clone())
            .or_insert_with(|| StreamSlot::new(now));

        if let Some(state) = slot.meta.terminal {
            return Err(StoreError::StreamTerminal {
                stream_id: stream_id.clone(),
                state,
            });
        }

        // Duplicate (stream, seq) pairs are idempotent no-ops, never overwrites.
        if slot.chunks.contains_key(&seq) {
            return Ok(AppendOutcome::Duplicate);
        }

        slot.chunks.insert(
            seq,
            Chunk {
                seq,
                payload,
                written_at: now,
            },
        );
        if seq + 1 > slot.meta.next_seq {
            slot.meta.next_seq = seq + 1;
        }

        Ok(AppendOutcome::Appended)
    }

    async fn read_range(
        &self,
        stream_id: &StreamId,
        from_seq: u64,
        max_chunks: usize,
    ) -> StoreResult<Vec<Chunk>> {
        let streams = self.streams.read().await;

        if let Some(slot) = streams.get(stream_id) {
            let chunks: Vec<_> = slot
                .chunks
                .range(from_seq..)
                .take(max_chunks)
                .map(|(_, chunk)| chunk.clone())
                .collect();
            Ok(chunks)
        } else {
            Ok(Vec::new())
        }
    }

    async fn stream_meta(&self, stream_id: &StreamId) -> StoreResult<Option<StreamMeta>> {
        let streams = self.streams.read().await;
        Ok(streams.get(stream_id).map(|slot| slot.meta.clone()))
    }

    async fn set_terminal(
        &self,
        stream_id: &StreamId,
        state: TerminalState,
        error_message: Option<String>,
    ) -> StoreResult<()> {
        let now = now_millis();
        let mut streams = self.streams.write().await;

        // A stream may finish before its first chunk lands (canceled right
        // away, or an empty upstream); create the meta row in that case.
        let slot = streams
            .entry(stream_id.clone())
            .or_insert_with(|| StreamSlot::new(now));

        match slot.meta.terminal {
            None => {
                slot.meta.terminal = Some(state);
                slot.meta.error_message = error_message;
                slot.meta.terminal_at = Some(now);
                Ok(())
            }
            Some(existing) if existing == state => Ok(()),
            Some(existing) => Err(StoreError::TerminalConflict {
                stream_id: stream_id.clone(),
                existing,
                requested: state,
            }),
        }
    }

    async fn delete_older_than(&self, age: Duration) -> StoreResult<Vec<StreamId>> {
        let cutoff = now_millis().saturating_sub(age.as_millis() as u64);
        let mut streams = self.streams.write().await;

        let expired: Vec<StreamId> = streams
            .iter()
            .filter(|(_, slot)| matches!(slot.meta.terminal_at, Some(t) if t <= cutoff))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            streams.remove(id);
            debug!("retention removed stream {id}");
        }

        Ok(expired)
    }
}

impl std::fmt::Debug for MemoryChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChunkStore")
            .field("streams", &"<locked>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use restream_store::ChunkStore;

    #[tokio::test]
    async fn test_append_and_read_range() {
        let store = MemoryChunkStore::new();
        let id = StreamId::from("s1");

        store
            .append(&id, 0, Bytes::from("chunk 0"))
            .await
            .unwrap();
        store
            .append(&id, 1, Bytes::from("chunk 1"))
            .await
            .unwrap();

        let chunks = store.read_range(&id, 0, 100).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].seq, 0);
        assert_eq!(chunks[0].payload, Bytes::from("chunk 0"));
        assert_eq!(chunks[1].seq, 1);
        assert_eq!(chunks[1].payload, Bytes::from("chunk 1"));

        let meta = store.stream_meta(&id).await.unwrap().unwrap();
        assert_eq!(meta.next_seq, 2);
        assert_eq!(meta.terminal, None);
    }

    #[tokio::test]
    async fn test_read_range_respects_from_seq_and_page_size() {
        let store = MemoryChunkStore::new();
        let id = StreamId::from("s1");

        for seq in 0..5 {
            store
                .append(&id, seq, Bytes::from(format!("chunk {seq}")))
                .await
                .unwrap();
        }

        let page = store.read_range(&id, 1, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].seq, 1);
        assert_eq!(page[1].seq, 2);

        let rest = store.read_range(&id, 3, 100).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].seq, 3);
        assert_eq!(rest[1].seq, 4);

        // Unknown streams read as empty, not as an error.
        let none = store
            .read_range(&StreamId::from("missing"), 0, 10)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_append_is_idempotent() {
        let store = MemoryChunkStore::new();
        let id = StreamId::from("s1");

        let first = store
            .append(&id, 0, Bytes::from("original"))
            .await
            .unwrap();
        assert_eq!(first, AppendOutcome::Appended);

        let second = store
            .append(&id, 0, Bytes::from("original"))
            .await
            .unwrap();
        assert_eq!(second, AppendOutcome::Duplicate);

        let chunks = store.read_range(&id, 0, 10).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].payload, Bytes::from("original"));

        let meta = store.stream_meta(&id).await.unwrap().unwrap();
        assert_eq!(meta.next_seq, 1, "duplicate append must not advance next_seq");
    }

    #[tokio::test]
    async fn test_append_rejected_once_terminal() {
        let store = MemoryChunkStore::new();
        let id = StreamId::from("s1");

        store.append(&id, 0, Bytes::from("chunk 0")).await.unwrap();
        store
            .set_terminal(&id, TerminalState::Canceled, None)
            .await
            .unwrap();

        let err = store
            .append(&id, 1, Bytes::from("late"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::StreamTerminal {
                state: TerminalState::Canceled,
                ..
            }
        ));

        // The canceled stream is still fully replayable.
        let chunks = store.read_range(&id, 0, 10).await.unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_set_terminal_first_write_wins() {
        let store = MemoryChunkStore::new();
        let id = StreamId::from("s1");

        store.append(&id, 0, Bytes::from("chunk 0")).await.unwrap();
        store
            .set_terminal(&id, TerminalState::Completed, None)
            .await
            .unwrap();

        // Same state again is a no-op.
        store
            .set_terminal(&id, TerminalState::Completed, None)
            .await
            .unwrap();

        // A different state is rejected.
        let err = store
            .set_terminal(&id, TerminalState::Failed, Some("boom".into()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::TerminalConflict {
                existing: TerminalState::Completed,
                requested: TerminalState::Failed,
                ..
            }
        ));

        let meta = store.stream_meta(&id).await.unwrap().unwrap();
        assert_eq!(meta.terminal, Some(TerminalState::Completed));
        assert_eq!(meta.error_message, None);
        assert!(meta.terminal_at.is_some());
    }

    #[tokio::test]
    async fn test_set_terminal_creates_row_for_chunkless_stream() {
        let store = MemoryChunkStore::new();
        let id = StreamId::from("canceled-before-first-chunk");

        store
            .set_terminal(&id, TerminalState::Canceled, None)
            .await
            .unwrap();

        let meta = store.stream_meta(&id).await.unwrap().unwrap();
        assert_eq!(meta.next_seq, 0);
        assert_eq!(meta.terminal, Some(TerminalState::Canceled));
        assert!(meta.terminal_at.is_some());
    }

    #[tokio::test]
    async fn test_set_terminal_records_error_message() {
        let store = MemoryChunkStore::new();
        let id = StreamId::from("s1");

        store.append(&id, 0, Bytes::from("chunk 0")).await.unwrap();
        store
            .set_terminal(&id, TerminalState::Failed, Some("upstream exploded".into()))
            .await
            .unwrap();

        let meta = store.stream_meta(&id).await.unwrap().unwrap();
        assert_eq!(meta.terminal, Some(TerminalState::Failed));
        assert_eq!(meta.error_message.as_deref(), Some("upstream exploded"));
    }

    #[tokio::test]
    async fn test_delete_older_than_only_removes_terminal_streams() {
        let store = MemoryChunkStore::new();
        let running = StreamId::from("running");
        let finished = StreamId::from("finished");

        store
            .append(&running, 0, Bytes::from("chunk"))
            .await
            .unwrap();
        store
            .append(&finished, 0, Bytes::from("chunk"))
            .await
            .unwrap();
        store
            .set_terminal(&finished, TerminalState::Completed, None)
            .await
            .unwrap();

        // Age zero expires every terminal stream, and only those.
        let removed = store.delete_older_than(Duration::ZERO).await.unwrap();
        assert_eq!(removed, vec![finished.clone()]);

        assert!(store.stream_meta(&finished).await.unwrap().is_none());
        assert!(store.stream_meta(&running).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_older_than_keeps_recent_terminal_streams() {
        let store = MemoryChunkStore::new();
        let id = StreamId::from("s1");

        store.append(&id, 0, Bytes::from("chunk")).await.unwrap();
        store
            .set_terminal(&id, TerminalState::Completed, None)
            .await
            .unwrap();

        let removed = store
            .delete_older_than(Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(removed.is_empty());
        assert!(store.stream_meta(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_appends_out_of_order_track_max_next_seq() {
        let store = MemoryChunkStore::new();
        let id = StreamId::from("s1");

        // Retried producer writes can land out of order.
        store.append(&id, 1, Bytes::from("chunk 1")).await.unwrap();
        store.append(&id, 0, Bytes::from("chunk 0")).await.unwrap();

        let meta = store.stream_meta(&id).await.unwrap().unwrap();
        assert_eq!(meta.next_seq, 2);

        let chunks = store.read_range(&id, 0, 10).await.unwrap();
        assert_eq!(chunks[0].seq, 0);
        assert_eq!(chunks[1].seq, 1);
    }
}
