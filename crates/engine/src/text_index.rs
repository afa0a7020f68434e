//! Accumulated-text side-index.
//!
//! Best-effort concatenation of the semantic text deltas carried inside
//! chunk payloads, for cheap "text so far" queries without replaying raw
//! chunks. The raw log stays authoritative: payloads that do not parse are
//! logged and skipped here but persisted and broadcast verbatim.

use dashmap::DashMap;
use restream_store::{ChunkStore, StreamId};
use serde::Deserialize;
use tracing::debug;

use crate::engine::EngineInner;
use crate::error::{EngineError, EngineResult};

/// Shape of a provider text-delta event. Anything else contributes no text.
#[derive(Deserialize)]
struct DeltaEvent {
    #[serde(rename = "type")]
    kind: String,
    delta: Option<String>,
}

/// Extract the semantic text delta from one chunk payload, if it has one.
pub(crate) fn extract_text_delta(payload: &[u8]) -> Option<String> {
    match serde_json::from_slice::<DeltaEvent>(payload) {
        Ok(event) if event.kind == "text-delta" => event.delta,
        Ok(_) => None,
        Err(error) => {
            debug!("skipping unparseable delta payload: {error}");
            None
        }
    }
}

struct TextEntry {
    text: String,
    /// First chunk seq not yet folded into `text`
    next_seq: u64,
}

/// Per-stream accumulated text, keyed by stream id.
pub(crate) struct TextIndex {
    entries: DashMap<StreamId, TextEntry>,
}

impl TextIndex {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Fold one freshly produced chunk into the index.
    ///
    /// Only contiguous chunks extend the entry; anything else is left for a
    /// lazy rebuild from the raw log.
    pub(crate) fn ingest(&self, stream_id: &StreamId, seq: u64, payload: &[u8]) {
        let mut entry = self
            .entries
            .entry(stream_id.clone())
            .or_insert_with(|| TextEntry {
                text: String::new(),
                next_seq: 0,
            });
        if seq != entry.next_seq {
            return;
        }
        if let Some(delta) = extract_text_delta(payload) {
            entry.text.push_str(&delta);
        }
        entry.next_seq = seq + 1;
    }

    fn snapshot(&self, stream_id: &StreamId) -> Option<(String, u64)> {
        self.entries
            .get(stream_id)
            .map(|entry| (entry.text.clone(), entry.next_seq))
    }

    fn store_rebuilt(&self, stream_id: &StreamId, text: String, next_seq: u64) {
        match self.entries.entry(stream_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if next_seq >= occupied.get().next_seq {
                    occupied.insert(TextEntry { text, next_seq });
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(TextEntry { text, next_seq });
            }
        }
    }

    pub(crate) fn forget(&self, stream_id: &StreamId) {
        self.entries.remove(stream_id);
    }
}

/// Accumulated text for a stream, rebuilding from the raw log when the
/// index has not seen all persisted chunks.
pub(crate) async fn text_so_far<C: ChunkStore>(
    inner: &EngineInner<C>,
    stream_id: &StreamId,
) -> EngineResult<String> {
    let meta = inner
        .store
        .stream_meta(stream_id)
        .await?
        .ok_or_else(|| EngineError::StreamNotFound(stream_id.clone()))?;

    let (mut text, mut next) = inner
        .text
        .snapshot(stream_id)
        .unwrap_or_else(|| (String::new(), 0));

    if next >= meta.next_seq {
        return Ok(text);
    }

    while next < meta.next_seq {
        let chunks = inner
            .store
            .read_range(stream_id, next, inner.config.replay_batch_size)
            .await?;
        if chunks.is_empty() {
            break;
        }
        for chunk in chunks {
            if let Some(delta) = extract_text_delta(&chunk.payload) {
                text.push_str(&delta);
            }
            next = chunk.seq + 1;
        }
    }

    inner.text.store_rebuilt(stream_id, text.clone(), next);
    Ok(text)
}
