//! Test helpers for engine integration tests.
//!
//! Scripted and hand-fed upstream sources, frame collection, and polling
//! helpers shared across the test files.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use restream_engine::{
    ChunkStore, StreamEngine, StreamFrame, StreamId, StreamReading, StreamState, UpstreamError,
    UpstreamSource,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Install a test subscriber once; later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// A stream id that cannot collide across concurrently running tests.
pub fn unique_stream_id(prefix: &str) -> StreamId {
    StreamId::from(format!("{prefix}-{}", Uuid::new_v4()))
}

/// Upstream source that yields scripted payloads, then ends or fails.
pub struct ScriptedUpstream {
    chunks: VecDeque<Bytes>,
    fail_with: Option<String>,
}

impl ScriptedUpstream {
    /// Yields the payloads in order, then ends cleanly.
    pub fn completing<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            fail_with: None,
        }
    }

    /// Yields the payloads in order, then reports an upstream error.
    pub fn failing<I, B>(chunks: I, message: &str) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            fail_with: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl UpstreamSource for ScriptedUpstream {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, UpstreamError> {
        match self.chunks.pop_front() {
            Some(chunk) => Ok(Some(chunk)),
            None => match self.fail_with.take() {
                Some(message) => Err(UpstreamError::new(message)),
                None => Ok(None),
            },
        }
    }
}

/// Upstream source fed one event at a time by the test.
pub struct PipedUpstream {
    rx: mpsc::UnboundedReceiver<Result<Option<Bytes>, UpstreamError>>,
}

/// Feeding half of a [`PipedUpstream`].
pub struct UpstreamFeed {
    tx: mpsc::UnboundedSender<Result<Option<Bytes>, UpstreamError>>,
}

impl PipedUpstream {
    pub fn new() -> (UpstreamFeed, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (UpstreamFeed { tx }, Self { rx })
    }
}

impl UpstreamFeed {
    // Sends are fire-and-forget: a source that was never pulled (a produce
    // call that lost the single-flight race) has already been dropped.
    pub fn chunk(&self, payload: impl Into<Bytes>) {
        let _ = self.tx.send(Ok(Some(payload.into())));
    }

    pub fn end(&self) {
        let _ = self.tx.send(Ok(None));
    }

    pub fn fail(&self, message: &str) {
        let _ = self.tx.send(Err(UpstreamError::new(message)));
    }
}

#[async_trait]
impl UpstreamSource for PipedUpstream {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, UpstreamError> {
        match self.rx.recv().await {
            Some(event) => event,
            // Feed dropped without an explicit end: treat as a clean end.
            None => Ok(None),
        }
    }
}

/// Everything one reading delivered.
#[derive(Debug)]
pub struct Collected {
    pub chunks: Vec<(u64, Bytes)>,
    /// The end sentinel, or `None` when the channel closed without one
    pub end: Option<(StreamState, Option<String>)>,
}

impl Collected {
    pub fn seqs(&self) -> Vec<u64> {
        self.chunks.iter().map(|(seq, _)| *seq).collect()
    }

    pub fn payloads(&self) -> Vec<Bytes> {
        self.chunks.iter().map(|(_, payload)| payload.clone()).collect()
    }

    pub fn end_state(&self) -> StreamState {
        self.end
            .as_ref()
            .expect("reading ended without a sentinel")
            .0
    }

    pub fn end_message(&self) -> Option<&str> {
        self.end
            .as_ref()
            .expect("reading ended without a sentinel")
            .1
            .as_deref()
    }
}

/// Pull frames until the end sentinel or channel close.
pub async fn collect(mut reading: StreamReading) -> Collected {
    let mut chunks = Vec::new();
    while let Some(frame) = reading.next_frame().await {
        match frame {
            StreamFrame::Chunk { seq, payload } => chunks.push((seq, payload)),
            StreamFrame::End { state, message } => {
                return Collected {
                    chunks,
                    end: Some((state, message)),
                };
            }
        }
    }
    Collected { chunks, end: None }
}

/// Poll status until the stream has persisted at least `seq` chunks.
pub async fn wait_for_seq<C: ChunkStore>(engine: &StreamEngine<C>, stream_id: &StreamId, seq: u64) {
    for _ in 0..400 {
        if let Ok(status) = engine.status(stream_id).await {
            if status.seq >= seq {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("stream {stream_id} never reached seq {seq}");
}

/// Poll status until the stream is terminal, returning the final state.
pub async fn wait_for_terminal<C: ChunkStore>(
    engine: &StreamEngine<C>,
    stream_id: &StreamId,
) -> StreamState {
    for _ in 0..400 {
        if let Ok(status) = engine.status(stream_id).await {
            if status.state != StreamState::Running {
                return status.state;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("stream {stream_id} never went terminal");
}
