//! Reader sinks.
//!
//! Every attached reader is an opaque [`Sink`]: the attachment replays into
//! it with backpressure, the live fan-out writes into it without ever
//! suspending the producer, and exactly one close call ends it. Concrete
//! transports adapt to this trait at the boundary; [`ChannelSink`] is the
//! in-process implementation backed by a bounded channel.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::frame::{StreamFrame, StreamState};

/// Errors when writing to a reader sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The reader's buffer is full; it is lagging behind the stream
    #[error("reader channel full")]
    Full,
    /// The reader went away
    #[error("reader channel closed")]
    Closed,
}

/// Destination for one attached reader's frames.
///
/// `write` may suspend on the consumer's backpressure and is used on the
/// replay and backfill paths, which belong to the reader's own task.
/// `try_write` never suspends and is the only delivery the producer's
/// fan-out uses, so a stalled reader cannot stall the log.
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    /// Deliver one sequenced chunk, waiting for buffer space.
    async fn write(&self, seq: u64, payload: Bytes) -> Result<(), SinkError>;

    /// Deliver one sequenced chunk without blocking.
    fn try_write(&self, seq: u64, payload: Bytes) -> Result<(), SinkError>;

    /// End the reading cleanly, reporting the stream state at close time.
    fn close(&self, state: StreamState);

    /// End the reading with a stream-level error.
    fn close_with_error(&self, message: &str);

    /// End the reading, waiting for buffer space for the sentinel.
    ///
    /// Used on the attachment path, where the caller owns the reader's task
    /// and may suspend; the sentinel then reaches any reader still pulling.
    async fn close_wait(&self, state: StreamState, message: Option<String>);
}

/// Bounded-channel sink; the receiving half is a [`StreamReading`].
pub struct ChannelSink {
    tx: mpsc::Sender<StreamFrame>,
}

impl ChannelSink {
    /// Create a sink/reading pair with the given frame capacity
    pub fn channel(capacity: usize) -> (Self, StreamReading) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, StreamReading { rx })
    }
}

#[async_trait]
impl Sink for ChannelSink {
    async fn write(&self, seq: u64, payload: Bytes) -> Result<(), SinkError> {
        self.tx
            .send(StreamFrame::Chunk { seq, payload })
            .await
            .map_err(|_| SinkError::Closed)
    }

    fn try_write(&self, seq: u64, payload: Bytes) -> Result<(), SinkError> {
        self.tx
            .try_send(StreamFrame::Chunk { seq, payload })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SinkError::Full,
                mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
            })
    }

    fn close(&self, state: StreamState) {
        // Best effort: a reader that stopped pulling loses the sentinel but
        // still observes end-of-stream when the sender drops.
        let _ = self.tx.try_send(StreamFrame::End {
            state,
            message: None,
        });
    }

    fn close_with_error(&self, message: &str) {
        let _ = self.tx.try_send(StreamFrame::End {
            state: StreamState::Failed,
            message: Some(message.to_string()),
        });
    }

    async fn close_wait(&self, state: StreamState, message: Option<String>) {
        let _ = self.tx.send(StreamFrame::End { state, message }).await;
    }
}

/// Consumer handle for one attachment: pull frames until `None`.
pub struct StreamReading {
    rx: mpsc::Receiver<StreamFrame>,
}

impl StreamReading {
    /// Receive the next frame, or `None` once the reading is over
    pub async fn next_frame(&mut self) -> Option<StreamFrame> {
        self.rx.recv().await
    }

    /// Convert into a `Stream` of frames
    pub fn into_stream(self) -> ReceiverStream<StreamFrame> {
        ReceiverStream::new(self.rx)
    }
}

impl std::fmt::Debug for StreamReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReading").finish_non_exhaustive()
    }
}
