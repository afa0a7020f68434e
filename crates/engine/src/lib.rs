//! Resumable multi-reader stream broadcast engine.
//!
//! One expensive upstream generation (an LLM response) becomes a durable,
//! sequence-numbered chunk log that any number of readers can replay from
//! any position and tail live, with exactly-once delivery per reader:
//!
//! - At most one producer task per stream id (single-flight); concurrent
//!   produce calls join the running stream as readers.
//! - Every chunk is persisted to the [`ChunkStore`](restream_store::ChunkStore)
//!   before it is broadcast, so a replay after a process restart reproduces
//!   exactly what live readers saw.
//! - Readers attach at any time, before or after the stream finishes, and
//!   the gap between replay and live registration is backfilled from the
//!   store with no duplicates.
//! - Cancellation is cooperative and preserves everything persisted up to
//!   the cancellation point; streams whose producer died unresolved stay
//!   observable and can be force-canceled.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod attach;
mod config;
mod engine;
mod error;
mod frame;
mod lifecycle;
mod producer;
mod registry;
mod retention;
mod sink;
mod source;
mod text_index;

pub use config::{EngineConfig, RetentionConfig};
pub use engine::StreamEngine;
pub use error::{EngineError, EngineResult};
pub use frame::{StreamFrame, StreamState};
pub use lifecycle::StreamStatus;
pub use producer::ProduceOutcome;
pub use sink::{ChannelSink, Sink, SinkError, StreamReading};
pub use source::{UpstreamError, UpstreamSource};

pub use restream_store::{ChunkStore, StreamId, TerminalState};
