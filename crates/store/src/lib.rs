//! Durable chunk log abstraction for resumable streams.
//!
//! A stream is an append-only sequence of chunks keyed by
//! `(stream id, sequence number)`. The chunk store is the single source of
//! truth that survives process restarts: everything a process keeps in memory
//! about a stream can be rebuilt from it. Backends implement [`ChunkStore`];
//! the contract deliberately stays small:
//!
//! - appends are idempotent on duplicate `(stream id, seq)` pairs
//! - range reads are finite and restartable, never live subscriptions
//! - the terminal state is written once, first writer wins
//! - retention only ever removes streams that are already terminal
#![warn(missing_docs)]
#![warn(clippy::all)]

mod chunk_store;
mod error;
mod types;

pub use chunk_store::ChunkStore;
pub use error::{StoreError, StoreResult};
pub use types::{AppendOutcome, Chunk, StreamId, StreamMeta, TerminalState};
