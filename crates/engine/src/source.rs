//! Upstream source contract.

use async_trait::async_trait;
use bytes::Bytes;

/// Error reported by an upstream source
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct UpstreamError {
    message: String,
}

impl UpstreamError {
    /// Create a new upstream error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&str> for UpstreamError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for UpstreamError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// The start/read/end contract for one upstream generation.
///
/// The engine pulls chunks until `Ok(None)` (clean end) or an error
/// (terminal failure). Sources are consumed by exactly one producer task;
/// the engine never retries or restarts one.
#[async_trait]
pub trait UpstreamSource: Send + 'static {
    /// Pull the next chunk; `Ok(None)` means the upstream finished
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, UpstreamError>;
}
