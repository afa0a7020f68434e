//! Upstream connector contract.

use async_trait::async_trait;
use bytes::Bytes;
use restream_engine::{StreamId, UpstreamSource};

/// Error opening an upstream source
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ConnectorError {
    message: String,
}

impl ConnectorError {
    /// Create a new connector error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&str> for ConnectorError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ConnectorError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Opens upstream sources for produce requests.
///
/// The request body is handed over verbatim; what it means (a prompt, a
/// provider payload) is the connector's business. Connectors should be lazy:
/// a produce request for a stream that is already producing joins it as a
/// reader and drops the returned source unpulled, so the expensive upstream
/// call must not happen before the first `next_chunk`.
#[async_trait]
pub trait UpstreamConnector: Clone + Send + Sync + 'static {
    /// The source type this connector opens
    type Source: UpstreamSource;

    /// Open an upstream source for one produce request
    async fn connect(&self, stream_id: &StreamId, request: Bytes)
    -> Result<Self::Source, ConnectorError>;
}
