//! HTTP surface for the resumable stream engine.
//!
//! Routes:
//! - `POST /v1/streams`: produce with a server-assigned id
//! - `POST /v1/streams/{stream_id}`: produce with a caller-chosen id, or
//!   join the stream already producing under that id
//! - `GET /v1/streams/{stream_id}?from_seq=N`: resume, replay then live tail
//! - `POST /v1/streams/{stream_id}/cancel`: idempotent cancel
//! - `GET /v1/streams/{stream_id}/status`: cheap status poll
//! - `GET /v1/streams/{stream_id}/text`: accumulated text so far
//!
//! Stream bodies are newline-delimited JSON ([`WireRecord`]): chunk records
//! carrying base64 payloads, closed by one `end` record. The `x-stream-id`
//! and `x-next-seq` response headers carry the resumability marker.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod connector;
mod error;
mod handlers;
mod router;
mod server;
mod wire;

pub use connector::{ConnectorError, UpstreamConnector};
pub use error::{ApiError, ServerError};
pub use router::{ApiContext, api_router};
pub use server::RestreamServer;
pub use wire::WireRecord;
