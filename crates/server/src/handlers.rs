//! Route handlers for the stream API.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{Json, Response};
use bytes::Bytes;
use restream_engine::{ChunkStore, StreamFrame, StreamId, StreamReading, StreamStatus};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::connector::UpstreamConnector;
use crate::error::ApiError;
use crate::router::ApiContext;
use crate::wire::WireRecord;

/// Query parameters for resume requests.
#[derive(Deserialize)]
pub(crate) struct ResumeQuery {
    from_seq: Option<String>,
}

impl ResumeQuery {
    fn from_seq(&self) -> Result<u64, ApiError> {
        match &self.from_seq {
            None => Ok(0),
            Some(raw) => raw
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("invalid from_seq: {raw}"))),
        }
    }
}

/// `POST /v1/streams`: produce with a server-assigned id.
pub(crate) async fn produce_handler<C, U>(
    State(ctx): State<ApiContext<C, U>>,
    body: Bytes,
) -> Result<Response, ApiError>
where
    C: ChunkStore,
    U: UpstreamConnector,
{
    let stream_id = StreamId::from(Uuid::new_v4().to_string());
    produce_stream(ctx, stream_id, body).await
}

/// `POST /v1/streams/{stream_id}`: produce with a caller-chosen id.
pub(crate) async fn produce_with_id_handler<C, U>(
    Path(stream_id): Path<String>,
    State(ctx): State<ApiContext<C, U>>,
    body: Bytes,
) -> Result<Response, ApiError>
where
    C: ChunkStore,
    U: UpstreamConnector,
{
    produce_stream(ctx, StreamId::from(stream_id), body).await
}

async fn produce_stream<C, U>(
    ctx: ApiContext<C, U>,
    stream_id: StreamId,
    request: Bytes,
) -> Result<Response, ApiError>
where
    C: ChunkStore,
    U: UpstreamConnector,
{
    let source = ctx
        .connector
        .connect(&stream_id, request)
        .await
        .map_err(ApiError::Connector)?;

    let outcome = ctx.engine.produce(&stream_id, source).await?;
    if outcome.started {
        info!("producing stream {stream_id} from seq {}", outcome.next_seq);
    } else {
        info!("joining stream {stream_id} at seq {}", outcome.next_seq);
    }
    stream_response(&stream_id, outcome.next_seq, outcome.reading)
}

/// `GET /v1/streams/{stream_id}?from_seq=N`: replay then live tail.
pub(crate) async fn resume_handler<C, U>(
    Path(stream_id): Path<String>,
    Query(query): Query<ResumeQuery>,
    State(ctx): State<ApiContext<C, U>>,
) -> Result<Response, ApiError>
where
    C: ChunkStore,
    U: UpstreamConnector,
{
    let from_seq = query.from_seq()?;
    let stream_id = StreamId::from(stream_id);
    let reading = ctx.engine.attach(&stream_id, from_seq).await?;

    // Best effort: a stream admitted but not yet persisted has no meta row.
    let next_seq = ctx
        .engine
        .status(&stream_id)
        .await
        .map_or(0, |status| status.seq);
    stream_response(&stream_id, next_seq, reading)
}

/// `POST /v1/streams/{stream_id}/cancel`: idempotent cancel.
pub(crate) async fn cancel_handler<C, U>(
    Path(stream_id): Path<String>,
    State(ctx): State<ApiContext<C, U>>,
) -> Result<Json<StreamStatus>, ApiError>
where
    C: ChunkStore,
    U: UpstreamConnector,
{
    let status = ctx.engine.cancel(&StreamId::from(stream_id)).await?;
    Ok(Json(status))
}

/// `GET /v1/streams/{stream_id}/status`: cheap poll.
pub(crate) async fn status_handler<C, U>(
    Path(stream_id): Path<String>,
    State(ctx): State<ApiContext<C, U>>,
) -> Result<Json<StreamStatus>, ApiError>
where
    C: ChunkStore,
    U: UpstreamConnector,
{
    let status = ctx.engine.status(&StreamId::from(stream_id)).await?;
    Ok(Json(status))
}

/// `GET /v1/streams/{stream_id}/text`: accumulated text so far.
pub(crate) async fn text_handler<C, U>(
    Path(stream_id): Path<String>,
    State(ctx): State<ApiContext<C, U>>,
) -> Result<String, ApiError>
where
    C: ChunkStore,
    U: UpstreamConnector,
{
    Ok(ctx.engine.text_so_far(&StreamId::from(stream_id)).await?)
}

/// NDJSON body over the reading, with the resumability marker headers.
fn stream_response(
    stream_id: &StreamId,
    next_seq: u64,
    reading: StreamReading,
) -> Result<Response, ApiError> {
    let body = async_stream::stream! {
        let mut reading = reading;
        while let Some(frame) = reading.next_frame().await {
            let last = matches!(frame, StreamFrame::End { .. });
            match WireRecord::from_frame(frame).encode_line() {
                Ok(line) => yield Ok::<Bytes, std::convert::Infallible>(line),
                Err(error) => {
                    warn!("dropping unencodable wire record: {error}");
                    break;
                }
            }
            if last {
                break;
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header("x-stream-id", stream_id.as_str())
        .header("x-next-seq", next_seq.to_string())
        .body(Body::from_stream(body))
        .map_err(|error| ApiError::BadRequest(format!("stream id unusable in headers: {error}")))
}
