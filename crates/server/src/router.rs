//! Route assembly and shared request state.

use axum::Router;
use axum::routing::{get, post};
use restream_engine::{ChunkStore, StreamEngine};

use crate::connector::UpstreamConnector;
use crate::handlers::{
    cancel_handler, produce_handler, produce_with_id_handler, resume_handler, status_handler,
    text_handler,
};

/// State shared by every API route.
#[derive(Clone)]
pub struct ApiContext<C, U>
where
    C: ChunkStore,
    U: UpstreamConnector,
{
    /// The stream engine serving all routes
    pub engine: StreamEngine<C>,
    /// Opens upstream sources for produce requests
    pub connector: U,
}

/// Build the versioned API router over the given context.
pub fn api_router<C, U>(ctx: ApiContext<C, U>) -> Router
where
    C: ChunkStore,
    U: UpstreamConnector,
{
    Router::new()
        .route("/v1/streams", post(produce_handler).with_state(ctx.clone()))
        .route(
            "/v1/streams/{stream_id}",
            get(resume_handler)
                .post(produce_with_id_handler)
                .with_state(ctx.clone()),
        )
        .route(
            "/v1/streams/{stream_id}/cancel",
            post(cancel_handler).with_state(ctx.clone()),
        )
        .route(
            "/v1/streams/{stream_id}/status",
            get(status_handler).with_state(ctx.clone()),
        )
        .route(
            "/v1/streams/{stream_id}/text",
            get(text_handler).with_state(ctx),
        )
}
