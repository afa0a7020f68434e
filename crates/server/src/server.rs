//! Bind/serve/shutdown loop.

use std::future::IntoFuture;
use std::net::SocketAddr;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::error::ServerError;

/// HTTP server for the stream API.
pub struct RestreamServer {
    listen_addr: SocketAddr,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl RestreamServer {
    /// Creates a new server for the given listen address.
    #[must_use]
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Bind and serve the router until shutdown.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// binding port 0.
    pub async fn start(&self, router: Router) -> Result<SocketAddr, ServerError> {
        if self.task_tracker.is_closed() {
            return Err(ServerError::AlreadyStarted);
        }

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(ServerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ServerError::Bind)?;
        info!("http server listening on {local_addr}");

        let shutdown_token = self.shutdown_token.clone();
        self.task_tracker.spawn(async move {
            tokio::select! {
                e = axum::serve(listener, router.into_make_service()).into_future() => {
                    info!("http server exited {e:?}");
                }
                () = shutdown_token.cancelled() => {}
            }
        });

        self.task_tracker.close();

        Ok(local_addr)
    }

    /// Stop serving and wait for the connection task to finish.
    pub async fn shutdown(&self) {
        info!("http server shutting down...");

        self.shutdown_token.cancel();
        self.task_tracker.wait().await;

        info!("http server shutdown");
    }
}
