//! Scheduled retention sweep.

use std::sync::Arc;
use std::time::Duration;

use restream_store::ChunkStore;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::engine::EngineInner;

/// Spawn the background sweep task. Does nothing when retention is disabled.
pub(crate) fn spawn_sweeper<C: ChunkStore>(inner: &Arc<EngineInner<C>>) {
    let Some(max_age) = inner.config.retention.max_age else {
        debug!("retention disabled, not spawning a sweeper");
        return;
    };
    let sweep_interval = inner.config.retention.sweep_interval;
    let task_inner = inner.clone();
    let shutdown = inner.shutdown.clone();

    inner.tasks.spawn(async move {
        let mut ticker = interval(sweep_interval);
        // The first tick completes immediately; a fresh engine has nothing
        // to sweep yet.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => sweep(&task_inner, max_age).await,
                () = shutdown.cancelled() => {
                    debug!("retention sweeper stopped");
                    return;
                }
            }
        }
    });
}

async fn sweep<C: ChunkStore>(inner: &Arc<EngineInner<C>>, max_age: Duration) {
    match inner.store.delete_older_than(max_age).await {
        Ok(removed) => {
            if !removed.is_empty() {
                info!("retention removed {} expired streams", removed.len());
            }
            // Derived state for deleted streams goes too.
            for stream_id in &removed {
                inner.registry.forget(stream_id);
                inner.text.forget(stream_id);
            }
        }
        Err(error) => warn!("retention sweep failed: {error}"),
    }
}
