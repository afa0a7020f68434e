//! Engine configuration.

use std::time::Duration;

/// Configuration for the stream engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Frames buffered per reader channel; a live reader further behind than
    /// this counts as lagging and is dropped
    pub reader_channel_capacity: usize,
    /// Chunks fetched per store read while replaying or backfilling
    pub replay_batch_size: usize,
    /// Live chunks buffered for a reader that is still catching up before it
    /// is dropped
    pub catchup_buffer_limit: usize,
    /// Retention sweep settings
    pub retention: RetentionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reader_channel_capacity: 256,
            replay_batch_size: 100,
            catchup_buffer_limit: 1024,
            retention: RetentionConfig::default(),
        }
    }
}

/// Retention sweep configuration
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Terminal streams older than this are deleted by the sweep; `None`
    /// disables retention entirely
    pub max_age: Option<Duration>,
    /// Interval between sweeps
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age: Some(Duration::from_secs(24 * 60 * 60)),
            sweep_interval: Duration::from_secs(60),
        }
    }
}
