//! Configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning knobs for a [`WatchHub`](crate::watcher::WatchHub).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// How long to wait after a rename before re-checking the original path.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Buffered events per `PathWatcher` broadcast channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_settle_delay_ms() -> u64 {
    100
}

fn default_channel_capacity() -> usize {
    64
}

impl WatchConfig {
    /// The rename grace window as a `Duration`.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}
