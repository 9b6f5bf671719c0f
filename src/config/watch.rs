use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use super::config_error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// Capacity of each watcher's queue. A watcher whose queue is full when
    /// an event arrives is disconnected with an overrun error.
    ///
    /// **Default**: 128
    #[serde(default = "default_watcher_buffer_size")]
    pub watcher_buffer_size: usize,

    /// Number of recent events retained for `start_revision` replay.
    /// Older start revisions are answered with a compacted error.
    ///
    /// **Default**: 1024
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Maximum concurrent watchers, 0 for unlimited
    #[serde(default)]
    pub max_watchers: usize,

    /// Pending registrations queued for the dispatcher
    #[serde(default = "default_registration_queue_size")]
    pub registration_queue_size: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            watcher_buffer_size: default_watcher_buffer_size(),
            history_capacity: default_history_capacity(),
            max_watchers: 0,
            registration_queue_size: default_registration_queue_size(),
        }
    }
}

impl WatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.watcher_buffer_size == 0 {
            return Err(config_error("watch.watcher_buffer_size must be greater than 0"));
        }

        if self.watcher_buffer_size > 10_000 {
            warn!(
                "watch.watcher_buffer_size ({}) is very large; every watcher preallocates its queue",
                self.watcher_buffer_size
            );
        }

        if self.registration_queue_size == 0 {
            return Err(config_error("watch.registration_queue_size must be greater than 0"));
        }

        if self.history_capacity == 0 {
            warn!("watch.history_capacity is 0: every start_revision in the past will be compacted");
        }

        Ok(())
    }
}

const fn default_watcher_buffer_size() -> usize {
    128
}

const fn default_history_capacity() -> usize {
    1024
}

const fn default_registration_queue_size() -> usize {
    1024
}
