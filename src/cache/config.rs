//! Query cache configuration.
//!
//! Controls entry eviction, the event journal and real-time streams via the
//! `[cache]` section of `murmur.toml`.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_KEEP_UNUSED_FOR_SECS: u64 = 60;
const DEFAULT_EVENT_QUEUE_LIMIT: usize = 256;

/// Query cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Grace period (seconds) an entry survives with zero subscribers.
    pub keep_unused_for_secs: u64,
    /// Maximum pending events in the cache event journal.
    pub event_queue_limit: usize,
    /// Open push streams for real-time endpoints.
    pub realtime_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            keep_unused_for_secs: DEFAULT_KEEP_UNUSED_FOR_SECS,
            event_queue_limit: DEFAULT_EVENT_QUEUE_LIMIT,
            realtime_enabled: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            keep_unused_for_secs: settings.keep_unused_for.as_secs(),
            event_queue_limit: settings.event_queue_limit.get(),
            realtime_enabled: settings.realtime_enabled,
        }
    }
}

impl CacheConfig {
    pub fn keep_unused_for(&self) -> Duration {
        Duration::from_secs(self.keep_unused_for_secs)
    }

    /// Journal capacity, clamped to at least one slot.
    pub fn event_queue_limit_non_zero(&self) -> usize {
        self.event_queue_limit.max(1)
    }
}
