use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for [`crate::NextEditProvider`]. Durations are in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NextEditConfig {
    /// Minimum delay before returning a cached or recently shown edit, so
    /// that callers see the same cadence whether or not the backend was hit.
    pub cache_delay_ms: u64,
    pub rebased_cache_delay_ms: u64,
    /// Delay between creating a request and calling the backend.
    pub debounce_ms: u64,
    pub cancellation_grace_period_ms: u64,
    pub fetch_timeout_ms: u64,
    /// Join a pending request even when the document moved on since it was
    /// issued, keeping it alive as a live dependent.
    pub reuse_stale_requests: bool,
    /// Rejecting an edit also poisons every cached edit of the same request.
    pub cache_tracks_rejections: bool,
    pub rejection_capacity: usize,
    pub recently_shown_capacity: usize,
    pub cache_capacity_per_document: usize,
    pub history: HistoryConfig,
}

impl Default for NextEditConfig {
    fn default() -> Self {
        Self {
            cache_delay_ms: 50,
            rebased_cache_delay_ms: 50,
            debounce_ms: 0,
            cancellation_grace_period_ms: 1000,
            fetch_timeout_ms: 10_000,
            reuse_stale_requests: false,
            cache_tracks_rejections: false,
            rejection_capacity: 20,
            recently_shown_capacity: 10,
            cache_capacity_per_document: 50,
            history: HistoryConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_events: usize,
    /// Consecutive edits to one document closer together than this are
    /// recorded as a single event.
    pub grouping_interval_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_events: 16,
            grouping_interval_ms: 1000,
        }
    }
}

impl HistoryConfig {
    pub fn grouping_interval(&self) -> Duration {
        Duration::from_millis(self.grouping_interval_ms)
    }
}

impl NextEditConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid next edit configuration")
    }

    pub fn cache_delay(&self) -> Duration {
        Duration::from_millis(self.cache_delay_ms)
    }

    pub fn rebased_cache_delay(&self) -> Duration {
        Duration::from_millis(self.rebased_cache_delay_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn cancellation_grace_period(&self) -> Duration {
        Duration::from_millis(self.cancellation_grace_period_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}
