//! Configuration types for the reconciler and its janitor.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Oldest records beyond this many URLs per tab are evicted by the sweep.
    pub max_urls_per_tab: usize,
    pub record_ttl_ms: u64,
    /// Records still loading after this long are forced into the failed state.
    pub loading_deadline_ms: u64,
    pub sweep_interval_ms: u64,
    pub notification_buffer: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_urls_per_tab: 10,
            record_ttl_ms: 30 * 60 * 1000,
            loading_deadline_ms: 15_000,
            sweep_interval_ms: 60_000,
            notification_buffer: 64,
        }
    }
}
