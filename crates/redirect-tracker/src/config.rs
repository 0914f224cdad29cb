//! Configuration types for the redirect tracker.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// A finalized chain is only reused for a later navigation check inside this window.
    pub recency_window_ms: u64,
    /// Accumulating chains idle for longer than this are dropped by the sweep.
    pub stale_chain_ms: u64,
    pub buffer: usize,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            recency_window_ms: 30_000,
            stale_chain_ms: 120_000,
            buffer: 64,
        }
    }
}
