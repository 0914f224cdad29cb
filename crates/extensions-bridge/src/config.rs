//! Deadlines applied to every request that crosses the message channel.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeTimeouts {
    /// Extraction round trip.
    pub request_ms: u64,
    /// Single link status check.
    pub status_check_ms: u64,
    /// Whole batch of link checks.
    pub batch_ms: u64,
}

impl Default for BridgeTimeouts {
    fn default() -> Self {
        Self {
            request_ms: 10_000,
            status_check_ms: 5_000,
            batch_ms: 60_000,
        }
    }
}

impl BridgeTimeouts {
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn status_check(&self) -> Duration {
        Duration::from_millis(self.status_check_ms)
    }

    pub fn batch(&self) -> Duration {
        Duration::from_millis(self.batch_ms)
    }
}
