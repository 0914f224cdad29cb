//! Configuration types for the change detector.

use serde::{Deserialize, Serialize};

use crate::significance::SignificancePolicy;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub poll_interval_ms: u64,
    pub idle_check_delay_ms: u64,
    pub content_sample_len: usize,
    pub h2_limit: usize,
    pub policy: SignificancePolicy,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            idle_check_delay_ms: 1500,
            content_sample_len: 300,
            h2_limit: 5,
            policy: SignificancePolicy::Boolean,
        }
    }
}
