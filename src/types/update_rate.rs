//! Update rate control for display streams

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Update rate for display frame streams
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UpdateRate {
    /// Every frame the device sends
    Native,

    /// Throttled to maximum Hz
    /// If the requested rate is zero or exceeds the device's rate, Native is used
    Max(u32),
}

impl Default for UpdateRate {
    fn default() -> Self {
        UpdateRate::Max(30)
    }
}

impl UpdateRate {
    /// Normalize rate against the source frequency
    pub fn normalize(self, source_hz: f64) -> Self {
        match self {
            UpdateRate::Native => UpdateRate::Native,
            UpdateRate::Max(0) => UpdateRate::Native,
            UpdateRate::Max(hz) if hz as f64 >= source_hz => UpdateRate::Native,
            UpdateRate::Max(hz) => UpdateRate::Max(hz),
        }
    }

    /// Get throttle interval if needed
    pub fn throttle_interval(self, source_hz: f64) -> Option<Duration> {
        match self.normalize(source_hz) {
            UpdateRate::Native => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}
