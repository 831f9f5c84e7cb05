use crate::channel::Channel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configured control limits for one channel. Each bound is independently
/// nullable; an absent bound means "no limit configured", not zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelLimits {
    #[serde(default)]
    pub upper: Option<f64>,
    #[serde(default)]
    pub lower: Option<f64>,
}

impl ChannelLimits {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self {
            upper: Some(upper),
            lower: Some(lower),
        }
    }

    /// Evaluation requires both bounds; a half-configured channel has no
    /// opinion.
    pub fn is_configured(&self) -> bool {
        self.upper.is_some() && self.lower.is_some()
    }

    /// True when the value lies strictly outside [lower, upper]. Boundary
    /// values pass. Unconfigured limits never flag a value.
    pub fn violated_by(&self, value: f64) -> bool {
        match (self.lower, self.upper) {
            (Some(lower), Some(upper)) => value < lower || value > upper,
            _ => false,
        }
    }
}

pub type LimitMap = BTreeMap<Channel, ChannelLimits>;

/// Registry entry for one oven. Owned by the device directory; the core
/// reads it to snapshot limits at ingestion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub name: String,
    pub category: String,
    pub board_count: u32,
    #[serde(default)]
    pub limits: LimitMap,
}

impl DeviceConfig {
    /// Limits configured for a channel, empty when nothing is configured.
    pub fn limits_for(&self, channel: Channel) -> ChannelLimits {
        self.limits.get(&channel).copied().unwrap_or_default()
    }
}
