use crate::channel::{Channel, ChannelValues};
use crate::device::{ChannelLimits, DeviceConfig, LimitMap};
use crate::timefmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Construction-time rejection of malformed samples. One bad sample is a
/// producer problem, never a pipeline problem.
#[derive(Debug, Error, PartialEq)]
pub enum SampleError {
    #[error("oven record for '{device}' is missing a temperature value")]
    MissingTemperature { device: String },
    #[error("board record for '{device}' is missing a board id")]
    MissingBoardId { device: String },
    #[error("unparseable timestamp '{raw}' for '{device}'")]
    BadTimestamp { device: String, raw: String },
}

/// Record kind as declared on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Oven,
    Board,
}

/// Raw inbound sample shape, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSample {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub record_kind: RecordKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<String>,
    #[serde(default)]
    pub channel_values: ChannelValues,
}

/// Validated payload, carrying only the fields legal for its record kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "recordKind")]
pub enum SamplePayload {
    Oven {
        temperature: f64,
    },
    Board {
        #[serde(rename = "boardId")]
        board_id: String,
        channels: ChannelValues,
    },
}

impl SamplePayload {
    /// Decide the record kind at construction. An oven record requires a
    /// temperature; a board record requires a board id. Board channels are
    /// sparse and individually optional.
    pub fn from_wire(wire: &WireSample) -> Result<Self, SampleError> {
        match wire.record_kind {
            RecordKind::Oven => {
                let temperature = wire.channel_values.temperature.ok_or_else(|| {
                    SampleError::MissingTemperature {
                        device: wire.device_id.clone(),
                    }
                })?;
                Ok(SamplePayload::Oven { temperature })
            }
            RecordKind::Board => {
                let board_id = wire
                    .board_id
                    .clone()
                    .ok_or_else(|| SampleError::MissingBoardId {
                        device: wire.device_id.clone(),
                    })?;
                Ok(SamplePayload::Board {
                    board_id,
                    channels: wire.channel_values.clone(),
                })
            }
        }
    }

    /// Channels carrying a value in this payload, in schema order.
    pub fn populated(&self) -> Vec<(Channel, f64)> {
        match self {
            SamplePayload::Oven { temperature } => vec![(Channel::Temperature, *temperature)],
            SamplePayload::Board { channels, .. } => channels.present().collect(),
        }
    }
}

/// An enriched, persisted measurement event. The limit snapshot is captured
/// at ingestion time so historical queries reproduce the bounds in effect
/// when the event occurred, independent of later reconfiguration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub device_id: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub payload: SamplePayload,
    #[serde(default, skip_serializing_if = "LimitMap::is_empty")]
    pub limits: LimitMap,
}

impl Sample {
    /// Enrich a wire sample: resolve its stamp (client-supplied when
    /// parseable and present, else server time) and snapshot the currently
    /// configured limits for every populated channel.
    pub fn enrich(wire: &WireSample, config: Option<&DeviceConfig>) -> Result<Self, SampleError> {
        let payload = SamplePayload::from_wire(wire)?;
        let timestamp = match &wire.timestamp {
            Some(raw) => {
                let parsed =
                    timefmt::parse_client(raw).ok_or_else(|| SampleError::BadTimestamp {
                        device: wire.device_id.clone(),
                        raw: raw.clone(),
                    })?;
                timefmt::format_stamp(parsed)
            }
            None => timefmt::now_stamp(),
        };

        let mut limits = LimitMap::new();
        if let Some(config) = config {
            for (channel, _) in payload.populated() {
                let channel_limits = config.limits_for(channel);
                if channel_limits != ChannelLimits::default() {
                    limits.insert(channel, channel_limits);
                }
            }
        }

        Ok(Sample {
            device_id: wire.device_id.clone(),
            timestamp,
            payload,
            limits,
        })
    }

    /// Snapshot bounds for one channel; empty when nothing was configured
    /// at ingestion time.
    pub fn limits_for(&self, channel: Channel) -> ChannelLimits {
        self.limits.get(&channel).copied().unwrap_or_default()
    }
}
