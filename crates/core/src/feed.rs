use crate::device::DeviceConfig;
use crate::sample::Sample;
use crate::status::{DeviceStatus, StatusUpdate};
use crate::warning::FailureTracker;
use serde::{Deserialize, Serialize};

/// One event on the observer feed. Registry changes are passthrough from
/// the device-directory collaborator; everything else originates in the
/// ingestion core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FeedEvent {
    StatusUpdate {
        #[serde(rename = "deviceId")]
        device_id: String,
        status: DeviceStatus,
        timestamp: String,
    },
    NewSample {
        sample: Sample,
    },
    Warning {
        #[serde(rename = "deviceId")]
        device_id: String,
        #[serde(rename = "failureType")]
        failure_type: String,
        #[serde(rename = "failureTracker")]
        failure_tracker: FailureTracker,
    },
    NewDevice {
        device: DeviceConfig,
    },
    UpdateDevice {
        device: DeviceConfig,
    },
    DeleteDevice {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
}

impl FeedEvent {
    pub fn status(update: StatusUpdate) -> Self {
        FeedEvent::StatusUpdate {
            device_id: update.device_id,
            status: update.status,
            timestamp: update.timestamp,
        }
    }
}
