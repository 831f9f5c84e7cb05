use serde::{Deserialize, Serialize};

/// Lifecycle state of one device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    Idle,
    Active,
    Disconnected,
}

/// Broadcast payload for a lifecycle transition. The open run id is
/// deliberately not part of the payload; runs surface through the query
/// interface only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub device_id: String,
    pub status: DeviceStatus,
    pub timestamp: String,
}
