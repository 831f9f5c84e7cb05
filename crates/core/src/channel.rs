use serde::{Deserialize, Serialize};

/// One measurable channel of an oven. `Temperature` is the oven-level
/// channel; the other eight belong to board-level records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Temperature,
    P1,
    P2,
    T1,
    T2,
    Vx,
    Vz,
    Ct,
    Vt,
}

impl Channel {
    /// The eight board sub-channels, in schema order.
    pub const BOARD: [Channel; 8] = [
        Channel::P1,
        Channel::P2,
        Channel::T1,
        Channel::T2,
        Channel::Vx,
        Channel::Vz,
        Channel::Ct,
        Channel::Vt,
    ];

    /// Wire/schema name of the channel.
    pub fn label(self) -> &'static str {
        match self {
            Channel::Temperature => "temperature",
            Channel::P1 => "p1",
            Channel::P2 => "p2",
            Channel::T1 => "t1",
            Channel::T2 => "t2",
            Channel::Vx => "vx",
            Channel::Vz => "vz",
            Channel::Ct => "ct",
            Channel::Vt => "vt",
        }
    }

    /// Failure-type label used in warning broadcasts.
    pub fn failure_label(self) -> String {
        match self {
            Channel::Temperature => "Temperature Out of Range".to_string(),
            other => format!("{} Out of Range", other.label()),
        }
    }
}

/// Sparse channel values carried by a sample. Absent channels are absent,
/// never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vx: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vz: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vt: Option<f64>,
}

impl ChannelValues {
    pub fn get(&self, channel: Channel) -> Option<f64> {
        match channel {
            Channel::Temperature => self.temperature,
            Channel::P1 => self.p1,
            Channel::P2 => self.p2,
            Channel::T1 => self.t1,
            Channel::T2 => self.t2,
            Channel::Vx => self.vx,
            Channel::Vz => self.vz,
            Channel::Ct => self.ct,
            Channel::Vt => self.vt,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }

    /// Iterate over populated channels in schema order.
    pub fn present(&self) -> impl Iterator<Item = (Channel, f64)> + '_ {
        let all = [
            Channel::Temperature,
            Channel::P1,
            Channel::P2,
            Channel::T1,
            Channel::T2,
            Channel::Vx,
            Channel::Vz,
            Channel::Ct,
            Channel::Vt,
        ];
        all.into_iter()
            .filter_map(|ch| self.get(ch).map(|v| (ch, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_channels_exclude_temperature() {
        assert!(!Channel::BOARD.contains(&Channel::Temperature));
        assert_eq!(Channel::BOARD.len(), 8);
    }

    #[test]
    fn failure_labels_match_schema_names() {
        assert_eq!(
            Channel::Temperature.failure_label(),
            "Temperature Out of Range"
        );
        assert_eq!(Channel::P1.failure_label(), "p1 Out of Range");
        assert_eq!(Channel::Vt.failure_label(), "vt Out of Range");
    }

    #[test]
    fn present_skips_absent_channels() {
        let values = ChannelValues {
            t1: Some(41.5),
            vt: Some(2.0),
            ..ChannelValues::default()
        };
        let present: Vec<_> = values.present().collect();
        assert_eq!(present, vec![(Channel::T1, 41.5), (Channel::Vt, 2.0)]);
    }
}
