use crate::daemon::broadcast::Broadcaster;
use crate::daemon::connections::{ConnectionRegistry, OutlierKey};
use fornax_core::channel::Channel;
use fornax_core::feed::FeedEvent;
use fornax_core::sample::{Sample, SamplePayload};
use fornax_core::status::DeviceStatus;
use fornax_storage::EventStore;
use log::{debug, warn};
use std::sync::Arc;

/// One control-limit violation found in a sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub failure_type: String,
    pub key: OutlierKey,
}

/// Pure evaluation against the limit snapshot carried by the sample. A
/// channel with any unconfigured bound has no opinion and is skipped.
pub fn violations(sample: &Sample) -> Vec<Violation> {
    match &sample.payload {
        SamplePayload::Oven { temperature } => {
            let limits = sample.limits_for(Channel::Temperature);
            if limits.is_configured() && limits.violated_by(*temperature) {
                vec![Violation {
                    failure_type: Channel::Temperature.failure_label(),
                    key: OutlierKey::Oven,
                }]
            } else {
                Vec::new()
            }
        }
        SamplePayload::Board { board_id, channels } => Channel::BOARD
            .into_iter()
            .filter_map(|channel| {
                let value = channels.get(channel)?;
                let limits = sample.limits_for(channel);
                if limits.is_configured() && limits.violated_by(value) {
                    Some(Violation {
                        failure_type: channel.failure_label(),
                        key: OutlierKey::Board {
                            board_id: board_id.clone(),
                            channel,
                        },
                    })
                } else {
                    None
                }
            })
            .collect(),
    }
}

/// Turns limit violations into rate-limited warning broadcasts. Outliers
/// are only meaningful within a run: samples from devices that are not
/// currently Active are skipped entirely.
pub struct OutlierEvaluator {
    store: Arc<dyn EventStore>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
}

impl OutlierEvaluator {
    pub fn new(
        store: Arc<dyn EventStore>,
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            store,
            registry,
            broadcaster,
        }
    }

    pub fn evaluate(&self, sample: &Sample) {
        let device = sample.device_id.as_str();
        let found = violations(sample);
        if found.is_empty() {
            return;
        }

        let enabled = match self.store.load_warning_settings(device) {
            Ok(settings) => settings.warnings_enabled,
            Err(e) => {
                warn!("failed to load warning settings for '{}': {e:#}", device);
                true
            }
        };

        self.registry.with_session(device, |session| {
            if session.status != DeviceStatus::Active {
                debug!("skipping outlier evaluation for inactive '{}'", device);
                return;
            }
            for violation in &found {
                session.note_outlier(violation.key.clone());
            }
            if !enabled {
                debug!("warnings disabled for '{}', suppressing", device);
                return;
            }
            for violation in &found {
                session.tracker.record(&violation.failure_type);
                match self.store.load_warning_settings(device) {
                    Ok(mut settings) => {
                        settings.failure_tracker = session.tracker.clone();
                        if let Err(e) = self.store.save_warning_settings(device, &settings) {
                            warn!("failed to persist tracker for '{}': {e:#}", device);
                        }
                    }
                    Err(e) => warn!("failed to load warning settings for '{}': {e:#}", device),
                }
                self.broadcaster.publish(FeedEvent::Warning {
                    device_id: device.to_string(),
                    failure_type: violation.failure_type.clone(),
                    failure_tracker: session.tracker.clone(),
                });
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::runs::RunTracker;
    use fornax_core::channel::ChannelValues;
    use fornax_core::device::{ChannelLimits, DeviceConfig, LimitMap};
    use fornax_core::sample::{RecordKind, WireSample};
    use fornax_core::warning::WarningSettings;
    use fornax_storage::memory::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<Broadcaster>,
        evaluator: OutlierEvaluator,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let broadcaster = Arc::new(Broadcaster::new(64));
        let registry = Arc::new(ConnectionRegistry::new(
            store.clone() as Arc<dyn EventStore>,
            broadcaster.clone(),
        ));
        let evaluator = OutlierEvaluator::new(
            store.clone() as Arc<dyn EventStore>,
            registry.clone(),
            broadcaster.clone(),
        );
        Fixture {
            store,
            registry,
            broadcaster,
            evaluator,
        }
    }

    fn gollum_config() -> DeviceConfig {
        DeviceConfig {
            name: "Gollum".into(),
            category: "reflow".into(),
            board_count: 2,
            limits: LimitMap::from([
                (Channel::Temperature, ChannelLimits::new(145.0, 255.0)),
                (Channel::P1, ChannelLimits::new(50.0, 100.0)),
            ]),
        }
    }

    fn oven_sample(temperature: f64) -> Sample {
        let wire = WireSample {
            device_id: "Gollum".into(),
            timestamp: Some("2024-06-25T10:00:00.000Z".into()),
            record_kind: RecordKind::Oven,
            board_id: None,
            channel_values: ChannelValues {
                temperature: Some(temperature),
                ..ChannelValues::default()
            },
        };
        Sample::enrich(&wire, Some(&gollum_config())).expect("valid sample")
    }

    fn board_sample(board_id: &str, p1: f64) -> Sample {
        let wire = WireSample {
            device_id: "Gollum".into(),
            timestamp: Some("2024-06-25T10:00:00.000Z".into()),
            record_kind: RecordKind::Board,
            board_id: Some(board_id.into()),
            channel_values: ChannelValues {
                p1: Some(p1),
                ..ChannelValues::default()
            },
        };
        Sample::enrich(&wire, Some(&gollum_config())).expect("valid sample")
    }

    fn activate(fx: &Fixture) {
        let runs = RunTracker::new(fx.store.clone() as Arc<dyn EventStore>);
        fx.registry.identify("Gollum");
        fx.registry.activate("Gollum", &runs);
    }

    #[test]
    fn in_range_sample_finds_no_violations() {
        assert!(violations(&oven_sample(200.0)).is_empty());
        assert!(violations(&board_sample("3", 75.0)).is_empty());
    }

    #[test]
    fn out_of_range_board_channel_names_its_failure_type() {
        let found = violations(&board_sample("3", 150.0));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].failure_type, "p1 Out of Range");
        assert_eq!(
            found[0].key,
            OutlierKey::Board {
                board_id: "3".into(),
                channel: Channel::P1
            }
        );
    }

    #[test]
    fn active_device_out_of_range_raises_one_warning() {
        let fx = fixture();
        activate(&fx);
        let mut rx = fx.broadcaster.subscribe();

        fx.evaluator.evaluate(&oven_sample(260.0));

        let tracker = fx
            .registry
            .with_session("Gollum", |s| s.tracker.clone())
            .expect("session exists");
        assert_eq!(tracker.count, 1);
        assert_eq!(tracker.failures, vec!["Temperature Out of Range"]);

        // Subscribed after activation, so the warning is the first event.
        let event = rx.try_recv().expect("warning was broadcast");
        match &*event {
            FeedEvent::Warning {
                failure_type,
                failure_tracker,
                ..
            } => {
                assert_eq!(failure_type, "Temperature Out of Range");
                assert_eq!(failure_tracker.count, 1);
            }
            other => panic!("expected warning, got {other:?}"),
        }
    }

    #[test]
    fn repeated_failures_increment_count_without_duplicating_labels() {
        let fx = fixture();
        activate(&fx);

        fx.evaluator.evaluate(&board_sample("3", 150.0));
        fx.evaluator.evaluate(&board_sample("3", 160.0));

        let tracker = fx
            .registry
            .with_session("Gollum", |s| s.tracker.clone())
            .expect("session exists");
        assert_eq!(tracker.count, 2);
        assert_eq!(tracker.failures, vec!["p1 Out of Range"]);

        let persisted = fx
            .store
            .load_warning_settings("Gollum")
            .expect("settings readable");
        assert_eq!(persisted.failure_tracker, tracker);
    }

    #[test]
    fn disabled_warnings_suppress_tracker_and_broadcast() {
        let fx = fixture();
        activate(&fx);
        let settings = WarningSettings {
            warnings_enabled: false,
            ..WarningSettings::default()
        };
        fx.store
            .save_warning_settings("Gollum", &settings)
            .expect("save settings");

        let mut rx = fx.broadcaster.subscribe();
        fx.evaluator.evaluate(&oven_sample(260.0));

        let tracker = fx
            .registry
            .with_session("Gollum", |s| s.tracker.clone())
            .expect("session exists");
        assert_eq!(tracker.count, 0);
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn inactive_devices_are_never_evaluated() {
        let fx = fixture();
        fx.registry.identify("Gollum"); // Idle, no run open

        fx.evaluator.evaluate(&oven_sample(260.0));

        let tracker = fx
            .registry
            .with_session("Gollum", |s| s.tracker.clone())
            .expect("session exists");
        assert_eq!(tracker.count, 0);
    }

    #[test]
    fn unconfigured_channels_are_skipped() {
        // vt carries a value but the registry has no vt limits, so the
        // enriched sample has no snapshot for it.
        let wire = WireSample {
            device_id: "Gollum".into(),
            timestamp: Some("2024-06-25T10:00:00.000Z".into()),
            record_kind: RecordKind::Board,
            board_id: Some("3".into()),
            channel_values: ChannelValues {
                vt: Some(9999.0),
                ..ChannelValues::default()
            },
        };
        let sample = Sample::enrich(&wire, Some(&gollum_config())).expect("valid sample");
        assert!(violations(&sample).is_empty());
    }
}
