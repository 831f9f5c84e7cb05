use fornax_core::channel::{Channel, ChannelValues};
use fornax_core::device::{ChannelLimits, DeviceConfig, LimitMap};
use fornax_core::sample::{RecordKind, Sample, WireSample};
use fornax_core::status::{DeviceStatus, StatusUpdate};
use fornax_core::warning::WarningSettings;
use fornax_storage::sqlite3::SqliteStore;
use fornax_storage::{DeviceDirectory, EventStore};

fn oven_sample(device: &str, stamp: &str, temperature: f64) -> Sample {
    let wire = WireSample {
        device_id: device.to_string(),
        timestamp: Some(stamp.to_string()),
        record_kind: RecordKind::Oven,
        board_id: None,
        channel_values: ChannelValues {
            temperature: Some(temperature),
            ..ChannelValues::default()
        },
    };
    Sample::enrich(&wire, None).expect("valid sample")
}

fn gollum_config() -> DeviceConfig {
    DeviceConfig {
        name: "Gollum".into(),
        category: "reflow".into(),
        board_count: 2,
        limits: LimitMap::from([(Channel::Temperature, ChannelLimits::new(145.0, 255.0))]),
    }
}

#[test]
fn unscoped_log_and_run_partition_are_independent() {
    let store = SqliteStore::open_in_memory().expect("open store");
    let early = oven_sample("Gollum", "2024-06-25T10:00:00.000Z", 150.0);
    let late = oven_sample("Gollum", "2024-06-25T10:00:01.000Z", 151.0);

    store.append("Gollum", &early).expect("append");
    store.append("Gollum", &late).expect("append");
    store.append_to_run("Gollum", 1, &late).expect("run append");

    let all = store.find_range("Gollum", None, None).expect("find all");
    assert_eq!(all.len(), 2);

    let run = store.find_by_run("Gollum", 1).expect("find run");
    assert_eq!(run, vec![late]);
    assert!(store.find_by_run("Gollum", 2).expect("empty run").is_empty());
}

#[test]
fn max_run_id_defaults_to_zero_and_tracks_appends() {
    let store = SqliteStore::open_in_memory().expect("open store");
    assert_eq!(store.max_run_id("Gollum").expect("empty"), 0);

    let sample = oven_sample("Gollum", "2024-06-25T10:00:00.000Z", 150.0);
    store.append_to_run("Gollum", 1, &sample).expect("run 1");
    store.append_to_run("Gollum", 7, &sample).expect("run 7");
    store.append_to_run("Smaug", 9, &sample).expect("other device");

    assert_eq!(store.max_run_id("Gollum").expect("max"), 7);
    assert_eq!(store.max_run_id("Smaug").expect("max"), 9);
    assert_eq!(store.max_run_id("Shelob").expect("unknown"), 0);
}

#[test]
fn find_range_honors_inclusive_stamp_bounds() {
    let store = SqliteStore::open_in_memory().expect("open store");
    let stamps = [
        "2024-06-25T10:00:00.000Z",
        "2024-06-25T10:00:01.000Z",
        "2024-06-25T10:00:02.000Z",
    ];
    for (i, stamp) in stamps.iter().enumerate() {
        store
            .append("Gollum", &oven_sample("Gollum", stamp, 150.0 + i as f64))
            .expect("append");
    }

    let middle = store
        .find_range("Gollum", Some(stamps[1]), Some(stamps[1]))
        .expect("range");
    assert_eq!(middle.len(), 1);
    assert_eq!(middle[0].timestamp, stamps[1]);

    let tail = store
        .find_range("Gollum", Some(stamps[1]), None)
        .expect("tail");
    assert_eq!(tail.len(), 2);

    let ordered: Vec<&str> = tail.iter().map(|s| s.timestamp.as_str()).collect();
    assert_eq!(ordered, vec![stamps[1], stamps[2]]);
}

#[test]
fn warning_settings_round_trip_and_default() {
    let store = SqliteStore::open_in_memory().expect("open store");
    let defaults = store.load_warning_settings("Gollum").expect("defaults");
    assert!(defaults.warnings_enabled);
    assert!(defaults.failure_tracker.is_empty());

    let mut settings = WarningSettings {
        warnings_enabled: false,
        ..WarningSettings::default()
    };
    settings.failure_tracker.record("p1 Out of Range");
    store
        .save_warning_settings("Gollum", &settings)
        .expect("save");

    let loaded = store.load_warning_settings("Gollum").expect("load");
    assert_eq!(loaded, settings);
}

#[test]
fn status_rows_upsert_per_device() {
    let store = SqliteStore::open_in_memory().expect("open store");
    store
        .save_status(&StatusUpdate {
            device_id: "Gollum".into(),
            status: DeviceStatus::Idle,
            timestamp: "2024-06-25T10:00:00.000Z".into(),
        })
        .expect("save idle");
    store
        .save_status(&StatusUpdate {
            device_id: "Gollum".into(),
            status: DeviceStatus::Active,
            timestamp: "2024-06-25T10:00:05.000Z".into(),
        })
        .expect("save active");

    let statuses = store.load_statuses().expect("load");
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].status, DeviceStatus::Active);
    assert_eq!(statuses[0].timestamp, "2024-06-25T10:00:05.000Z");
}

#[test]
fn device_directory_upsert_and_delete() {
    let store = SqliteStore::open_in_memory().expect("open store");
    let config = gollum_config();

    assert!(store.upsert(&config).expect("create"));
    assert!(!store.upsert(&config).expect("update"));

    let fetched = store.get("Gollum").expect("get").expect("present");
    assert_eq!(fetched, config);
    assert_eq!(store.list().expect("list").len(), 1);

    assert!(store.delete("Gollum").expect("delete"));
    assert!(!store.delete("Gollum").expect("already gone"));
    assert!(store.get("Gollum").expect("get").is_none());
}
