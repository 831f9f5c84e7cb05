use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tokio::sync::watch;

use fornax_core::device::DeviceConfig;
use fornax_core::sample::Sample;
use fornax_core::status::StatusUpdate;
use fornax_core::warning::WarningSettings;

/// Durable append-only event log, logically partitioned by device and,
/// within a device, by run id. The unscoped log is the full history; the
/// run partition is a fast-path index for per-run queries.
pub trait EventStore: Send + Sync {
    fn append(&self, device: &str, sample: &Sample) -> Result<()>;
    fn append_to_run(&self, device: &str, run_id: u64, sample: &Sample) -> Result<()>;
    /// Highest run id persisted for the device; 0 when none exists.
    fn max_run_id(&self, device: &str) -> Result<u64>;
    fn find_by_run(&self, device: &str, run_id: u64) -> Result<Vec<Sample>>;
    /// Stamp-ordered slice of the unscoped log; bounds are inclusive
    /// formatted stamps, either side optional.
    fn find_range(&self, device: &str, since: Option<&str>, until: Option<&str>)
        -> Result<Vec<Sample>>;

    /// Warning settings default to enabled with an empty tracker when the
    /// device has no persisted row.
    fn load_warning_settings(&self, device: &str) -> Result<WarningSettings>;
    fn save_warning_settings(&self, device: &str, settings: &WarningSettings) -> Result<()>;

    /// Last-known lifecycle state, kept for the currentStatuses read across
    /// restarts.
    fn save_status(&self, update: &StatusUpdate) -> Result<()>;
    fn load_statuses(&self) -> Result<Vec<StatusUpdate>>;
}

/// Read-mostly registry of oven metadata and control-limit configuration.
/// Written by the CRUD collaborator, consumed by the ingestion core.
pub trait DeviceDirectory: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<DeviceConfig>>;
    fn list(&self) -> Result<Vec<DeviceConfig>>;
    /// Returns true when the device was newly created.
    fn upsert(&self, config: &DeviceConfig) -> Result<bool>;
    /// Returns true when a device was actually removed.
    fn delete(&self, name: &str) -> Result<bool>;
}

static SAMPLES_APPENDED: AtomicU64 = AtomicU64::new(0);
static LAST_APPEND_AT_EPOCH_MS: AtomicI64 = AtomicI64::new(0);

static METRICS_CH: OnceCell<(
    watch::Sender<StorageMetrics>,
    watch::Receiver<StorageMetrics>,
)> = OnceCell::new();

fn init_metrics_channel() -> &'static (
    watch::Sender<StorageMetrics>,
    watch::Receiver<StorageMetrics>,
) {
    METRICS_CH.get_or_init(|| {
        let initial = storage_metrics_snapshot();
        watch::channel(initial)
    })
}

/// Record a successful append; backends call this on every write.
pub fn note_append(at: DateTime<Utc>) {
    let _ = SAMPLES_APPENDED.fetch_add(1, Ordering::Relaxed);
    LAST_APPEND_AT_EPOCH_MS.store(at.timestamp_millis(), Ordering::Relaxed);
    publish_metrics();
}

#[derive(Clone, Debug)]
pub struct StorageMetrics {
    pub samples_appended: u64,
    pub last_append_at: Option<DateTime<Utc>>,
}

fn storage_metrics_snapshot() -> StorageMetrics {
    let ms = LAST_APPEND_AT_EPOCH_MS.load(Ordering::Relaxed);
    let last = if ms > 0 {
        Utc.timestamp_millis_opt(ms).single()
    } else {
        None
    };
    StorageMetrics {
        samples_appended: SAMPLES_APPENDED.load(Ordering::Relaxed),
        last_append_at: last,
    }
}

fn publish_metrics() {
    let (tx, _rx) = init_metrics_channel();
    let _ = tx.send(storage_metrics_snapshot());
}

pub fn storage_metrics_watch() -> watch::Receiver<StorageMetrics> {
    let (_tx, rx) = init_metrics_channel();
    rx.clone()
}

pub mod memory;
pub mod sqlite3;
