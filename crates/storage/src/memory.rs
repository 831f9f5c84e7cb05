use crate::{note_append, DeviceDirectory, EventStore};
use anyhow::Result;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use fornax_core::device::DeviceConfig;
use fornax_core::sample::Sample;
use fornax_core::status::StatusUpdate;
use fornax_core::warning::WarningSettings;

#[derive(Default)]
struct MemoryInner {
    samples: HashMap<String, Vec<Sample>>,
    run_samples: HashMap<(String, u64), Vec<Sample>>,
    devices: BTreeMap<String, DeviceConfig>,
    settings: HashMap<String, WarningSettings>,
    statuses: BTreeMap<String, StatusUpdate>,
}

/// In-memory store satisfying both storage contracts. Used by tests and
/// demo setups; survives nothing, which is exactly the point.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().expect("memory store mutex poisoned")
    }
}

impl EventStore for MemoryStore {
    fn append(&self, device: &str, sample: &Sample) -> Result<()> {
        self.lock()
            .samples
            .entry(device.to_string())
            .or_default()
            .push(sample.clone());
        note_append(Utc::now());
        Ok(())
    }

    fn append_to_run(&self, device: &str, run_id: u64, sample: &Sample) -> Result<()> {
        self.lock()
            .run_samples
            .entry((device.to_string(), run_id))
            .or_default()
            .push(sample.clone());
        Ok(())
    }

    fn max_run_id(&self, device: &str) -> Result<u64> {
        let inner = self.lock();
        Ok(inner
            .run_samples
            .keys()
            .filter(|(d, _)| d == device)
            .map(|(_, run)| *run)
            .max()
            .unwrap_or(0))
    }

    fn find_by_run(&self, device: &str, run_id: u64) -> Result<Vec<Sample>> {
        let inner = self.lock();
        Ok(inner
            .run_samples
            .get(&(device.to_string(), run_id))
            .cloned()
            .unwrap_or_default())
    }

    fn find_range(
        &self,
        device: &str,
        since: Option<&str>,
        until: Option<&str>,
    ) -> Result<Vec<Sample>> {
        let inner = self.lock();
        let mut found: Vec<Sample> = inner
            .samples
            .get(device)
            .map(|samples| {
                samples
                    .iter()
                    .filter(|s| since.map_or(true, |lo| s.timestamp.as_str() >= lo))
                    .filter(|s| until.map_or(true, |hi| s.timestamp.as_str() <= hi))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        found.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(found)
    }

    fn load_warning_settings(&self, device: &str) -> Result<WarningSettings> {
        Ok(self.lock().settings.get(device).cloned().unwrap_or_default())
    }

    fn save_warning_settings(&self, device: &str, settings: &WarningSettings) -> Result<()> {
        self.lock()
            .settings
            .insert(device.to_string(), settings.clone());
        Ok(())
    }

    fn save_status(&self, update: &StatusUpdate) -> Result<()> {
        self.lock()
            .statuses
            .insert(update.device_id.clone(), update.clone());
        Ok(())
    }

    fn load_statuses(&self) -> Result<Vec<StatusUpdate>> {
        Ok(self.lock().statuses.values().cloned().collect())
    }
}

impl DeviceDirectory for MemoryStore {
    fn get(&self, name: &str) -> Result<Option<DeviceConfig>> {
        Ok(self.lock().devices.get(name).cloned())
    }

    fn list(&self) -> Result<Vec<DeviceConfig>> {
        Ok(self.lock().devices.values().cloned().collect())
    }

    fn upsert(&self, config: &DeviceConfig) -> Result<bool> {
        Ok(self
            .lock()
            .devices
            .insert(config.name.clone(), config.clone())
            .is_none())
    }

    fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.lock().devices.remove(name).is_some())
    }
}
