use crate::daemon::broadcast::Broadcaster;
use crate::daemon::runs::RunTracker;
use fornax_core::channel::Channel;
use fornax_core::feed::FeedEvent;
use fornax_core::status::{DeviceStatus, StatusUpdate};
use fornax_core::timefmt;
use fornax_core::warning::FailureTracker;
use fornax_storage::EventStore;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Key for the per-run outlier counters kept beside the failure tracker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OutlierKey {
    Oven,
    Board { board_id: String, channel: Channel },
}

/// Mutable per-device state. Owned by the registry; always touched under
/// the device's own lock, never under a lock spanning other devices.
#[derive(Debug)]
pub struct DeviceSession {
    pub status: DeviceStatus,
    pub since: String,
    pub open_run: Option<u64>,
    pub tracker: FailureTracker,
    pub outlier_counts: HashMap<OutlierKey, u64>,
}

impl DeviceSession {
    fn new() -> Self {
        Self {
            status: DeviceStatus::Disconnected,
            since: timefmt::now_stamp(),
            open_run: None,
            tracker: FailureTracker::default(),
            outlier_counts: HashMap::new(),
        }
    }

    pub fn note_outlier(&mut self, key: OutlierKey) {
        *self.outlier_counts.entry(key).or_insert(0) += 1;
    }
}

/// Tracks every known device connection: lifecycle state, the open run id
/// while Active, and the per-run failure tracker. Entries live behind
/// per-device mutexes inside a shared map, so same-device transitions are
/// serialized while different devices never contend.
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<DeviceSession>>>>,
    store: Arc<dyn EventStore>,
    broadcaster: Arc<Broadcaster>,
}

impl ConnectionRegistry {
    pub fn new(store: Arc<dyn EventStore>, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            broadcaster,
        }
    }

    fn entry(&self, device: &str) -> Arc<Mutex<DeviceSession>> {
        if let Some(session) = self
            .sessions
            .read()
            .expect("session map lock poisoned")
            .get(device)
        {
            return Arc::clone(session);
        }
        let mut sessions = self.sessions.write().expect("session map lock poisoned");
        Arc::clone(
            sessions
                .entry(device.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(DeviceSession::new()))),
        )
    }

    /// Apply a lifecycle transition under the session lock: mutate, persist
    /// the last-known status, and broadcast — exactly one event per call,
    /// ordered with the mutation.
    fn transition(&self, device: &str, session: &mut DeviceSession, status: DeviceStatus) {
        let from = session.status;
        session.status = status;
        session.since = timefmt::now_stamp();
        debug!("{}: {:?} -> {:?}", device, from, status);

        let update = StatusUpdate {
            device_id: device.to_string(),
            status,
            timestamp: session.since.clone(),
        };
        if let Err(e) = self.store.save_status(&update) {
            warn!("failed to persist status for '{}': {e:#}", device);
        }
        self.broadcaster.publish(FeedEvent::status(update));
    }

    /// Zero the failure tracker for a run boundary, preserving the
    /// persisted warnings-enabled flag.
    fn reset_tracker(&self, device: &str, session: &mut DeviceSession) {
        session.tracker.reset();
        session.outlier_counts.clear();
        match self.store.load_warning_settings(device) {
            Ok(mut settings) => {
                settings.failure_tracker = FailureTracker::default();
                if let Err(e) = self.store.save_warning_settings(device, &settings) {
                    warn!("failed to persist tracker reset for '{}': {e:#}", device);
                }
            }
            Err(e) => warn!("failed to load warning settings for '{}': {e:#}", device),
        }
    }

    /// Register a live connection. Idempotent; re-identifying simply wins.
    pub fn identify(&self, device: &str) {
        let entry = self.entry(device);
        let mut session = entry.lock().expect("session lock poisoned");
        session.open_run = None;
        self.transition(device, &mut session, DeviceStatus::Idle);
    }

    /// Open the next run for the device and mark it Active. The allocated
    /// run id is returned for ingestion-side attribution; it is not part of
    /// the status broadcast.
    pub fn activate(&self, device: &str, runs: &RunTracker) -> u64 {
        let entry = self.entry(device);
        let mut session = entry.lock().expect("session lock poisoned");
        let run_id = runs.next_run_id(device);
        session.open_run = Some(run_id);
        self.transition(device, &mut session, DeviceStatus::Active);
        run_id
    }

    /// Close the open run. Safe to call repeatedly; an Idle -> Idle
    /// transition re-resets an already-empty tracker, which is unobservable.
    pub fn stop(&self, device: &str) {
        let entry = self.entry(device);
        let mut session = entry.lock().expect("session lock poisoned");
        session.open_run = None;
        self.reset_tracker(device, &mut session);
        self.transition(device, &mut session, DeviceStatus::Idle);
    }

    /// Transport closed: the run ends exactly as on stop, and the device is
    /// reported Disconnected.
    pub fn disconnect(&self, device: &str) {
        let entry = self.entry(device);
        let mut session = entry.lock().expect("session lock poisoned");
        session.open_run = None;
        self.reset_tracker(device, &mut session);
        self.transition(device, &mut session, DeviceStatus::Disconnected);
    }

    pub fn open_run(&self, device: &str) -> Option<u64> {
        let sessions = self.sessions.read().expect("session map lock poisoned");
        sessions
            .get(device)
            .and_then(|s| s.lock().expect("session lock poisoned").open_run)
    }

    /// Run a closure against an existing session under its lock. Returns
    /// None for devices the registry has never seen.
    pub fn with_session<T>(
        &self,
        device: &str,
        f: impl FnOnce(&mut DeviceSession) -> T,
    ) -> Option<T> {
        let entry = {
            let sessions = self.sessions.read().expect("session map lock poisoned");
            sessions.get(device).map(Arc::clone)
        }?;
        let mut session = entry.lock().expect("session lock poisoned");
        Some(f(&mut session))
    }

    /// Snapshot of all known device states, for late-joining observers.
    pub fn current_statuses(&self) -> Vec<StatusUpdate> {
        let sessions = self.sessions.read().expect("session map lock poisoned");
        let mut statuses: Vec<StatusUpdate> = sessions
            .iter()
            .map(|(device, entry)| {
                let session = entry.lock().expect("session lock poisoned");
                StatusUpdate {
                    device_id: device.clone(),
                    status: session.status,
                    timestamp: session.since.clone(),
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        statuses
    }

    /// Devices with outliers recorded in the current run, for catch-up.
    pub fn nonzero_trackers(&self) -> Vec<(String, FailureTracker)> {
        let sessions = self.sessions.read().expect("session map lock poisoned");
        let mut trackers: Vec<(String, FailureTracker)> = sessions
            .iter()
            .filter_map(|(device, entry)| {
                let session = entry.lock().expect("session lock poisoned");
                if session.tracker.is_empty() {
                    None
                } else {
                    Some((device.clone(), session.tracker.clone()))
                }
            })
            .collect();
        trackers.sort_by(|a, b| a.0.cmp(&b.0));
        trackers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fornax_storage::memory::MemoryStore;

    fn registry() -> (Arc<MemoryStore>, ConnectionRegistry) {
        let store = Arc::new(MemoryStore::new());
        let broadcaster = Arc::new(Broadcaster::new(64));
        let registry =
            ConnectionRegistry::new(store.clone() as Arc<dyn EventStore>, broadcaster);
        (store, registry)
    }

    #[test]
    fn identify_then_activate_opens_run_one() {
        let (store, registry) = registry();
        let runs = RunTracker::new(store as Arc<dyn EventStore>);

        registry.identify("Gollum");
        assert_eq!(registry.open_run("Gollum"), None);

        let run = registry.activate("Gollum", &runs);
        assert_eq!(run, 1);
        assert_eq!(registry.open_run("Gollum"), Some(1));

        let statuses = registry.current_statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, DeviceStatus::Active);
    }

    #[test]
    fn stop_clears_run_and_resets_tracker() {
        let (store, registry) = registry();
        let runs = RunTracker::new(store.clone() as Arc<dyn EventStore>);

        registry.activate("Gollum", &runs);
        registry
            .with_session("Gollum", |s| s.tracker.record("p1 Out of Range"))
            .expect("session exists");

        registry.stop("Gollum");
        assert_eq!(registry.open_run("Gollum"), None);
        assert!(registry.nonzero_trackers().is_empty());
        let persisted = store
            .load_warning_settings("Gollum")
            .expect("settings readable");
        assert!(persisted.failure_tracker.is_empty());
    }

    #[test]
    fn repeated_stop_is_a_safe_no_op() {
        let (store, registry) = registry();
        let runs = RunTracker::new(store.clone() as Arc<dyn EventStore>);

        registry.activate("Gollum", &runs);
        registry.stop("Gollum");
        registry.stop("Gollum");

        let tracker = registry
            .with_session("Gollum", |s| s.tracker.clone())
            .expect("session exists");
        assert_eq!(tracker.count, 0);
        let statuses = registry.current_statuses();
        assert_eq!(statuses[0].status, DeviceStatus::Idle);
    }

    #[test]
    fn disconnect_reports_disconnected_and_persists_status() {
        let (store, registry) = registry();

        registry.identify("Gollum");
        registry.disconnect("Gollum");

        let statuses = registry.current_statuses();
        assert_eq!(statuses[0].status, DeviceStatus::Disconnected);

        let persisted = store.load_statuses().expect("statuses readable");
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].status, DeviceStatus::Disconnected);
    }

    #[test]
    fn unknown_devices_have_no_session() {
        let (_store, registry) = registry();
        assert!(registry.with_session("Shelob", |_| ()).is_none());
        assert_eq!(registry.open_run("Shelob"), None);
    }
}
