use fornax_storage::EventStore;
use log::warn;
use std::sync::Arc;

/// Allocates per-device run identifiers: dense, strictly increasing,
/// starting at 1. The last known id is read back from durable storage on
/// every allocation, so a process restart mid-run continues the sequence
/// instead of rewinding it.
pub struct RunTracker {
    store: Arc<dyn EventStore>,
}

impl RunTracker {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Next run id for the device. A store that cannot answer is treated as
    /// holding no runs; allocation is never fatal.
    pub fn next_run_id(&self, device: &str) -> u64 {
        let last = match self.store.max_run_id(device) {
            Ok(last) => last,
            Err(e) => {
                warn!("run-id lookup failed for '{}', assuming 0: {e:#}", device);
                0
            }
        };
        last + 1
    }
}
