use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

// Shared bookkeeping for live worker threads; entries are removed when a
// handle is joined or dropped.
#[derive(Default)]
struct Registered {
    next_id: AtomicUsize,
    names: Mutex<HashMap<usize, String>>,
}

/// Spawns named worker threads and remembers which ones are still live,
/// so the daemon can report its workers and join them on shutdown.
#[derive(Clone, Default)]
pub struct ThreadRegistry {
    shared: Arc<Registered>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, name: impl Into<String>, f: F) -> Result<ThreadHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let join_handle = thread::Builder::new()
            .name(name.clone())
            .spawn(f)
            .map_err(|e| anyhow!("failed to spawn thread '{name}': {e}"))?;

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        self.shared
            .names
            .lock()
            .expect("thread registry mutex poisoned")
            .insert(id, name.clone());

        Ok(ThreadHandle {
            name,
            id,
            handle: Some(join_handle),
            shared: Arc::clone(&self.shared),
        })
    }

    pub fn active_thread_names(&self) -> Vec<String> {
        self.shared
            .names
            .lock()
            .expect("thread registry mutex poisoned")
            .values()
            .cloned()
            .collect()
    }
}

pub struct ThreadHandle {
    name: String,
    id: usize,
    handle: Option<JoinHandle<()>>,
    shared: Arc<Registered>,
}

impl ThreadHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn join(mut self) -> thread::Result<()> {
        self.deregister();
        if let Some(handle) = self.handle.take() {
            handle.join()
        } else {
            Ok(())
        }
    }

    fn deregister(&self) {
        self.shared
            .names
            .lock()
            .expect("thread registry mutex poisoned")
            .remove(&self.id);
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        self.deregister();
        // Dropping the JoinHandle detaches the thread; shutdown paths that
        // care about completion call join() explicitly.
    }
}
