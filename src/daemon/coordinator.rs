use crate::daemon::broadcast::Broadcaster;
use crate::daemon::connections::ConnectionRegistry;
use crate::daemon::outliers::OutlierEvaluator;
use crate::daemon::pipeline::{IngestCommand, IngestPool, PipelineContext};
use crate::daemon::runs::RunTracker;
use anyhow::{Context, Result};
use fornax_common::threading::ThreadRegistry;
use fornax_core::device::DeviceConfig;
use fornax_core::feed::FeedEvent;
use fornax_core::status::StatusUpdate;
use fornax_core::warning::WarningSettings;
use fornax_storage::{DeviceDirectory, EventStore};
use log::info;
use std::collections::HashSet;
use std::sync::Arc;

/// Wires the ingestion core together: storage, device directory, connection
/// registry, run tracker, outlier evaluator, broadcaster, and the sharded
/// ingest pool. The transport layer only ever talks to this type.
pub struct Coordinator {
    store: Arc<dyn EventStore>,
    directory: Arc<dyn DeviceDirectory>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
    pool: IngestPool,
    threads: ThreadRegistry,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn EventStore>,
        directory: Arc<dyn DeviceDirectory>,
        shard_count: usize,
        feed_capacity: usize,
    ) -> Result<Self> {
        let threads = ThreadRegistry::new();
        let broadcaster = Arc::new(Broadcaster::new(feed_capacity));
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::clone(&store),
            Arc::clone(&broadcaster),
        ));
        let evaluator = OutlierEvaluator::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&broadcaster),
        );
        let ctx = Arc::new(PipelineContext {
            store: Arc::clone(&store),
            directory: Arc::clone(&directory),
            registry: Arc::clone(&registry),
            runs: RunTracker::new(Arc::clone(&store)),
            evaluator,
            broadcaster: Arc::clone(&broadcaster),
        });
        let pool =
            IngestPool::spawn(&threads, shard_count, ctx).context("spawn ingest workers")?;
        info!("ingestion core started with {} shard(s)", shard_count.max(1));

        Ok(Self {
            store,
            directory,
            registry,
            broadcaster,
            pool,
            threads,
        })
    }

    /// Route one inbound device message into its shard.
    pub fn dispatch(&self, command: IngestCommand) {
        self.pool.dispatch(command);
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn directory(&self) -> &Arc<dyn DeviceDirectory> {
        &self.directory
    }

    pub fn threads(&self) -> &ThreadRegistry {
        &self.threads
    }

    /// Current statuses: live sessions first, padded with last-known
    /// persisted rows for devices that have not connected since restart.
    pub fn current_statuses(&self) -> Vec<StatusUpdate> {
        let mut statuses = self.registry.current_statuses();
        let live: HashSet<String> = statuses.iter().map(|s| s.device_id.clone()).collect();
        if let Ok(persisted) = self.store.load_statuses() {
            for status in persisted {
                if !live.contains(&status.device_id) {
                    statuses.push(status);
                }
            }
        }
        statuses.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        statuses
    }

    /// Catch-up prelude for a late-joining observer: every known status
    /// plus every non-zero failure tracker. Historical samples are pulled
    /// through the query surface, never replayed here.
    pub fn catchup_events(&self) -> Vec<FeedEvent> {
        let mut events: Vec<FeedEvent> = self
            .current_statuses()
            .into_iter()
            .map(FeedEvent::status)
            .collect();
        for (device, tracker) in self.registry.nonzero_trackers() {
            let failure_type = tracker.failures.last().cloned().unwrap_or_default();
            events.push(FeedEvent::Warning {
                device_id: device,
                failure_type,
                failure_tracker: tracker,
            });
        }
        events
    }

    /// Registry CRUD passthrough: persist and announce.
    pub fn upsert_device(&self, config: DeviceConfig) -> Result<()> {
        let created = self.directory.upsert(&config)?;
        let event = if created {
            FeedEvent::NewDevice { device: config }
        } else {
            FeedEvent::UpdateDevice { device: config }
        };
        self.broadcaster.publish(event);
        Ok(())
    }

    pub fn delete_device(&self, name: &str) -> Result<bool> {
        let removed = self.directory.delete(name)?;
        if removed {
            self.broadcaster.publish(FeedEvent::DeleteDevice {
                device_id: name.to_string(),
            });
        }
        Ok(removed)
    }

    /// Flip the per-device warning flag, preserving tracker state.
    pub fn set_warnings_enabled(&self, device: &str, enabled: bool) -> Result<WarningSettings> {
        let mut settings = self.store.load_warning_settings(device)?;
        settings.warnings_enabled = enabled;
        self.store.save_warning_settings(device, &settings)?;
        Ok(settings)
    }

    pub fn shutdown(self) {
        info!("shutting down ingestion core");
        self.pool.shutdown();
    }
}
