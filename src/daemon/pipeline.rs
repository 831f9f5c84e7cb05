use crate::daemon::broadcast::Broadcaster;
use crate::daemon::connections::ConnectionRegistry;
use crate::daemon::outliers::OutlierEvaluator;
use crate::daemon::runs::RunTracker;
use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};
use fornax_common::threading::{ThreadHandle, ThreadRegistry};
use fornax_core::feed::FeedEvent;
use fornax_core::sample::{Sample, WireSample};
use fornax_storage::{DeviceDirectory, EventStore};
use log::{debug, error, info, warn};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Channel used to report validation failures back to the producing
/// connection, when its transport supports acknowledgement.
pub type Feedback = tokio::sync::mpsc::UnboundedSender<String>;

/// One inbound message for a device, routed through that device's shard so
/// arrival order is preserved end to end.
pub enum IngestCommand {
    Identify {
        device: String,
    },
    Activate {
        device: String,
    },
    Stop {
        device: String,
    },
    Sample {
        wire: WireSample,
        feedback: Option<Feedback>,
    },
    Disconnect {
        device: String,
    },
    Shutdown,
}

impl IngestCommand {
    fn device(&self) -> Option<&str> {
        match self {
            IngestCommand::Identify { device }
            | IngestCommand::Activate { device }
            | IngestCommand::Stop { device }
            | IngestCommand::Disconnect { device } => Some(device),
            IngestCommand::Sample { wire, .. } => Some(&wire.device_id),
            IngestCommand::Shutdown => None,
        }
    }
}

/// Everything a shard worker needs to process one device's stream.
pub struct PipelineContext {
    pub store: Arc<dyn EventStore>,
    pub directory: Arc<dyn DeviceDirectory>,
    pub registry: Arc<ConnectionRegistry>,
    pub runs: RunTracker,
    pub evaluator: OutlierEvaluator,
    pub broadcaster: Arc<Broadcaster>,
}

/// Sharded ingestion workers. A device's name hashes to one shard, whose
/// queue is drained by a single thread: samples from one device are always
/// processed in arrival order, while different devices ride different
/// shards without contending.
pub struct IngestPool {
    shards: Vec<Sender<IngestCommand>>,
    handles: Vec<ThreadHandle>,
}

impl IngestPool {
    pub fn spawn(
        threads: &ThreadRegistry,
        shard_count: usize,
        ctx: Arc<PipelineContext>,
    ) -> Result<Self> {
        let shard_count = shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        let mut handles = Vec::with_capacity(shard_count);
        for shard in 0..shard_count {
            let (tx, rx) = crossbeam_channel::unbounded();
            let ctx = Arc::clone(&ctx);
            let handle = threads.spawn(format!("ingest-{shard}"), move || {
                worker_loop(shard, rx, ctx);
            })?;
            shards.push(tx);
            handles.push(handle);
        }
        Ok(Self { shards, handles })
    }

    fn shard_for(&self, device: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        device.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    /// Route a command to its device's shard. Shutdown goes everywhere.
    pub fn dispatch(&self, command: IngestCommand) {
        let shard = command.device().map(|device| self.shard_for(device));
        match shard {
            Some(shard) => {
                if self.shards[shard].send(command).is_err() {
                    error!("ingest shard {shard} is gone; dropping command");
                }
            }
            None => {
                for tx in &self.shards {
                    let _ = tx.send(IngestCommand::Shutdown);
                }
            }
        }
    }

    pub fn shutdown(self) {
        for tx in &self.shards {
            let _ = tx.send(IngestCommand::Shutdown);
        }
        drop(self.shards);
        for handle in self.handles {
            let name = handle.name().to_string();
            if handle.join().is_err() {
                error!("ingest worker '{name}' panicked during shutdown");
            }
        }
    }
}

fn worker_loop(shard: usize, rx: Receiver<IngestCommand>, ctx: Arc<PipelineContext>) {
    info!("ingest worker {shard} started");
    while let Ok(command) = rx.recv() {
        match command {
            IngestCommand::Identify { device } => ctx.registry.identify(&device),
            IngestCommand::Activate { device } => {
                let run_id = ctx.registry.activate(&device, &ctx.runs);
                debug!("'{}' opened run {}", device, run_id);
            }
            IngestCommand::Stop { device } => ctx.registry.stop(&device),
            IngestCommand::Disconnect { device } => ctx.registry.disconnect(&device),
            IngestCommand::Sample { wire, feedback } => {
                process_sample(&ctx, wire, feedback.as_ref())
            }
            IngestCommand::Shutdown => break,
        }
    }
    info!("ingest worker {shard} exiting");
}

/// The ingestion steps for one sample: resolve stamp, snapshot limits,
/// persist (unscoped, then run-scoped when a run is open), evaluate, and
/// broadcast. A persistence failure aborts the remaining steps for this
/// sample only; the worker loop always continues.
pub fn process_sample(ctx: &PipelineContext, wire: WireSample, feedback: Option<&Feedback>) {
    let device = wire.device_id.clone();

    let config = match ctx.directory.get(&device) {
        Ok(config) => config,
        Err(e) => {
            // Enrichment proceeds without limits; evaluation skips them.
            warn!("device lookup failed for '{}': {e:#}", device);
            None
        }
    };

    let sample = match Sample::enrich(&wire, config.as_ref()) {
        Ok(sample) => sample,
        Err(e) => {
            warn!("rejecting sample from '{}': {e}", device);
            if let Some(feedback) = feedback {
                let _ = feedback.send(e.to_string());
            }
            return;
        }
    };

    if let Err(e) = ctx.store.append(&device, &sample) {
        error!("failed to persist sample for '{}': {e:#}", device);
        return;
    }

    if let Some(run_id) = ctx.registry.open_run(&device) {
        if let Err(e) = ctx.store.append_to_run(&device, run_id, &sample) {
            error!(
                "failed to persist run sample for '{}' run {}: {e:#}",
                device, run_id
            );
            return;
        }
    }

    ctx.evaluator.evaluate(&sample);
    ctx.broadcaster.publish(FeedEvent::NewSample { sample });
}

#[cfg(test)]
mod tests {
    use super::*;
    use fornax_core::channel::{Channel, ChannelValues};
    use fornax_core::device::{ChannelLimits, DeviceConfig, LimitMap};
    use fornax_core::sample::RecordKind;
    use fornax_storage::memory::MemoryStore;

    fn context() -> (Arc<MemoryStore>, Arc<PipelineContext>) {
        let store = Arc::new(MemoryStore::new());
        let broadcaster = Arc::new(Broadcaster::new(64));
        let registry = Arc::new(ConnectionRegistry::new(
            store.clone() as Arc<dyn EventStore>,
            broadcaster.clone(),
        ));
        let ctx = Arc::new(PipelineContext {
            store: store.clone() as Arc<dyn EventStore>,
            directory: store.clone() as Arc<dyn DeviceDirectory>,
            registry: registry.clone(),
            runs: RunTracker::new(store.clone() as Arc<dyn EventStore>),
            evaluator: OutlierEvaluator::new(
                store.clone() as Arc<dyn EventStore>,
                registry,
                broadcaster.clone(),
            ),
            broadcaster,
        });
        (store, ctx)
    }

    fn oven_wire(device: &str, stamp: &str, temperature: f64) -> WireSample {
        WireSample {
            device_id: device.to_string(),
            timestamp: Some(stamp.to_string()),
            record_kind: RecordKind::Oven,
            board_id: None,
            channel_values: ChannelValues {
                temperature: Some(temperature),
                ..ChannelValues::default()
            },
        }
    }

    #[test]
    fn samples_without_an_open_run_stay_out_of_run_partitions() {
        let (store, ctx) = context();
        ctx.registry.identify("Gollum");

        process_sample(
            &ctx,
            oven_wire("Gollum", "2024-06-25T10:00:00.000Z", 180.0),
            None,
        );

        let all = store.find_range("Gollum", None, None).expect("find all");
        assert_eq!(all.len(), 1);
        assert!(store.find_by_run("Gollum", 1).expect("run 1").is_empty());
    }

    #[test]
    fn samples_in_an_open_run_land_in_both_partitions_identically() {
        let (store, ctx) = context();
        ctx.registry.identify("Gollum");
        ctx.registry.activate("Gollum", &ctx.runs);

        process_sample(
            &ctx,
            oven_wire("Gollum", "2024-06-25T10:00:00.000Z", 180.0),
            None,
        );

        let all = store.find_range("Gollum", None, None).expect("find all");
        let run = store.find_by_run("Gollum", 1).expect("run 1");
        assert_eq!(all.len(), 1);
        assert_eq!(run, all);
    }

    #[test]
    fn invalid_sample_reports_to_producer_and_persists_nothing() {
        let (store, ctx) = context();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let mut wire = oven_wire("Gollum", "2024-06-25T10:00:00.000Z", 180.0);
        wire.channel_values.temperature = None;
        process_sample(&ctx, wire, Some(&tx));

        let message = rx.try_recv().expect("validation error reported");
        assert!(message.contains("temperature"));
        assert!(store
            .find_range("Gollum", None, None)
            .expect("find all")
            .is_empty());
    }

    #[test]
    fn enrichment_uses_registry_limits_at_ingest_time() {
        let (store, ctx) = context();
        store
            .upsert(&DeviceConfig {
                name: "Gollum".into(),
                category: "reflow".into(),
                board_count: 2,
                limits: LimitMap::from([(Channel::Temperature, ChannelLimits::new(145.0, 255.0))]),
            })
            .expect("upsert");

        process_sample(
            &ctx,
            oven_wire("Gollum", "2024-06-25T10:00:00.000Z", 180.0),
            None,
        );

        let all = store.find_range("Gollum", None, None).expect("find all");
        assert_eq!(
            all[0].limits_for(Channel::Temperature),
            ChannelLimits::new(145.0, 255.0)
        );
    }
}
