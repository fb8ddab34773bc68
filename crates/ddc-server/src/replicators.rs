//! Background replication from the remote nodes named in configuration.
//!
//! Each `[[replication.replicators]]` entry becomes one [`Replicator`] over
//! an [`HttpSource`]. On every tick it runs until caught up. Progress goes
//! to `replicators.json` under the data root on persistent nodes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use ddc_refs::RefService;
use ddc_replication::{
    FileStateStore, HttpSource, InMemoryStateStore, ReplicationReport, ReplicationResult,
    Replicator, ReplicatorStateStore,
};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

struct Scheduled {
    replicator: Arc<Replicator>,
    interval: Duration,
}

/// Every replicator configured for this node.
pub struct ReplicatorSet {
    scheduled: Vec<Scheduled>,
    states: Arc<dyn ReplicatorStateStore>,
}

impl ReplicatorSet {
    pub fn from_config(config: &ServerConfig, local: Arc<RefService>) -> ServerResult<Self> {
        let states: Arc<dyn ReplicatorStateStore> = if config.is_persistent() {
            Arc::new(
                FileStateStore::open(config.replicators_path())
                    .map_err(|e| ServerError::Config(format!("replicator state: {e}")))?,
            )
        } else {
            Arc::new(InMemoryStateStore::new())
        };

        let mut scheduled = Vec::with_capacity(config.replication.replicators.len());
        for settings in &config.replication.replicators {
            if settings.name.is_empty() {
                return Err(ServerError::Config("every replicator needs a name".into()));
            }
            if scheduled
                .iter()
                .any(|s: &Scheduled| s.replicator.name() == settings.name)
            {
                return Err(ServerError::Config(format!(
                    "replicator {:?} is configured twice",
                    settings.name
                )));
            }
            let source = HttpSource::new(settings.source_config()?)
                .map_err(|e| ServerError::Config(format!("replicator {:?}: {e}", settings.name)))?;
            let replicator = Replicator::new(
                settings.name.clone(),
                settings.namespace_id()?,
                Arc::new(source),
                local.clone(),
                states.clone(),
                settings.replicator_config(),
            );
            scheduled.push(Scheduled {
                replicator: Arc::new(replicator),
                interval: settings.interval(),
            });
        }
        Ok(Self { scheduled, states })
    }

    pub fn len(&self) -> usize {
        self.scheduled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }

    pub fn states(&self) -> &Arc<dyn ReplicatorStateStore> {
        &self.states
    }

    /// Run every replicator until caught up, one after another.
    pub async fn run_once(&self) -> Vec<(String, ReplicationResult<ReplicationReport>)> {
        let mut results = Vec::with_capacity(self.scheduled.len());
        for s in &self.scheduled {
            let result = s.replicator.run_until_caught_up().await;
            results.push((s.replicator.name().to_string(), result));
        }
        results
    }

    /// Start one task per replicator. Each stops once `stop` flips to true.
    pub fn spawn(&self, stop: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.scheduled
            .iter()
            .map(|s| {
                let replicator = s.replicator.clone();
                let interval = s.interval;
                let stop = stop.clone();
                tokio::spawn(run_periodically(replicator, interval, stop))
            })
            .collect()
    }
}

async fn run_periodically(replicator: Arc<Replicator>, interval: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(replicator = replicator.name(), ?interval, "replicator started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
        }
        match replicator.run_until_caught_up().await {
            Ok(report) if report == ReplicationReport::default() => {
                debug!(replicator = replicator.name(), "replica up to date");
            }
            Ok(report) => info!(
                replicator = replicator.name(),
                events = report.events_applied,
                mirrored = report.refs_mirrored,
                deleted = report.refs_deleted,
                snapshot = ?report.snapshot_restored,
                "replication pass"
            ),
            Err(e) => warn!(replicator = replicator.name(), error = %e, "replication pass failed"),
        }
    }
    info!(replicator = replicator.name(), "replicator stopped");
}
