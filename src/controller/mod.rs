//! Replication manager
//!
//! Keeps the number of live tasks matching each controller's selector at
//! the controller's replica count. Two drivers feed reconciliation: a full
//! scan of every controller on a fixed interval, and a watch on the
//! controller directory that reacts to individual updates.
//!
//! The two drivers race. A scan may read a controller, the watch then
//! delivers a newer version and reconciles it, and the scan goes on to
//! reconcile the stale copy. The next scan corrects any drift this causes,
//! and reconciliations never interleave because they share one lock.

mod task_control;

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::client::ClusterClient;
use crate::config::ControllerManagerConfig;
use crate::models::{ReplicationController, Task};
use crate::registry::{keys, Registry};
use crate::store::{Store, WatchAction, WatchEvent};
use crate::{Error, Result};

pub use task_control::{replica_task, RealTaskControl, TaskControl};
#[cfg(test)]
pub use task_control::MockTaskControl;

/// What one reconciliation did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub created: usize,
    pub deleted: usize,
}

pub struct ReplicationManager {
    registry: Arc<Registry>,
    client: Arc<dyn ClusterClient>,
    task_control: Arc<dyn TaskControl>,
    /// Serializes reconciliations across both drivers
    update_lock: Mutex<()>,
    config: ControllerManagerConfig,
}

impl ReplicationManager {
    pub fn new(registry: Arc<Registry>, client: Arc<dyn ClusterClient>, config: ControllerManagerConfig) -> Self {
        let task_control = Arc::new(RealTaskControl::new(Arc::clone(&client)));
        Self {
            registry,
            client,
            task_control,
            update_lock: Mutex::new(()),
            config,
        }
    }

    pub fn with_task_control(mut self, task_control: Arc<dyn TaskControl>) -> Self {
        self.task_control = task_control;
        self
    }

    /// Run both drivers forever
    pub async fn run(self: Arc<Self>) {
        tracing::info!(machines = ?self.registry.machines(), "Replication manager starting");

        let watcher = Arc::clone(&self);
        tokio::spawn(async move { watcher.watch_controllers().await });

        self.synchronize().await;
    }

    /// Converge one controller's replica count
    pub async fn sync_replication_controller(&self, controller: &ReplicationController) -> Result<SyncOutcome> {
        let _guard = self.update_lock.lock().await;
        let mut outcome = SyncOutcome::default();

        let tasks = self
            .client
            .list_tasks(&controller.desired_state.replica_selector)
            .await?;
        let active: Vec<Task> = tasks.into_iter().filter(|t| !t.is_terminated()).collect();
        let wanted = controller.desired_state.replicas;

        if active.len() < wanted {
            let missing = wanted - active.len();
            tracing::info!(controller = %controller.id, active = active.len(), wanted, "Too few replicas, creating {}", missing);
            for i in 0..missing {
                if i > 0 {
                    sleep(self.config.creation_delay).await;
                }
                self.task_control.create_replica(controller).await;
                outcome.created += 1;
            }
        } else if active.len() > wanted {
            let surplus = active.len() - wanted;
            tracing::info!(controller = %controller.id, active = active.len(), wanted, "Too many replicas, deleting {}", surplus);
            for task in active.iter().take(surplus) {
                self.task_control.delete_task(&task.id).await?;
                outcome.deleted += 1;
            }
        }

        Ok(outcome)
    }

    /// Reconcile every stored controller once
    pub async fn sync_all(&self) {
        let controllers = match self.registry.list_controllers().await {
            Ok(controllers) => controllers,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list replication controllers");
                return;
            }
        };

        for controller in &controllers {
            if let Err(e) = self.sync_replication_controller(controller).await {
                tracing::error!(controller = %controller.id, error = %e, "Failed to synchronize controller");
            }
        }
    }

    /// Full scan every `sync_interval`, forever
    pub async fn synchronize(&self) {
        loop {
            self.sync_all().await;
            sleep(self.config.sync_interval).await;
        }
    }

    /// Reconcile controllers as their documents change, forever
    pub async fn watch_controllers(&self) {
        loop {
            let mut watch = match self.registry.store().watch(keys::CONTROLLERS_DIR, 0, true).await {
                Ok(watch) => watch,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to watch replication controllers");
                    sleep(self.config.watch_retry_interval).await;
                    continue;
                }
            };

            while let Some(event) = watch.recv().await {
                match controller_from_event(&event) {
                    Ok(Some(controller)) => {
                        if let Err(e) = self.sync_replication_controller(&controller).await {
                            tracing::error!(controller = %controller.id, error = %e, "Failed to synchronize controller");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(key = %event.node.key, error = %e, "Ignoring controller update");
                    }
                }
            }

            tracing::debug!("Controller watch closed, re-subscribing");
            sleep(self.config.watch_retry_interval).await;
        }
    }
}

/// The controller carried by a watch event. Only `set` events carry one.
pub fn controller_from_event(event: &WatchEvent) -> Result<Option<ReplicationController>> {
    if event.action != WatchAction::Set {
        return Ok(None);
    }
    serde_json::from_str(&event.node.value)
        .map(Some)
        .map_err(|e| Error::Decode(format!("{}: {}", event.node.key, e)))
}
