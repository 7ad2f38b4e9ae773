//! Registry of tasks, controllers and node manifests kept in the store
//!
//! Every task lives under the host it is bound to. Binding a task also
//! appends its manifest to that host's manifest list, which is what the
//! node agent on the host watches.
//!
//! The manifest list is updated read-modify-write without a compare step,
//! so the registry assumes a single writer per host.

pub mod keys;

use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{
    decode_manifests, encode_manifests, labels_match, ContainerManifest, Event, Labels,
    ReplicationController, Task,
};
use crate::store::Store;
use crate::{Error, Result};

/// Typed access to cluster state
pub struct Registry {
    store: Arc<dyn Store>,
    machines: Vec<String>,
}

impl Registry {
    pub fn new(store: Arc<dyn Store>, machines: Vec<String>) -> Self {
        Self { store, machines }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Machines tasks may be bound to, in scan order
    pub fn machines(&self) -> &[String] {
        &self.machines
    }

    /// Decode every document under `dir`, skipping ones that don't parse.
    /// A missing directory is empty.
    async fn list_documents<T: DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>> {
        let nodes = match self.store.list(dir, false).await {
            Ok(nodes) => nodes,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut documents = Vec::with_capacity(nodes.len());
        for node in nodes {
            match serde_json::from_str(&node.value) {
                Ok(doc) => documents.push(doc),
                Err(e) => {
                    tracing::warn!(key = %node.key, error = %e, "Skipping malformed document");
                }
            }
        }
        Ok(documents)
    }

    /// Tasks bound to one machine, with `current_state.host` filled in
    pub async fn list_machine_tasks(&self, machine: &str) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self.list_documents(&keys::tasks_dir(machine)).await?;
        for task in &mut tasks {
            task.current_state.host = machine.to_string();
        }
        Ok(tasks)
    }

    /// All tasks whose labels match `selector`, machine by machine
    pub async fn list_tasks(&self, selector: &Labels) -> Result<Vec<Task>> {
        let mut matched = Vec::new();
        for machine in &self.machines {
            let tasks = self.list_machine_tasks(machine).await?;
            matched.extend(tasks.into_iter().filter(|t| labels_match(&t.labels, selector)));
        }
        Ok(matched)
    }

    /// Locate a task by scanning machines in order; the first hit wins
    async fn find_task(&self, id: &str) -> Result<(String, Task)> {
        for machine in &self.machines {
            match self.store.get(&keys::task_key(machine, id)).await {
                Ok(node) => {
                    let mut task: Task = serde_json::from_str(&node.value)
                        .map_err(|e| Error::Decode(format!("task {}: {}", id, e)))?;
                    task.current_state.host = machine.clone();
                    return Ok((machine.clone(), task));
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::TaskNotFound(id.to_string()))
    }

    pub async fn get_task(&self, id: &str) -> Result<Task> {
        self.find_task(id).await.map(|(_, task)| task)
    }

    /// Bind `task` to `machine`: store its document and append its manifest
    /// to the machine's manifest list.
    pub async fn create_task(&self, machine: &str, task: &Task) -> Result<()> {
        match self.find_task(&task.id).await {
            Ok((existing, _)) => {
                return Err(Error::TaskAlreadyExists {
                    id: task.id.clone(),
                    machine: existing,
                });
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let mut manifests = self.load_manifests(machine).await?;

        let mut stored = task.clone();
        stored.desired_state.host = machine.to_string();
        self.store
            .create(&keys::task_key(machine, &task.id), &serde_json::to_string(&stored)?, None)
            .await?;

        let mut manifest = task.desired_state.manifest.clone();
        manifest.id = task.id.clone();
        manifests.push(manifest);
        self.update_manifests(machine, &manifests).await?;

        tracing::info!(task = %task.id, machine = %machine, "Task bound");
        Ok(())
    }

    pub async fn update_task(&self, _task: &Task) -> Result<()> {
        Err(Error::NotImplemented("task update"))
    }

    /// Unbind a task: drop its manifest from the host, then its document
    pub async fn delete_task(&self, id: &str) -> Result<()> {
        let (machine, _) = self.find_task(id).await?;

        let manifests = self.load_manifests(&machine).await?;
        let before = manifests.len();
        let remaining: Vec<ContainerManifest> = manifests.into_iter().filter(|m| m.id != id).collect();
        if remaining.len() == before {
            tracing::warn!(task = %id, machine = %machine, "No manifest found for task");
        }
        self.update_manifests(&machine, &remaining).await?;

        self.store.delete(&keys::task_key(&machine, id), true).await?;
        tracing::info!(task = %id, machine = %machine, "Task deleted");
        Ok(())
    }

    /// Manifest list for a machine; absent means empty
    pub async fn load_manifests(&self, machine: &str) -> Result<Vec<ContainerManifest>> {
        match self.store.get(&keys::manifest_key(machine)).await {
            Ok(node) => decode_manifests(&node.value),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub async fn update_manifests(&self, machine: &str, manifests: &[ContainerManifest]) -> Result<()> {
        self.store
            .set(&keys::manifest_key(machine), &encode_manifests(manifests)?, None)
            .await?;
        Ok(())
    }

    pub async fn list_controllers(&self) -> Result<Vec<ReplicationController>> {
        self.list_documents(keys::CONTROLLERS_DIR).await
    }

    pub async fn get_controller(&self, id: &str) -> Result<ReplicationController> {
        match self.store.get(&keys::controller_key(id)).await {
            Ok(node) => serde_json::from_str(&node.value)
                .map_err(|e| Error::Decode(format!("controller {}: {}", id, e))),
            Err(e) if e.is_not_found() => Err(Error::ControllerNotFound(id.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Creating a controller overwrites any existing one with the same id
    pub async fn create_controller(&self, controller: &ReplicationController) -> Result<()> {
        self.update_controller(controller).await
    }

    pub async fn update_controller(&self, controller: &ReplicationController) -> Result<()> {
        self.store
            .set(&keys::controller_key(&controller.id), &serde_json::to_string(controller)?, None)
            .await?;
        Ok(())
    }

    pub async fn delete_controller(&self, id: &str) -> Result<()> {
        match self.store.delete(&keys::controller_key(id), false).await {
            Err(e) if e.is_not_found() => Err(Error::ControllerNotFound(id.to_string())),
            other => other,
        }
    }

    /// Append an event under the container's event directory
    pub async fn record_event(&self, event: &Event, ttl: Duration) -> Result<()> {
        self.store
            .add_child(&keys::event_dir(&event.container.name), &serde_json::to_string(event)?, ttl)
            .await?;
        Ok(())
    }
}
