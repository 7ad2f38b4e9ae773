//! Typed cluster client
//!
//! [`ClusterClient`] is what controllers program against. [`LocalClient`]
//! serves it in-process from the registry, scheduling new tasks on the way
//! in.

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::{Labels, ReplicationController, Task};
use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::Result;

/// Path prefix of the versioned API
pub const API_PREFIX: &str = "/api/v1beta1";

/// REST path of a resource collection, or of one resource when `name` is set
pub fn resource_path(prefix: &str, kind: &str, name: Option<&str>) -> String {
    let base = format!("{}/{}", prefix.trim_end_matches('/'), kind);
    match name {
        Some(name) => format!("{}/{}", base, name),
        None => base,
    }
}

/// Task and controller operations against the cluster
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Tasks whose labels match `selector`
    async fn list_tasks(&self, selector: &Labels) -> Result<Vec<Task>>;

    async fn get_task(&self, id: &str) -> Result<Task>;

    async fn delete_task(&self, id: &str) -> Result<()>;

    /// Schedule and bind a task, returning it as stored
    async fn create_task(&self, task: &Task) -> Result<Task>;

    async fn update_task(&self, task: &Task) -> Result<Task>;

    async fn get_replication_controller(&self, id: &str) -> Result<ReplicationController>;

    async fn create_replication_controller(
        &self,
        controller: &ReplicationController,
    ) -> Result<ReplicationController>;

    async fn update_replication_controller(
        &self,
        controller: &ReplicationController,
    ) -> Result<ReplicationController>;

    async fn delete_replication_controller(&self, id: &str) -> Result<()>;
}

/// In-process client over the registry
pub struct LocalClient {
    registry: Arc<Registry>,
    scheduler: Arc<dyn Scheduler>,
}

impl LocalClient {
    pub fn new(registry: Arc<Registry>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self { registry, scheduler }
    }
}

#[async_trait]
impl ClusterClient for LocalClient {
    async fn list_tasks(&self, selector: &Labels) -> Result<Vec<Task>> {
        self.registry.list_tasks(selector).await
    }

    async fn get_task(&self, id: &str) -> Result<Task> {
        self.registry.get_task(id).await
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        self.registry.delete_task(id).await
    }

    async fn create_task(&self, task: &Task) -> Result<Task> {
        let machine = self.scheduler.schedule(task).await?;
        self.registry.create_task(&machine, task).await?;

        let mut created = task.clone();
        created.desired_state.host = machine;
        Ok(created)
    }

    async fn update_task(&self, task: &Task) -> Result<Task> {
        self.registry.update_task(task).await?;
        Ok(task.clone())
    }

    async fn get_replication_controller(&self, id: &str) -> Result<ReplicationController> {
        self.registry.get_controller(id).await
    }

    async fn create_replication_controller(
        &self,
        controller: &ReplicationController,
    ) -> Result<ReplicationController> {
        self.registry.create_controller(controller).await?;
        Ok(controller.clone())
    }

    async fn update_replication_controller(
        &self,
        controller: &ReplicationController,
    ) -> Result<ReplicationController> {
        self.registry.update_controller(controller).await?;
        Ok(controller.clone())
    }

    async fn delete_replication_controller(&self, id: &str) -> Result<()> {
        self.registry.delete_controller(id).await
    }
}
