//! Replica creation and deletion on behalf of the replication manager

use async_trait::async_trait;
use std::sync::Arc;

use crate::client::ClusterClient;
use crate::models::{ReplicationController, Task};
use crate::Result;

/// How the replication manager adds and removes tasks
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskControl: Send + Sync {
    /// Stamp out one replica from the controller's template. Failures are
    /// logged and left for the next reconciliation.
    async fn create_replica(&self, controller: &ReplicationController);

    async fn delete_task(&self, task_id: &str) -> Result<()>;
}

/// Task control backed by a cluster client
pub struct RealTaskControl {
    client: Arc<dyn ClusterClient>,
}

impl RealTaskControl {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }
}

/// The task a new replica of `controller` starts as
pub fn replica_task(controller: &ReplicationController) -> Task {
    Task {
        id: format!("{:x}", rand::random::<u64>()),
        labels: controller.replica_labels(),
        desired_state: controller.desired_state.task_template.desired_state.clone(),
        ..Default::default()
    }
}

#[async_trait]
impl TaskControl for RealTaskControl {
    async fn create_replica(&self, controller: &ReplicationController) {
        let task = replica_task(controller);
        match self.client.create_task(&task).await {
            Ok(created) => {
                tracing::info!(
                    controller = %controller.id,
                    task = %created.id,
                    host = %created.desired_state.host,
                    "Replica created"
                );
            }
            Err(e) => {
                tracing::error!(controller = %controller.id, task = %task.id, error = %e, "Failed to create replica");
            }
        }
    }

    async fn delete_task(&self, task_id: &str) -> Result<()> {
        self.client.delete_task(task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;
    use crate::models::{Container, ContainerManifest, TaskTemplate, CONTROLLER_LABEL};
    use crate::Error;

    fn controller() -> ReplicationController {
        let mut template = TaskTemplate::default();
        template.labels.insert("app".into(), "web".into());
        template.desired_state.manifest =
            ContainerManifest::new("web").with_container(Container::new("web", "nginx"));
        ReplicationController::new("web-rc", 2)
            .with_selector("app", "web")
            .with_template(template)
    }

    #[test]
    fn test_replica_task_from_template() {
        let rc = controller();
        let task = replica_task(&rc);

        assert!(!task.id.is_empty());
        assert!(task.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(task.labels.get(CONTROLLER_LABEL).map(String::as_str), Some("web-rc"));
        assert_eq!(task.labels.get("app").map(String::as_str), Some("web"));
        assert_eq!(task.desired_state.manifest.containers[0].image, "nginx");
        assert_ne!(replica_task(&rc).id, task.id);
    }

    #[tokio::test]
    async fn test_create_replica_sends_labeled_task() {
        let mut client = MockClusterClient::new();
        client
            .expect_create_task()
            .withf(|task: &Task| task.labels.get(CONTROLLER_LABEL).map(String::as_str) == Some("web-rc"))
            .times(1)
            .returning(|task| Ok(task.clone()));

        RealTaskControl::new(Arc::new(client)).create_replica(&controller()).await;
    }

    #[tokio::test]
    async fn test_create_replica_swallows_failures() {
        let mut client = MockClusterClient::new();
        client
            .expect_create_task()
            .times(1)
            .returning(|task| Err(Error::NoMachineAvailable(task.id.clone())));

        RealTaskControl::new(Arc::new(client)).create_replica(&controller()).await;
    }

    #[tokio::test]
    async fn test_delete_task_propagates() {
        let mut client = MockClusterClient::new();
        client
            .expect_delete_task()
            .withf(|id: &str| id == "t1")
            .times(1)
            .returning(|id| Err(Error::TaskNotFound(id.to_string())));

        let control = RealTaskControl::new(Arc::new(client));
        assert!(control.delete_task("t1").await.unwrap_err().is_not_found());
    }
}
