//! Replication controller model

use serde::{Deserialize, Serialize};

use super::task::{Labels, TaskState};

/// Label injected into every replica so the controller's selector finds it
pub const CONTROLLER_LABEL: &str = "replicationController";

/// Template used to stamp out new replicas
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskTemplate {
    pub desired_state: TaskState,
    pub labels: Labels,
}

/// Desired state of a replication controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplicationControllerState {
    /// Number of live replicas wanted
    pub replicas: usize,
    /// Selector counting the tasks that belong to this controller
    pub replica_selector: Labels,
    pub task_template: TaskTemplate,
}

/// Keeps `replicas` copies of its task template running.
///
/// The controller never stores replica ids; membership is decided by
/// matching `replica_selector` against task labels when reconciling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplicationController {
    pub id: String,
    pub desired_state: ReplicationControllerState,
    pub labels: Labels,
}

impl ReplicationController {
    pub fn new(id: impl Into<String>, replicas: usize) -> Self {
        Self {
            id: id.into(),
            desired_state: ReplicationControllerState {
                replicas,
                ..Default::default()
            },
            labels: Labels::new(),
        }
    }

    pub fn with_selector(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.desired_state.replica_selector.insert(key.into(), value.into());
        self
    }

    pub fn with_template(mut self, template: TaskTemplate) -> Self {
        self.desired_state.task_template = template;
        self
    }

    /// Template labels plus the controller label pointing back at this controller
    pub fn replica_labels(&self) -> Labels {
        let mut labels = self.desired_state.task_template.labels.clone();
        labels.insert(CONTROLLER_LABEL.to_string(), self.id.clone());
        labels
    }
}
