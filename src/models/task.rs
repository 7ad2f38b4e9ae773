//! Task model - a unit of scheduled work bound to one host

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::manifest::ContainerManifest;

/// Key/value labels used for selection queries
pub type Labels = BTreeMap<String, String>;

/// Status substring the runtime reports for terminated tasks
pub const TERMINATED_STATUS_MARKER: &str = "Exit";

/// What to do when a task's containers exit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RestartPolicy {
    #[default]
    Always,
    OnFailure,
    Never,
}

/// Desired or observed state of a task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskState {
    pub manifest: ContainerManifest,
    pub restart_policy: RestartPolicy,
    /// Machine the task is bound to
    pub host: String,
    pub status: String,
}

/// A unit of scheduled work
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    pub id: String,
    pub labels: Labels,
    pub desired_state: TaskState,
    pub current_state: TaskState,
}

impl Task {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_manifest(mut self, manifest: ContainerManifest) -> Self {
        self.desired_state.manifest = manifest;
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.current_state.status = status.into();
        self
    }

    /// Whether the task's current status denotes termination
    pub fn is_terminated(&self) -> bool {
        self.current_state.status.contains(TERMINATED_STATUS_MARKER)
    }

    /// Host ports the task's containers want to bind
    pub fn host_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.desired_state
            .manifest
            .containers
            .iter()
            .flat_map(|c| c.ports.iter())
            .map(|p| p.host_port)
            .filter(|port| *port != 0)
    }
}

/// Whether every selector pair is present in `labels`.
///
/// The empty selector matches everything.
pub fn labels_match(labels: &Labels, selector: &Labels) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Container;

    fn selector(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_labels_match() {
        let task = Task::new("t1").with_label("app", "web").with_label("tier", "frontend");

        assert!(labels_match(&task.labels, &selector(&[])));
        assert!(labels_match(&task.labels, &selector(&[("app", "web")])));
        assert!(labels_match(&task.labels, &selector(&[("tier", "frontend"), ("app", "web")])));
        assert!(!labels_match(&task.labels, &selector(&[("app", "db")])));
        assert!(!labels_match(&task.labels, &selector(&[("app", "web"), ("env", "prod")])));
    }

    #[test]
    fn test_terminated_status() {
        assert!(Task::new("t").with_status("Exit 0").is_terminated());
        assert!(Task::new("t").with_status("Exited (137)").is_terminated());
        assert!(!Task::new("t").with_status("Running").is_terminated());
        assert!(!Task::new("t").is_terminated());
    }

    #[test]
    fn test_host_ports_skip_unbound() {
        let task = Task::new("t").with_manifest(
            ContainerManifest::new("t")
                .with_container(Container::new("a", "nginx").with_port(80, 8080).with_port(443, 0)),
        );
        assert_eq!(task.host_ports().collect::<Vec<_>>(), vec![8080]);
    }

    #[test]
    fn test_task_partial_document_decodes() {
        let task: Task = serde_json::from_str(r#"{"id":"t1","labels":{"app":"web"}}"#).unwrap();
        assert_eq!(task.id, "t1");
        assert_eq!(task.desired_state.restart_policy, RestartPolicy::Always);
        assert!(task.current_state.host.is_empty());
    }
}
