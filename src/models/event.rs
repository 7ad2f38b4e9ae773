//! Lifecycle event written back to the store

use serde::{Deserialize, Serialize};

/// Action tag for a container the kubelet stopped
pub const STOP_EVENT: &str = "STOP";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRef {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRef {
    pub name: String,
}

/// Audit record; write-only, never read back by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event: String,
    pub manifest: ManifestRef,
    pub container: ContainerRef,
    /// Unix seconds
    pub timestamp: i64,
}

impl Event {
    pub fn new(event: impl Into<String>, manifest_id: impl Into<String>, container_name: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            manifest: ManifestRef { id: manifest_id.into() },
            container: ContainerRef { name: container_name.into() },
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn stopped(manifest_id: impl Into<String>, container_name: impl Into<String>) -> Self {
        Self::new(STOP_EVENT, manifest_id, container_name)
    }
}
