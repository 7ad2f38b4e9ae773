//! Container manifest model - what a host should be running

use serde::{Deserialize, Serialize};

/// A port exposed by a container and the host port it is published on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Port {
    /// Port inside the container
    pub container_port: u16,
    /// Port on the host
    pub host_port: u16,
}

/// Environment variable passed to a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// A named host volume mounted into a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolumeMount {
    /// Volume name, resolved under the kubelet's volume root
    pub name: String,
    /// Path inside the container
    pub mount_path: String,
    pub read_only: bool,
}

/// A single container specification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Container {
    pub name: String,
    pub image: String,
    /// Command line, split on whitespace when the container is created
    pub command: String,
    pub working_dir: String,
    pub env: Vec<EnvVar>,
    pub ports: Vec<Port>,
    pub volume_mounts: Vec<VolumeMount>,
}

impl Container {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar { name: name.into(), value: value.into() });
        self
    }

    pub fn with_port(mut self, container_port: u16, host_port: u16) -> Self {
        self.ports.push(Port { container_port, host_port });
        self
    }

    pub fn with_volume(mut self, name: impl Into<String>, mount_path: impl Into<String>, read_only: bool) -> Self {
        self.volume_mounts.push(VolumeMount {
            name: name.into(),
            mount_path: mount_path.into(),
            read_only,
        });
        self
    }
}

/// A bundle of containers that run together on one host.
///
/// The id is usually the id of the task the manifest was derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerManifest {
    pub id: String,
    pub containers: Vec<Container>,
}

impl ContainerManifest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            containers: Vec::new(),
        }
    }

    pub fn with_container(mut self, container: Container) -> Self {
        self.containers.push(container);
        self
    }
}

/// Decode a host's manifest list document.
///
/// Documents are YAML; JSON documents decode too since JSON is a subset.
/// A blank document is an empty list.
pub fn decode_manifests(data: &str) -> crate::Result<Vec<ContainerManifest>> {
    if data.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_yaml::from_str(data)?)
}

/// Encode a host's manifest list document
pub fn encode_manifests(manifests: &[ContainerManifest]) -> crate::Result<String> {
    Ok(serde_json::to_string(manifests)?)
}
