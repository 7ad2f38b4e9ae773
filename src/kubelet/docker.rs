//! Docker Engine runtime over bollard

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

use super::runtime::{ContainerDetails, ContainerRuntime, ContainerSpec, ContainerSummary};
use crate::{Error, Result};

/// Container runtime backed by the local Docker daemon
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform's default socket
    pub fn connect() -> Result<Self> {
        let client = Docker::connect_with_local_defaults()?;
        Ok(Self { client })
    }

    pub fn from_client(client: Docker) -> Self {
        Self { client }
    }
}

/// Split `repo[:tag]` so a pull fetches one tag rather than all of them
fn image_reference(image: &str) -> (&str, &str) {
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if last_segment.contains('@') {
        return (image, "");
    }
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (image, "latest"),
    }
}

fn as_set(items: &[String]) -> HashMap<String, HashMap<(), ()>> {
    items.iter().map(|item| (item.clone(), HashMap::new())).collect()
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.client.ping().await?;
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let containers = self
            .client
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c.names.and_then(|names| names.into_iter().next())?;
                Some(ContainerSummary { id, name })
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails> {
        let info = self
            .client
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;

        Ok(ContainerDetails {
            name: info.name.unwrap_or_default(),
            running: info.state.and_then(|s| s.running).unwrap_or(false),
        })
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let (repo, tag) = image_reference(image);
        tracing::info!(image = %image, "Pulling image");

        let mut stream = self.client.create_image(
            Some(CreateImageOptions {
                from_image: repo,
                tag,
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(progress) = stream.next().await {
            let info = progress?;
            if let Some(status) = info.status {
                tracing::trace!(image = %image, status = %status, "Pull progress");
            }
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let port_bindings = spec
            .port_bindings
            .iter()
            .map(|(port, host_port)| {
                let binding = PortBinding {
                    host_ip: None,
                    host_port: Some(host_port.to_string()),
                };
                (port.clone(), Some(vec![binding]))
            })
            .collect();

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            binds: Some(spec.binds.clone()),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            exposed_ports: Some(as_set(&spec.exposed_ports)),
            env: Some(spec.env.clone()),
            volumes: Some(as_set(&spec.volumes)),
            working_dir: spec.working_dir.clone(),
            cmd: if spec.cmd.is_empty() { None } else { Some(spec.cmd.clone()) },
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await?;

        for warning in &response.warnings {
            tracing::warn!(container = %spec.name, warning = %warning, "Docker warning on create");
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()> {
        let options = StopContainerOptions { t: grace.as_secs() as i64 };
        self.client
            .stop_container(id, Some(options))
            .await
            .map_err(|e| Error::Runtime(format!("Failed to stop container {}: {}", id, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_reference() {
        assert_eq!(image_reference("nginx"), ("nginx", "latest"));
        assert_eq!(image_reference("nginx:1.25"), ("nginx", "1.25"));
        assert_eq!(image_reference("registry:5000/app"), ("registry:5000/app", "latest"));
        assert_eq!(image_reference("registry:5000/app:v2"), ("registry:5000/app", "v2"));
        assert_eq!(image_reference("app@sha256:abc"), ("app@sha256:abc", ""));
    }
}
