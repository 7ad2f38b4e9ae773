//! Container runtime abstraction
//!
//! The node agent only needs a narrow slice of a container engine: list
//! what runs, pull, create, start and stop. [`DockerRuntime`](super::DockerRuntime)
//! is the production implementation.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::models::Container;
use crate::Result;

/// A running container as listed by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    /// Runtime name, possibly with a leading `/`
    pub name: String,
}

/// Inspected state of one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    /// Runtime name, possibly with a leading `/`
    pub name: String,
    pub running: bool,
}

/// Everything needed to create one container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `"{port}/tcp"` entries
    pub exposed_ports: Vec<String>,
    /// `NAME=VALUE` entries
    pub env: Vec<String>,
    /// Mount paths inside the container
    pub volumes: Vec<String>,
    pub working_dir: Option<String>,
    pub cmd: Vec<String>,
    /// Exposed port to host port
    pub port_bindings: BTreeMap<String, u16>,
    /// `host:container[:ro]` bind mounts
    pub binds: Vec<String>,
}

impl ContainerSpec {
    /// Translate a manifest container into a runtime spec named `name`.
    /// Volumes are bound from `{volume_root}/{volume name}`.
    pub fn from_container(container: &Container, name: &str, volume_root: &str) -> Self {
        let mut spec = ContainerSpec {
            name: name.to_string(),
            image: container.image.clone(),
            ..Default::default()
        };

        spec.env = container
            .env
            .iter()
            .map(|var| format!("{}={}", var.name, var.value))
            .collect();

        let root = volume_root.trim_end_matches('/');
        for mount in &container.volume_mounts {
            spec.volumes.push(mount.mount_path.clone());
            let mut bind = format!("{}/{}:{}", root, mount.name, mount.mount_path);
            if mount.read_only {
                bind.push_str(":ro");
            }
            spec.binds.push(bind);
        }

        for port in &container.ports {
            let exposed = format!("{}/tcp", port.container_port);
            spec.port_bindings.insert(exposed.clone(), port.host_port);
            spec.exposed_ports.push(exposed);
        }

        if !container.working_dir.is_empty() {
            spec.working_dir = Some(container.working_dir.clone());
        }
        spec.cmd = container.command.split_whitespace().map(str::to_string).collect();
        spec
    }
}

/// Operations the node agent performs against a container engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check the engine is reachable
    async fn ping(&self) -> Result<()>;

    /// Running containers only
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails>;

    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Create a container, returning its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    /// Stop a container, killing it once `grace` elapses
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()>;
}

/// In-memory runtime that records every call
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use crate::Error;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Pull(String),
        Create(String),
        Start(String),
        Stop(String),
    }

    struct FakeContainer {
        id: String,
        running: bool,
        spec: ContainerSpec,
    }

    #[derive(Default)]
    struct State {
        next_id: u64,
        containers: Vec<FakeContainer>,
        calls: Vec<Call>,
        fail_create: bool,
        fail_stop: bool,
        pull_delay: Duration,
        pulls_in_flight: usize,
        max_concurrent_pulls: usize,
    }

    #[derive(Default)]
    pub struct FakeRuntime {
        state: Mutex<State>,
    }

    impl FakeRuntime {
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a running container the agent did not create
        pub fn add_running(&self, name: &str) -> String {
            let mut state = self.state.lock();
            state.next_id += 1;
            let id = format!("c{}", state.next_id);
            state.containers.push(FakeContainer {
                id: id.clone(),
                running: true,
                spec: ContainerSpec { name: name.to_string(), ..Default::default() },
            });
            id
        }

        pub fn fail_create(&self, fail: bool) {
            self.state.lock().fail_create = fail;
        }

        pub fn fail_stop(&self, fail: bool) {
            self.state.lock().fail_stop = fail;
        }

        /// Make every pull take `delay`
        pub fn slow_pulls(&self, delay: Duration) {
            self.state.lock().pull_delay = delay;
        }

        /// Most pulls ever in progress at the same time
        pub fn max_concurrent_pulls(&self) -> usize {
            self.state.lock().max_concurrent_pulls
        }

        pub fn calls(&self) -> Vec<Call> {
            self.state.lock().calls.clone()
        }

        pub fn clear_calls(&self) {
            self.state.lock().calls.clear();
        }

        /// Specs of the running containers
        pub fn running(&self) -> Vec<ContainerSpec> {
            self.state
                .lock()
                .containers
                .iter()
                .filter(|c| c.running)
                .map(|c| c.spec.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
            Ok(self
                .state
                .lock()
                .containers
                .iter()
                .filter(|c| c.running)
                .map(|c| ContainerSummary { id: c.id.clone(), name: format!("/{}", c.spec.name) })
                .collect())
        }

        async fn inspect_container(&self, id: &str) -> Result<ContainerDetails> {
            self.state
                .lock()
                .containers
                .iter()
                .find(|c| c.id == id)
                .map(|c| ContainerDetails { name: format!("/{}", c.spec.name), running: c.running })
                .ok_or_else(|| Error::Runtime(format!("no such container: {}", id)))
        }

        async fn pull_image(&self, image: &str) -> Result<()> {
            let delay = {
                let mut state = self.state.lock();
                state.calls.push(Call::Pull(image.to_string()));
                state.pulls_in_flight += 1;
                state.max_concurrent_pulls = state.max_concurrent_pulls.max(state.pulls_in_flight);
                state.pull_delay
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.state.lock().pulls_in_flight -= 1;
            Ok(())
        }

        async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
            let mut state = self.state.lock();
            state.calls.push(Call::Create(spec.name.clone()));
            if state.fail_create {
                return Err(Error::Runtime("create failed".into()));
            }
            state.next_id += 1;
            let id = format!("c{}", state.next_id);
            state.containers.push(FakeContainer { id: id.clone(), running: false, spec: spec.clone() });
            Ok(id)
        }

        async fn start_container(&self, id: &str) -> Result<()> {
            let mut state = self.state.lock();
            state.calls.push(Call::Start(id.to_string()));
            match state.containers.iter_mut().find(|c| c.id == id) {
                Some(container) => {
                    container.running = true;
                    Ok(())
                }
                None => Err(Error::Runtime(format!("no such container: {}", id))),
            }
        }

        async fn stop_container(&self, id: &str, _grace: Duration) -> Result<()> {
            let mut state = self.state.lock();
            state.calls.push(Call::Stop(id.to_string()));
            if state.fail_stop {
                return Err(Error::Runtime("stop failed".into()));
            }
            if let Some(container) = state.containers.iter_mut().find(|c| c.id == id) {
                container.running = false;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_from_container() {
        let container = Container::new("web", "nginx:1.25")
            .with_command("nginx -g  daemon-off")
            .with_working_dir("/srv")
            .with_env("MODE", "prod")
            .with_port(80, 8080)
            .with_volume("data", "/var/data", true)
            .with_volume("logs", "/var/log", false);
        let spec = ContainerSpec::from_container(&container, "web--m1--1", "/exports/");

        assert_eq!(spec.name, "web--m1--1");
        assert_eq!(spec.image, "nginx:1.25");
        assert_eq!(spec.cmd, vec!["nginx", "-g", "daemon-off"]);
        assert_eq!(spec.working_dir.as_deref(), Some("/srv"));
        assert_eq!(spec.env, vec!["MODE=prod"]);
        assert_eq!(spec.exposed_ports, vec!["80/tcp"]);
        assert_eq!(spec.port_bindings.get("80/tcp"), Some(&8080));
        assert_eq!(spec.volumes, vec!["/var/data", "/var/log"]);
        assert_eq!(spec.binds, vec!["/exports/data:/var/data:ro", "/exports/logs:/var/log"]);
    }

    #[test]
    fn test_spec_without_command() {
        let container = Container::new("web", "nginx");
        let spec = ContainerSpec::from_container(&container, "n", "/exports");
        assert!(spec.cmd.is_empty());
        assert!(spec.working_dir.is_none());
    }
}
