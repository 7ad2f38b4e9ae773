//! Node agent
//!
//! Keeps the containers running on one host consistent with the manifest
//! list the registry keeps for it. Each container the agent creates is
//! named after its (manifest, container) pair (see [`naming`]), so the
//! running set can be diffed against the desired set without any local
//! bookkeeping.

mod docker;
pub mod naming;
mod runtime;
mod watch;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;

use crate::config::KubeletConfig;
use crate::models::{Container, ContainerManifest, Event};
use crate::registry::Registry;
use crate::store::Store;
use crate::{Error, Result};

pub use docker::DockerRuntime;
pub use naming::{build_container_name, parse_container_name, ContainerIdentity};
pub use runtime::{ContainerDetails, ContainerRuntime, ContainerSpec, ContainerSummary};
pub use watch::{classify, WatchStep};

/// Converges a host towards a manifest list
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn sync_manifests(&self, manifests: &[ContainerManifest]) -> Result<()>;
}

/// Runtime names come back with a leading `/`
fn canonical_name(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}

pub struct Kubelet {
    config: KubeletConfig,
    /// Scoped to this host
    registry: Registry,
    runtime: Arc<dyn ContainerRuntime>,
    /// Image pulls run one at a time
    pull_lock: Mutex<()>,
}

impl Kubelet {
    pub fn new(config: KubeletConfig, store: Arc<dyn Store>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let registry = Registry::new(store, vec![config.hostname.clone()]);
        Self {
            config,
            registry,
            runtime,
            pull_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &KubeletConfig {
        &self.config
    }

    /// Run the agent forever. Fails only if the container runtime is
    /// unreachable at startup.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.runtime
            .ping()
            .await
            .map_err(|e| Error::Runtime(format!("container runtime unreachable: {}", e)))?;

        tracing::info!(host = %self.config.hostname, "Kubelet starting");

        let (tx, rx) = mpsc::channel(1);
        let watcher = Arc::clone(&self);
        tokio::spawn(async move { watcher.sync_and_watch(tx).await });

        self.run_sync_loop(rx, self.as_ref()).await;
        Ok(())
    }

    /// Converge on every new manifest list, and on the last one at least
    /// every `sync_frequency`.
    pub async fn run_sync_loop(&self, mut updates: mpsc::Receiver<Vec<ContainerManifest>>, handler: &dyn SyncHandler) {
        let mut current: Vec<ContainerManifest> = Vec::new();
        let mut open = true;

        loop {
            tokio::select! {
                update = updates.recv(), if open => match update {
                    Some(manifests) => current = manifests,
                    None => {
                        tracing::warn!(host = %self.config.hostname, "Manifest source closed, syncing on timer only");
                        open = false;
                        continue;
                    }
                },
                _ = sleep(self.config.sync_frequency) => {}
            }

            if let Err(e) = handler.sync_manifests(&current).await {
                tracing::error!(host = %self.config.hostname, error = %e, "Failed to sync containers");
            }
        }
    }

    /// Runtime name of the running container for this pair, if any
    async fn find_container(&self, manifest: &ContainerManifest, container: &Container) -> Result<Option<String>> {
        for summary in self.runtime.list_containers().await? {
            let identity = parse_container_name(&summary.name);
            if identity.manifest_id != manifest.id || identity.container_name != container.name {
                continue;
            }
            let details = self.runtime.inspect_container(&summary.id).await?;
            if details.running {
                return Ok(Some(canonical_name(&details.name).to_string()));
            }
        }
        Ok(None)
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let _guard = self.pull_lock.lock().await;
        self.runtime.pull_image(image).await
    }

    /// Pull, create and start `container` under `name`
    async fn run_container(&self, container: &Container, name: &str) -> Result<()> {
        self.pull_image(&container.image).await?;

        let spec = ContainerSpec::from_container(container, name, &self.config.volume_root);
        let id = self.runtime.create_container(&spec).await?;
        self.runtime.start_container(&id).await?;

        tracing::info!(container = %name, id = %id, image = %container.image, "Container started");
        Ok(())
    }

    /// Stop a container and record a STOP event for it
    async fn kill_container(&self, summary: &ContainerSummary) -> Result<()> {
        let stopped = self
            .runtime
            .stop_container(&summary.id, self.config.stop_grace_period)
            .await;

        let identity = parse_container_name(&summary.name);
        let event = Event::stopped(identity.manifest_id, identity.container_name);
        if let Err(e) = self.registry.record_event(&event, self.config.event_ttl).await {
            tracing::warn!(container = %summary.name, error = %e, "Failed to record stop event");
        }

        stopped
    }
}

#[async_trait]
impl SyncHandler for Kubelet {
    /// One convergence pass.
    ///
    /// Every container of every manifest ends up running under a derivable
    /// name, then every running container outside that set is stopped.
    /// A failed creation still claims its name so the rest of the pass is
    /// unaffected. Returns the last stop failure, if any.
    async fn sync_manifests(&self, manifests: &[ContainerManifest]) -> Result<()> {
        let mut desired: HashSet<String> = HashSet::new();

        for manifest in manifests {
            for container in &manifest.containers {
                match self.find_container(manifest, container).await {
                    Ok(Some(name)) => {
                        tracing::trace!(container = %name, "Container already running");
                        desired.insert(name);
                    }
                    Ok(None) => {
                        let name = build_container_name(&manifest.id, &container.name);
                        tracing::info!(manifest = %manifest.id, container = %container.name, "Creating container");
                        if let Err(e) = self.run_container(container, &name).await {
                            tracing::error!(container = %name, error = %e, "Failed to create container");
                        }
                        desired.insert(name);
                    }
                    Err(e) => {
                        tracing::warn!(manifest = %manifest.id, container = %container.name, error = %e, "Failed to look up container, skipping");
                    }
                }
            }
        }

        let mut result = Ok(());
        for summary in self.runtime.list_containers().await? {
            if desired.contains(canonical_name(&summary.name)) {
                continue;
            }
            tracing::info!(container = %summary.name, "Stopping container");
            if let Err(e) = self.kill_container(&summary).await {
                tracing::error!(container = %summary.name, error = %e, "Failed to stop container");
                result = Err(e);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::runtime::fake::{Call, FakeRuntime};
    use super::*;
    use crate::store::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, Arc<FakeRuntime>, Kubelet) {
        let store = Arc::new(MemoryStore::new());
        let runtime = Arc::new(FakeRuntime::new());
        let config = KubeletConfig::builder().hostname("h1").build();
        let kubelet = Kubelet::new(config, store.clone(), runtime.clone());
        (store, runtime, kubelet)
    }

    fn web_manifest() -> ContainerManifest {
        ContainerManifest::new("m1").with_container(Container::new("web", "nginx").with_port(80, 8080))
    }

    #[tokio::test]
    async fn test_single_container_is_created_and_started() {
        let (_, runtime, kubelet) = setup();
        kubelet.sync_manifests(&[web_manifest()]).await.unwrap();

        let calls = runtime.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], Call::Pull("nginx".into()));
        let Call::Create(name) = &calls[1] else { panic!("expected create, got {:?}", calls[1]) };
        assert!(matches!(calls[2], Call::Start(_)));

        let identity = parse_container_name(name);
        assert_eq!(identity.manifest_id, "m1");
        assert_eq!(identity.container_name, "web");

        let running = runtime.running();
        assert_eq!(running[0].port_bindings.get("80/tcp"), Some(&8080));
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let (_, runtime, kubelet) = setup();
        let manifests = vec![
            web_manifest(),
            ContainerManifest::new("m2")
                .with_container(Container::new("a", "redis"))
                .with_container(Container::new("b", "redis")),
        ];

        kubelet.sync_manifests(&manifests).await.unwrap();
        assert_eq!(runtime.running().len(), 3);

        runtime.clear_calls();
        kubelet.sync_manifests(&manifests).await.unwrap();
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_extraneous_containers_are_stopped_with_event() {
        let (store, runtime, kubelet) = setup();
        let stray = build_container_name("old", "worker");
        runtime.add_running(&stray);
        runtime.add_running("unmanaged");

        kubelet.sync_manifests(&[web_manifest()]).await.unwrap();

        let running = runtime.running();
        assert_eq!(running.len(), 1);
        assert_eq!(parse_container_name(&running[0].name).manifest_id, "m1");

        let events = store.list("/events/worker", false).await.unwrap();
        let event: Event = serde_json::from_str(&events[0].value).unwrap();
        assert_eq!(event.event, "STOP");
        assert_eq!(event.manifest.id, "old");

        // foreign names decode to an empty manifest id
        let events = store.list("/events/unmanaged", false).await.unwrap();
        let event: Event = serde_json::from_str(&events[0].value).unwrap();
        assert_eq!(event.event, "STOP");
        assert_eq!(event.manifest.id, "");
        assert_eq!(event.container.name, "unmanaged");
    }

    #[tokio::test]
    async fn test_fetches_manifests_kept_by_registry() {
        let (store, _, kubelet) = setup();
        assert!(kubelet.fetch_manifests().await.unwrap().is_empty());

        let registry = Registry::new(store, vec!["h1".into()]);
        registry.update_manifests("h1", &[web_manifest()]).await.unwrap();
        assert_eq!(kubelet.fetch_manifests().await.unwrap(), vec![web_manifest()]);
    }

    #[tokio::test]
    async fn test_empty_manifest_list_stops_everything() {
        let (_, runtime, kubelet) = setup();
        kubelet.sync_manifests(&[web_manifest()]).await.unwrap();
        kubelet.sync_manifests(&[]).await.unwrap();
        assert!(runtime.running().is_empty());
    }

    #[tokio::test]
    async fn test_failed_creation_keeps_going() {
        let (_, runtime, kubelet) = setup();
        runtime.fail_create(true);
        let manifest = ContainerManifest::new("m1")
            .with_container(Container::new("a", "nginx"))
            .with_container(Container::new("b", "nginx"));

        kubelet.sync_manifests(&[manifest]).await.unwrap();

        let creates = runtime.calls().iter().filter(|c| matches!(c, Call::Create(_))).count();
        assert_eq!(creates, 2);
        assert!(runtime.running().is_empty());
    }

    #[tokio::test]
    async fn test_stop_failure_is_returned() {
        let (_, runtime, kubelet) = setup();
        runtime.add_running("stray");
        runtime.fail_stop(true);

        let err = kubelet.sync_manifests(&[]).await.unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_pulls_run_one_at_a_time() {
        let (_, runtime, kubelet) = setup();
        let pull = std::time::Duration::from_secs(5);
        runtime.slow_pulls(pull);
        let first = [ContainerManifest::new("m1").with_container(Container::new("web", "nginx"))];
        let second = [ContainerManifest::new("m2").with_container(Container::new("cache", "redis"))];

        let start = tokio::time::Instant::now();
        let (a, b) = tokio::join!(kubelet.sync_manifests(&first), kubelet.sync_manifests(&second));
        a.unwrap();
        b.unwrap();

        let pulls = runtime.calls().iter().filter(|c| matches!(c, Call::Pull(_))).count();
        assert_eq!(pulls, 2);
        assert_eq!(runtime.max_concurrent_pulls(), 1);
        assert!(start.elapsed() >= pull * 2);
    }

    struct Recorder(parking_lot::Mutex<Vec<usize>>);

    #[async_trait]
    impl SyncHandler for Recorder {
        async fn sync_manifests(&self, manifests: &[ContainerManifest]) -> Result<()> {
            self.0.lock().push(manifests.len());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_loop_runs_on_updates_and_timer() {
        let (_, _, kubelet) = setup();
        let kubelet = Arc::new(kubelet);
        let recorder = Arc::new(Recorder(parking_lot::Mutex::new(Vec::new())));
        let (tx, rx) = mpsc::channel(1);

        let handle = tokio::spawn({
            let kubelet = kubelet.clone();
            let recorder = recorder.clone();
            async move { kubelet.run_sync_loop(rx, recorder.as_ref()).await }
        });

        tx.send(vec![web_manifest(), web_manifest()]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        assert_eq!(*recorder.0.lock(), vec![2]);

        // no update: the last list is synced again after sync_frequency
        tokio::time::sleep(kubelet.config().sync_frequency).await;
        assert_eq!(*recorder.0.lock(), vec![2, 2]);

        handle.abort();
    }
}
