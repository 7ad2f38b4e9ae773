//! kubelite - a minimal container cluster control plane
//!
//! Two cooperating processes share cluster state through etcd:
//!
//! - **Kubelet** - the node agent. Watches its host's manifest list and
//!   converges the containers running under Docker towards it.
//! - **Replication manager** - keeps the number of live tasks matching each
//!   replication controller at its declared replica count, scheduling new
//!   tasks onto machines and binding them through the registry.
//!
//! Both are level-triggered: every pass recomputes the full diff between
//! desired and observed state, so missed notifications only delay
//! convergence.
//!
//! # Example
//!
//! ```no_run
//! use kubelite::models::ReplicationController;
//! use kubelite::scheduler::RoundRobinScheduler;
//! use kubelite::{ClusterClient, LocalClient, MemoryStore, Registry};
//! use std::sync::Arc;
//!
//! # async fn example() -> kubelite::Result<()> {
//! let machines = vec!["node-1".to_string(), "node-2".to_string()];
//! let registry = Arc::new(Registry::new(Arc::new(MemoryStore::new()), machines.clone()));
//! let client = LocalClient::new(registry, Arc::new(RoundRobinScheduler::new(machines)));
//!
//! let controller = ReplicationController::new("web", 3).with_selector("app", "web");
//! client.create_replication_controller(&controller).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod kubelet;
pub mod models;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use client::{ClusterClient, LocalClient};
pub use config::{ControllerManagerConfig, KubeletConfig};
pub use controller::{ReplicationManager, SyncOutcome};
pub use error::{Error, Result};
pub use kubelet::{ContainerRuntime, DockerRuntime, Kubelet, SyncHandler};
pub use registry::Registry;
pub use scheduler::Scheduler;
pub use store::{EtcdStore, MemoryStore, Store};
