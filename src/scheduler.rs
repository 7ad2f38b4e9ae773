//! Machine selection for new tasks
//!
//! A scheduler only picks a machine; binding the task there is the
//! registry's job. Every policy fails with [`Error::NoMachineAvailable`]
//! when it has nothing to choose from.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::models::Task;
use crate::registry::Registry;
use crate::{Error, Result};

/// Default number of tasks a machine takes under first-fit
pub const DEFAULT_CAPACITY: usize = 10;

/// Chooses the machine a task runs on
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule(&self, task: &Task) -> Result<String>;
}

/// Placement policy selectable from configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerKind {
    Random,
    RoundRobin,
    #[default]
    FirstFit,
}

impl std::fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerKind::Random => write!(f, "random"),
            SchedulerKind::RoundRobin => write!(f, "round-robin"),
            SchedulerKind::FirstFit => write!(f, "first-fit"),
        }
    }
}

/// Build the scheduler for `kind` over the registry's machines
pub fn build(kind: SchedulerKind, registry: Arc<Registry>, capacity: usize) -> Arc<dyn Scheduler> {
    let machines = registry.machines().to_vec();
    match kind {
        SchedulerKind::Random => Arc::new(RandomScheduler::new(machines)),
        SchedulerKind::RoundRobin => Arc::new(RoundRobinScheduler::new(machines)),
        SchedulerKind::FirstFit => Arc::new(FirstFitScheduler::new(registry, capacity)),
    }
}

/// Uniform random choice
pub struct RandomScheduler {
    machines: Vec<String>,
    rng: Mutex<StdRng>,
}

impl RandomScheduler {
    pub fn new(machines: Vec<String>) -> Self {
        Self {
            machines,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic choices, for tests
    pub fn with_seed(machines: Vec<String>, seed: u64) -> Self {
        Self {
            machines,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

#[async_trait]
impl Scheduler for RandomScheduler {
    async fn schedule(&self, task: &Task) -> Result<String> {
        if self.machines.is_empty() {
            return Err(Error::NoMachineAvailable(task.id.clone()));
        }
        let index = self.rng.lock().gen_range(0..self.machines.len());
        Ok(self.machines[index].clone())
    }
}

/// Strict rotation starting at the first machine
pub struct RoundRobinScheduler {
    machines: Vec<String>,
    next: AtomicUsize,
}

impl RoundRobinScheduler {
    pub fn new(machines: Vec<String>) -> Self {
        Self {
            machines,
            next: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Scheduler for RoundRobinScheduler {
    async fn schedule(&self, task: &Task) -> Result<String> {
        if self.machines.is_empty() {
            return Err(Error::NoMachineAvailable(task.id.clone()));
        }
        let turn = self.next.fetch_add(1, Ordering::Relaxed);
        Ok(self.machines[turn % self.machines.len()].clone())
    }
}

/// First machine, in configured order, with spare capacity and none of
/// the task's host ports already taken
pub struct FirstFitScheduler {
    registry: Arc<Registry>,
    capacity: usize,
}

impl FirstFitScheduler {
    pub fn new(registry: Arc<Registry>, capacity: usize) -> Self {
        Self { registry, capacity }
    }
}

#[async_trait]
impl Scheduler for FirstFitScheduler {
    async fn schedule(&self, task: &Task) -> Result<String> {
        let wanted: HashSet<u16> = task.host_ports().collect();

        for machine in self.registry.machines() {
            let bound = self.registry.list_machine_tasks(machine).await?;
            if bound.len() >= self.capacity {
                tracing::debug!(machine = %machine, tasks = bound.len(), "Machine at capacity");
                continue;
            }
            let conflict = bound.iter().flat_map(|t| t.host_ports()).any(|p| wanted.contains(&p));
            if conflict {
                tracing::debug!(machine = %machine, task = %task.id, "Host port already bound");
                continue;
            }
            return Ok(machine.clone());
        }
        Err(Error::NoMachineAvailable(task.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Container, ContainerManifest};
    use crate::store::MemoryStore;

    fn machines(names: &[&str]) -> Vec<String> {
        names.iter().map(|m| m.to_string()).collect()
    }

    fn port_task(id: &str, host_port: u16) -> Task {
        Task::new(id).with_manifest(
            ContainerManifest::new(id).with_container(Container::new("web", "nginx").with_port(80, host_port)),
        )
    }

    #[tokio::test]
    async fn test_empty_machine_list_fails() {
        let task = Task::new("t1");
        assert!(matches!(
            RandomScheduler::new(vec![]).schedule(&task).await,
            Err(Error::NoMachineAvailable(_))
        ));
        assert!(matches!(
            RoundRobinScheduler::new(vec![]).schedule(&task).await,
            Err(Error::NoMachineAvailable(_))
        ));
        let registry = Arc::new(Registry::new(Arc::new(MemoryStore::new()), vec![]));
        assert!(matches!(
            FirstFitScheduler::new(registry, DEFAULT_CAPACITY).schedule(&task).await,
            Err(Error::NoMachineAvailable(_))
        ));
    }

    #[tokio::test]
    async fn test_random_picks_configured_machines() {
        let scheduler = RandomScheduler::with_seed(machines(&["h1", "h2", "h3"]), 7);
        for _ in 0..20 {
            let machine = scheduler.schedule(&Task::new("t")).await.unwrap();
            assert!(["h1", "h2", "h3"].contains(&machine.as_str()));
        }
    }

    #[tokio::test]
    async fn test_random_is_reproducible_with_seed() {
        let a = RandomScheduler::with_seed(machines(&["h1", "h2", "h3"]), 42);
        let b = RandomScheduler::with_seed(machines(&["h1", "h2", "h3"]), 42);
        for _ in 0..10 {
            let task = Task::new("t");
            assert_eq!(a.schedule(&task).await.unwrap(), b.schedule(&task).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_round_robin_rotates_from_first() {
        let scheduler = RoundRobinScheduler::new(machines(&["h1", "h2"]));
        let task = Task::new("t");
        let picks = [
            scheduler.schedule(&task).await.unwrap(),
            scheduler.schedule(&task).await.unwrap(),
            scheduler.schedule(&task).await.unwrap(),
        ];
        assert_eq!(picks, ["h1", "h2", "h1"]);
    }

    #[tokio::test]
    async fn test_first_fit_respects_capacity() {
        let registry = Arc::new(Registry::new(Arc::new(MemoryStore::new()), machines(&["h1", "h2"])));
        registry.create_task("h1", &Task::new("a")).await.unwrap();

        let scheduler = FirstFitScheduler::new(registry.clone(), 1);
        assert_eq!(scheduler.schedule(&Task::new("b")).await.unwrap(), "h2");

        registry.create_task("h2", &Task::new("b")).await.unwrap();
        assert!(matches!(
            scheduler.schedule(&Task::new("c")).await,
            Err(Error::NoMachineAvailable(_))
        ));
    }

    #[tokio::test]
    async fn test_first_fit_avoids_host_port_conflicts() {
        let registry = Arc::new(Registry::new(Arc::new(MemoryStore::new()), machines(&["h1", "h2"])));
        registry.create_task("h1", &port_task("a", 8080)).await.unwrap();

        let scheduler = FirstFitScheduler::new(registry, DEFAULT_CAPACITY);
        assert_eq!(scheduler.schedule(&port_task("b", 8080)).await.unwrap(), "h2");
        assert_eq!(scheduler.schedule(&port_task("c", 9090)).await.unwrap(), "h1");
        assert_eq!(scheduler.schedule(&Task::new("d")).await.unwrap(), "h1");
    }
}
