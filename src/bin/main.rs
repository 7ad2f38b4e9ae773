//! kubelite CLI - node agent and controller manager

use clap::{Parser, Subcommand};
use kubelite::config::{split_list, ControllerManagerConfig, KubeletConfig};
use kubelite::scheduler::{self, SchedulerKind, DEFAULT_CAPACITY};
use kubelite::{
    DockerRuntime, EtcdStore, Error, Kubelet, LocalClient, Registry, ReplicationManager, Result,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "kubelite")]
#[command(about = "Minimal container cluster control plane")]
#[command(version)]
struct Cli {
    /// etcd endpoints, comma separated
    #[arg(long, global = true, env = "ETCD_SERVERS")]
    etcd_servers: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep this host's containers in line with its manifest list
    Kubelet {
        /// Use this name instead of `hostname -f`
        #[arg(long, env = "HOSTNAME_OVERRIDE")]
        hostname_override: Option<String>,
        /// Max seconds between two syncs
        #[arg(long, default_value = "10")]
        sync_frequency: u64,
        /// Host directory volumes are bound from
        #[arg(long, default_value = kubelite::config::DEFAULT_VOLUME_ROOT)]
        volume_root: String,
    },
    /// Run the replication manager
    ControllerManager {
        /// Machines tasks may be scheduled on, comma separated
        #[arg(long, env = "MACHINES")]
        machines: String,
        /// Placement policy
        #[arg(long, value_enum, default_value_t = SchedulerKind::FirstFit)]
        scheduler: SchedulerKind,
        /// Tasks per machine under first-fit
        #[arg(long, default_value_t = DEFAULT_CAPACITY)]
        capacity: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let etcd_servers = split_list(&cli.etcd_servers);

    match cli.command {
        Commands::Kubelet {
            hostname_override,
            sync_frequency,
            volume_root,
        } => {
            let hostname = match hostname_override {
                Some(name) if !name.trim().is_empty() => name,
                _ => hostname().await?,
            };
            let config = KubeletConfig::builder()
                .hostname(hostname)
                .etcd_servers(etcd_servers)
                .sync_frequency(Duration::from_secs(sync_frequency))
                .volume_root(volume_root)
                .build_validated()?;
            run_kubelet(config).await
        }
        Commands::ControllerManager {
            machines,
            scheduler,
            capacity,
        } => {
            let config = ControllerManagerConfig::builder()
                .etcd_servers(etcd_servers)
                .machines(split_list(&machines))
                .scheduler(scheduler)
                .capacity(capacity)
                .build_validated()?;
            run_controller_manager(config).await
        }
    }
}

/// Fully qualified name of this host
async fn hostname() -> Result<String> {
    let output = tokio::process::Command::new("hostname").arg("-f").output().await?;
    if !output.status.success() {
        return Err(Error::Config(format!(
            "couldn't determine hostname: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn run_kubelet(config: KubeletConfig) -> Result<()> {
    let store = Arc::new(EtcdStore::connect(&config.etcd_servers).await?);
    let runtime = Arc::new(DockerRuntime::connect()?);

    tracing::info!(host = %config.hostname, "Starting kubelet");
    let kubelet = Arc::new(Kubelet::new(config, store, runtime));
    kubelet.run().await
}

async fn run_controller_manager(config: ControllerManagerConfig) -> Result<()> {
    let store = Arc::new(EtcdStore::connect(&config.etcd_servers).await?);
    let registry = Arc::new(Registry::new(store, config.machines.clone()));
    let scheduler = scheduler::build(config.scheduler, Arc::clone(&registry), config.capacity);
    let client = Arc::new(LocalClient::new(Arc::clone(&registry), scheduler));

    tracing::info!(scheduler = %config.scheduler, machines = config.machines.len(), "Starting controller manager");
    let manager = Arc::new(ReplicationManager::new(registry, client, config));
    manager.run().await;
    Ok(())
}
