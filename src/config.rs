//! Process configuration with builder pattern

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::scheduler::{SchedulerKind, DEFAULT_CAPACITY};

/// Host directory volume mounts are bound from
pub const DEFAULT_VOLUME_ROOT: &str = "/exports";

/// Node agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeletConfig {
    /// Identity of this host in the registry
    pub hostname: String,
    pub etcd_servers: Vec<String>,
    /// Upper bound between two reconciliations
    pub sync_frequency: Duration,
    /// Lifetime of one watch subscription before it is re-established
    pub watch_timeout: Duration,
    /// Wait between attempts to read the initial manifest list
    pub store_retry_interval: Duration,
    /// Grace period given to containers being stopped
    pub stop_grace_period: Duration,
    pub event_ttl: Duration,
    pub volume_root: String,
}

impl Default for KubeletConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            etcd_servers: Vec::new(),
            sync_frequency: Duration::from_secs(10),
            watch_timeout: Duration::from_secs(30),
            store_retry_interval: Duration::from_secs(30),
            stop_grace_period: Duration::from_secs(10),
            event_ttl: Duration::from_secs(48 * 60 * 60),
            volume_root: DEFAULT_VOLUME_ROOT.to_string(),
        }
    }
}

impl KubeletConfig {
    pub fn builder() -> KubeletConfigBuilder {
        KubeletConfigBuilder::default()
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(crate::Error::Config("hostname cannot be empty".into()));
        }
        if self.etcd_servers.is_empty() {
            return Err(crate::Error::Config("at least one etcd server is required".into()));
        }
        if self.sync_frequency.is_zero() || self.watch_timeout.is_zero() {
            return Err(crate::Error::Config("sync and watch intervals must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct KubeletConfigBuilder {
    config: KubeletConfig,
}

impl KubeletConfigBuilder {
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config.hostname = hostname.into().trim().to_string();
        self
    }

    pub fn etcd_servers(mut self, servers: Vec<String>) -> Self {
        self.config.etcd_servers = servers;
        self
    }

    pub fn sync_frequency(mut self, interval: Duration) -> Self {
        self.config.sync_frequency = interval;
        self
    }

    pub fn watch_timeout(mut self, timeout: Duration) -> Self {
        self.config.watch_timeout = timeout;
        self
    }

    pub fn store_retry_interval(mut self, interval: Duration) -> Self {
        self.config.store_retry_interval = interval;
        self
    }

    pub fn stop_grace_period(mut self, grace: Duration) -> Self {
        self.config.stop_grace_period = grace;
        self
    }

    pub fn volume_root(mut self, root: impl Into<String>) -> Self {
        self.config.volume_root = root.into();
        self
    }

    pub fn build(self) -> KubeletConfig {
        self.config
    }

    pub fn build_validated(self) -> crate::Result<KubeletConfig> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}

/// Replication manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerManagerConfig {
    pub etcd_servers: Vec<String>,
    /// Machines tasks may be scheduled on
    pub machines: Vec<String>,
    /// Period of the full controller scan
    pub sync_interval: Duration,
    /// Pause between two replica creations of one reconciliation
    pub creation_delay: Duration,
    /// Wait before re-subscribing after the controller watch closes
    pub watch_retry_interval: Duration,
    pub scheduler: SchedulerKind,
    /// Tasks per machine under first-fit
    pub capacity: usize,
}

impl Default for ControllerManagerConfig {
    fn default() -> Self {
        Self {
            etcd_servers: Vec::new(),
            machines: Vec::new(),
            sync_interval: Duration::from_secs(10),
            creation_delay: Duration::from_secs(1),
            watch_retry_interval: Duration::from_secs(10),
            scheduler: SchedulerKind::default(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl ControllerManagerConfig {
    pub fn builder() -> ControllerManagerConfigBuilder {
        ControllerManagerConfigBuilder::default()
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.etcd_servers.is_empty() {
            return Err(crate::Error::Config("at least one etcd server is required".into()));
        }
        if self.machines.is_empty() {
            return Err(crate::Error::Config("at least one machine is required".into()));
        }
        if self.capacity < 1 {
            return Err(crate::Error::Config("capacity must be at least 1".into()));
        }
        if self.sync_interval.is_zero() {
            return Err(crate::Error::Config("sync interval must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct ControllerManagerConfigBuilder {
    config: ControllerManagerConfig,
}

impl ControllerManagerConfigBuilder {
    pub fn etcd_servers(mut self, servers: Vec<String>) -> Self {
        self.config.etcd_servers = servers;
        self
    }

    pub fn machines(mut self, machines: Vec<String>) -> Self {
        self.config.machines = machines;
        self
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.config.sync_interval = interval;
        self
    }

    pub fn creation_delay(mut self, delay: Duration) -> Self {
        self.config.creation_delay = delay;
        self
    }

    pub fn watch_retry_interval(mut self, interval: Duration) -> Self {
        self.config.watch_retry_interval = interval;
        self
    }

    pub fn scheduler(mut self, kind: SchedulerKind) -> Self {
        self.config.scheduler = kind;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    pub fn build(self) -> ControllerManagerConfig {
        self.config
    }

    pub fn build_validated(self) -> crate::Result<ControllerManagerConfig> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}

/// Split a comma separated flag value, dropping blanks
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
