//! Distributed key/value store access
//!
//! Keys are `/`-delimited paths. A "directory" is any prefix with at least one
//! key under it; listing a directory that has no keys fails with
//! [`Error::NotFound`](crate::Error::NotFound), the same as getting a missing
//! key, so callers can treat absence as empty state.
//!
//! Watches deliver full values on a channel until stopped. The channel closes
//! whenever the backend loses its subscription; a closed channel means
//! "subscribe again", never "no more changes".

mod etcd;
mod memory;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::Result;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;

/// Buffer between a backend's subscription and the watch consumer
pub(crate) const WATCH_BUFFER: usize = 16;

/// A stored key and its value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub key: String,
    pub value: String,
    /// Store revision of the last modification
    pub modified_index: u64,
}

/// What happened to a watched key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    Set,
    Create,
    Delete,
    Expire,
}

impl std::fmt::Display for WatchAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchAction::Set => write!(f, "set"),
            WatchAction::Create => write!(f, "create"),
            WatchAction::Delete => write!(f, "delete"),
            WatchAction::Expire => write!(f, "expire"),
        }
    }
}

/// A single change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub action: WatchAction,
    /// The node after the change; for deletions, the key with an empty value
    pub node: Node,
}

/// Handle to an active watch: an event channel plus a stop signal.
///
/// Dropping the handle stops the watch.
pub struct Watch {
    events: mpsc::Receiver<WatchEvent>,
    stop: Option<oneshot::Sender<()>>,
}

impl Watch {
    pub fn new(events: mpsc::Receiver<WatchEvent>, stop: Option<oneshot::Sender<()>>) -> Self {
        Self { events, stop }
    }

    /// Next change, or `None` once the subscription is gone
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    /// Tear the subscription down. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.events.close();
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Key/value operations the control plane needs from its coordination store
#[async_trait]
pub trait Store: Send + Sync {
    /// Get a single key; missing keys fail with `Error::NotFound`
    async fn get(&self, key: &str) -> Result<Node>;

    /// List the keys under a directory, direct children only unless `recursive`
    async fn list(&self, dir: &str, recursive: bool) -> Result<Vec<Node>>;

    /// Write a key unconditionally
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<Node>;

    /// Write a key that must not exist yet; fails with `Error::AlreadyExists`
    async fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<Node>;

    /// Delete a key, and everything under it when `recursive`
    async fn delete(&self, key: &str, recursive: bool) -> Result<()>;

    /// Append a uniquely named child under `dir` that expires after `ttl`
    async fn add_child(&self, dir: &str, value: &str, ttl: Duration) -> Result<Node>;

    /// Watch a key (or everything under it when `recursive`) starting at
    /// `since_index`; 0 means "changes from now on"
    async fn watch(&self, key: &str, since_index: u64, recursive: bool) -> Result<Watch>;
}

/// Directory prefix for children of `dir`
pub(crate) fn dir_prefix(dir: &str) -> String {
    format!("{}/", dir.trim_end_matches('/'))
}

/// Whether `key` sits under `dir`, directly unless `recursive`
pub(crate) fn is_child(dir_prefix: &str, key: &str, recursive: bool) -> bool {
    match key.strip_prefix(dir_prefix) {
        Some(rest) if !rest.is_empty() => recursive || !rest.contains('/'),
        _ => false,
    }
}
