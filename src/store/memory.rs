//! In-process store
//!
//! Backs tests and single-process setups. Mirrors the directory and
//! not-found semantics of the etcd backend. History is not retained, so
//! watches only see changes made after they were established.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use super::{dir_prefix, is_child, Node, Store, Watch, WatchAction, WatchEvent, WATCH_BUFFER};
use crate::{Error, Result};

struct Entry {
    value: String,
    modified_index: u64,
    expires_at: Option<Instant>,
}

struct Subscriber {
    key: String,
    recursive: bool,
    tx: mpsc::Sender<WatchEvent>,
}

impl Subscriber {
    fn matches(&self, key: &str) -> bool {
        key == self.key || (self.recursive && is_child(&dir_prefix(&self.key), key, true))
    }
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    index: u64,
    subscribers: Vec<Subscriber>,
}

impl Inner {
    fn next_index(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    /// Drop expired entries, returning their expiry notifications
    fn purge_expired(&mut self, now: Instant) -> Vec<WatchEvent> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at.is_some_and(|at| at <= now))
            .map(|(k, _)| k.clone())
            .collect();

        expired
            .into_iter()
            .map(|key| {
                self.entries.remove(&key);
                let modified_index = self.next_index();
                WatchEvent {
                    action: WatchAction::Expire,
                    node: Node { key, value: String::new(), modified_index },
                }
            })
            .collect()
    }

    fn put(&mut self, key: &str, value: &str, ttl: Option<Duration>) -> Node {
        let modified_index = self.next_index();
        self.entries.insert(key.to_string(), Entry {
            value: value.to_string(),
            modified_index,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        });
        Node { key: key.to_string(), value: value.to_string(), modified_index }
    }

    /// Hand events to matching subscribers without waiting on any of them.
    ///
    /// A subscriber whose buffer is full is dropped, which closes its
    /// channel; the watcher re-subscribes and re-reads.
    fn deliver(&mut self, events: Vec<WatchEvent>) {
        self.subscribers.retain(|sub| {
            for event in events.iter().filter(|e| sub.matches(&e.node.key)) {
                match sub.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(key = %sub.key, "Watcher fell behind, closing its watch");
                        return false;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return false,
                }
            }
            true
        });
    }
}

/// Store kept entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close every active watch channel, as a backend disconnect would
    pub fn close_watches(&self) {
        self.inner.lock().subscribers.clear();
    }

    /// Number of live watch subscriptions
    pub fn watch_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|s| !s.tx.is_closed());
        inner.subscribers.len()
    }

    /// Run a mutation under the lock and notify watchers of its changes
    fn mutate<T>(&self, f: impl FnOnce(&mut Inner) -> Result<(T, Vec<WatchEvent>)>) -> Result<T> {
        let mut inner = self.inner.lock();
        let mut events = inner.purge_expired(Instant::now());
        let outcome = f(&mut inner);
        if let Ok((_, ref changed)) = outcome {
            events.extend(changed.iter().cloned());
        }
        inner.deliver(events);
        outcome.map(|(value, _)| value)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Node> {
        self.mutate(|inner| {
            let node = inner
                .entries
                .get(key)
                .map(|e| Node {
                    key: key.to_string(),
                    value: e.value.clone(),
                    modified_index: e.modified_index,
                })
                .ok_or_else(|| Error::NotFound(key.to_string()))?;
            Ok((node, Vec::new()))
        })
    }

    async fn list(&self, dir: &str, recursive: bool) -> Result<Vec<Node>> {
        let prefix = dir_prefix(dir);
        self.mutate(|inner| {
            let nodes: Vec<Node> = inner
                .entries
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .filter(|(k, _)| is_child(&prefix, k, recursive))
                .map(|(k, e)| Node {
                    key: k.clone(),
                    value: e.value.clone(),
                    modified_index: e.modified_index,
                })
                .collect();
            if nodes.is_empty() {
                return Err(Error::NotFound(dir.to_string()));
            }
            Ok((nodes, Vec::new()))
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<Node> {
        self.mutate(|inner| {
            let node = inner.put(key, value, ttl);
            let event = WatchEvent { action: WatchAction::Set, node: node.clone() };
            Ok((node, vec![event]))
        })
    }

    async fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<Node> {
        self.mutate(|inner| {
            if inner.entries.contains_key(key) {
                return Err(Error::AlreadyExists(key.to_string()));
            }
            let node = inner.put(key, value, ttl);
            let event = WatchEvent { action: WatchAction::Create, node: node.clone() };
            Ok((node, vec![event]))
        })
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<()> {
        let prefix = dir_prefix(key);
        self.mutate(|inner| {
            let doomed: Vec<String> = inner
                .entries
                .keys()
                .filter(|k| k.as_str() == key || (recursive && is_child(&prefix, k, true)))
                .cloned()
                .collect();
            if doomed.is_empty() {
                return Err(Error::NotFound(key.to_string()));
            }

            let events = doomed
                .into_iter()
                .map(|k| {
                    inner.entries.remove(&k);
                    let modified_index = inner.next_index();
                    WatchEvent {
                        action: WatchAction::Delete,
                        node: Node { key: k, value: String::new(), modified_index },
                    }
                })
                .collect();
            Ok(((), events))
        })
    }

    async fn add_child(&self, dir: &str, value: &str, ttl: Duration) -> Result<Node> {
        let prefix = dir_prefix(dir);
        self.mutate(|inner| {
            let key = format!("{}{:020}", prefix, inner.index + 1);
            let node = inner.put(&key, value, Some(ttl));
            let event = WatchEvent { action: WatchAction::Create, node: node.clone() };
            Ok((node, vec![event]))
        })
    }

    async fn watch(&self, key: &str, _since_index: u64, recursive: bool) -> Result<Watch> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        self.inner.lock().subscribers.push(Subscriber {
            key: key.trim_end_matches('/').to_string(),
            recursive,
            tx,
        });
        Ok(Watch::new(rx, None))
    }
}
