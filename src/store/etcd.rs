//! etcd v3 backend
//!
//! Directories are emulated with key prefixes. TTLs are implemented with
//! one lease per write.

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, DeleteOptions, EventType, GetOptions, KeyValue,
    LeaseGrantOptions, PutOptions, Txn, TxnOp, WatchOptions,
};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::{dir_prefix, is_child, Node, Store, Watch, WatchAction, WatchEvent, WATCH_BUFFER};
use crate::{Error, Result};

/// Store backed by an etcd cluster
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Connect to the given endpoints
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::Config("no etcd endpoints given".to_string()));
        }

        let options = ConnectOptions::new()
            .with_timeout(Duration::from_secs(5))
            .with_keep_alive(Duration::from_secs(30), Duration::from_secs(10));

        let client = Client::connect(endpoints, Some(options))
            .await
            .map_err(|e| Error::Store(format!("Failed to connect to etcd: {}", e)))?;

        tracing::info!(endpoints = ?endpoints, "Connected to etcd");
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    async fn put_options(&self, ttl: Option<Duration>) -> Result<Option<PutOptions>> {
        let Some(ttl) = ttl else {
            return Ok(None);
        };
        // etcd leases have whole-second granularity
        let seconds = ttl.as_secs().max(1) as i64;
        let lease = self
            .client
            .clone()
            .lease_grant(seconds, Some(LeaseGrantOptions::new()))
            .await?;
        Ok(Some(PutOptions::new().with_lease(lease.id())))
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<Node> {
        let options = self.put_options(ttl).await?;
        let response = self.client.clone().put(key, value, options).await?;
        Ok(Node {
            key: key.to_string(),
            value: value.to_string(),
            modified_index: response.header().map(|h| h.revision() as u64).unwrap_or_default(),
        })
    }
}

fn to_node(kv: &KeyValue) -> Result<Node> {
    Ok(Node {
        key: kv.key_str()?.to_string(),
        value: kv.value_str()?.to_string(),
        modified_index: kv.mod_revision() as u64,
    })
}

#[async_trait]
impl Store for EtcdStore {
    async fn get(&self, key: &str) -> Result<Node> {
        let response = self.client.clone().get(key, None).await?;
        match response.kvs().first() {
            Some(kv) => to_node(kv),
            None => Err(Error::NotFound(key.to_string())),
        }
    }

    async fn list(&self, dir: &str, recursive: bool) -> Result<Vec<Node>> {
        let prefix = dir_prefix(dir);
        let response = self
            .client
            .clone()
            .get(prefix.as_str(), Some(GetOptions::new().with_prefix()))
            .await?;

        let mut nodes = Vec::new();
        for kv in response.kvs() {
            let node = to_node(kv)?;
            if is_child(&prefix, &node.key, recursive) {
                nodes.push(node);
            }
        }
        if nodes.is_empty() {
            return Err(Error::NotFound(dir.to_string()));
        }
        Ok(nodes)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<Node> {
        self.put(key, value, ttl).await
    }

    async fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<Node> {
        let options = self.put_options(ttl).await?;
        let txn = Txn::new()
            .when(vec![Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(key, value, options)]);

        let response = self.client.clone().txn(txn).await?;
        if !response.succeeded() {
            return Err(Error::AlreadyExists(key.to_string()));
        }
        Ok(Node {
            key: key.to_string(),
            value: value.to_string(),
            modified_index: response.header().map(|h| h.revision() as u64).unwrap_or_default(),
        })
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<()> {
        let mut client = self.client.clone();
        let mut deleted = client.delete(key, None).await?.deleted();
        if recursive {
            deleted += client
                .delete(dir_prefix(key), Some(DeleteOptions::new().with_prefix()))
                .await?
                .deleted();
        }
        if deleted == 0 {
            return Err(Error::NotFound(key.to_string()));
        }
        Ok(())
    }

    async fn add_child(&self, dir: &str, value: &str, ttl: Duration) -> Result<Node> {
        // v7 ids sort by creation time, so children list in insertion order
        let key = format!("{}{}", dir_prefix(dir), Uuid::now_v7());
        self.put(&key, value, Some(ttl)).await
    }

    async fn watch(&self, key: &str, since_index: u64, recursive: bool) -> Result<Watch> {
        let mut options = WatchOptions::new();
        let target = if recursive {
            options = options.with_prefix();
            dir_prefix(key)
        } else {
            key.to_string()
        };
        if since_index > 0 {
            options = options.with_start_revision(since_index as i64);
        }

        let (mut watcher, mut stream) = self.client.clone().watch(target.as_str(), Some(options)).await?;
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            'forward: loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        let _ = watcher.cancel().await;
                        break;
                    }
                    message = stream.message() => {
                        let response = match message {
                            Ok(Some(response)) => response,
                            Ok(None) => break,
                            Err(e) => {
                                tracing::warn!(key = %target, error = %e, "etcd watch stream failed");
                                break;
                            }
                        };
                        if response.canceled() {
                            tracing::debug!(key = %target, "etcd watch canceled by server");
                            break;
                        }

                        for event in response.events() {
                            let Some(kv) = event.kv() else { continue };
                            let Ok(node) = to_node(kv) else {
                                tracing::warn!(key = %target, "Skipping non UTF-8 watch event");
                                continue;
                            };
                            let action = match event.event_type() {
                                EventType::Put => WatchAction::Set,
                                EventType::Delete => WatchAction::Delete,
                            };
                            if tx.send(WatchEvent { action, node }).await.is_err() {
                                let _ = watcher.cancel().await;
                                break 'forward;
                            }
                        }
                    }
                }
            }
        });

        Ok(Watch::new(rx, Some(stop_tx)))
    }
}
