//! Manifest list delivery from the store
//!
//! The agent keeps one watch on its host's manifest key. The watch is torn
//! down and re-established every `watch_timeout`, and whenever the store
//! closes it. Each new subscription is followed by a full read, so changes
//! made while unsubscribed are never lost.

use tokio::sync::mpsc;
use tokio::time::sleep;

use super::Kubelet;
use crate::models::{decode_manifests, ContainerManifest};
use crate::registry::keys;
use crate::store::{Store, Watch, WatchAction, WatchEvent};
use crate::Result;

/// What to do with one receive from the watch channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchStep {
    /// A new desired manifest list
    Deliver(Vec<ContainerManifest>),
    /// Nothing usable; keep the last good list
    Skip,
    /// The channel closed; subscribe again
    Reconnect,
}

/// Classify a watch receive. A removed key means an empty desired state.
pub fn classify(event: Option<WatchEvent>) -> WatchStep {
    let Some(event) = event else {
        return WatchStep::Reconnect;
    };

    match event.action {
        WatchAction::Delete | WatchAction::Expire => WatchStep::Deliver(Vec::new()),
        WatchAction::Set | WatchAction::Create => match decode_manifests(&event.node.value) {
            Ok(manifests) => WatchStep::Deliver(manifests),
            Err(e) => {
                tracing::warn!(key = %event.node.key, error = %e, "Dropping undecodable manifest update");
                WatchStep::Skip
            }
        },
    }
}

impl Kubelet {
    /// Current manifest list of this host; absent means empty
    pub async fn fetch_manifests(&self) -> Result<Vec<ContainerManifest>> {
        self.registry.load_manifests(&self.config.hostname).await
    }

    /// Feed manifest lists to `updates` until its receiver goes away.
    ///
    /// Until the store has answered once, failures are retried every
    /// `store_retry_interval`. After that a failed read only logs, the
    /// watch still runs.
    pub async fn sync_and_watch(&self, updates: mpsc::Sender<Vec<ContainerManifest>>) {
        let key = keys::manifest_key(&self.config.hostname);
        let mut answered = false;

        loop {
            let mut watch = match self.registry.store().watch(&key, 0, false).await {
                Ok(watch) => watch,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Failed to watch manifest list");
                    sleep(self.config.store_retry_interval).await;
                    continue;
                }
            };

            match self.fetch_manifests().await {
                Ok(manifests) => {
                    answered = true;
                    tracing::debug!(key = %key, manifests = manifests.len(), "Fetched manifest list");
                    if updates.send(manifests).await.is_err() {
                        return;
                    }
                }
                Err(e) if !answered => {
                    tracing::warn!(key = %key, error = %e, "Initial manifest fetch failed, retrying");
                    watch.stop();
                    sleep(self.config.store_retry_interval).await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Manifest refresh failed");
                }
            }

            if !self.pump_watch(&mut watch, &updates).await {
                return;
            }
        }
    }

    /// Forward watch events until the subscription ends or times out.
    /// Returns false once nobody is listening for updates.
    async fn pump_watch(&self, watch: &mut Watch, updates: &mpsc::Sender<Vec<ContainerManifest>>) -> bool {
        let deadline = sleep(self.config.watch_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::debug!(host = %self.config.hostname, "Watch timeout, re-establishing");
                    watch.stop();
                    return true;
                }
                event = watch.recv() => match classify(event) {
                    WatchStep::Deliver(manifests) => {
                        tracing::info!(host = %self.config.hostname, manifests = manifests.len(), "Manifest list changed");
                        if updates.send(manifests).await.is_err() {
                            return false;
                        }
                    }
                    WatchStep::Skip => {}
                    WatchStep::Reconnect => {
                        tracing::debug!(host = %self.config.hostname, "Watch closed, re-establishing");
                        return true;
                    }
                },
            }
        }
    }
}
