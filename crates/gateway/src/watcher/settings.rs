// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Settings store + watcher (§4.1): payload is the full settings snapshot
//! on every change (small, infrequent), unlike the list watchers' diffed
//! create/update/delete operations.

use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::watcher::{DropCounter, Notifier};
use std::collections::HashMap;

/// Settings are an opaque JSON document; this gateway doesn't interpret
/// their shape (that's a client/UI concern), only persists and fans them out.
pub struct SettingsStore {
    value: RwLock<serde_json::Value>,
    tx: broadcast::Sender<serde_json::Value>,
}

impl SettingsStore {
    pub fn new(initial: serde_json::Value) -> Arc<Self> {
        let (tx, _) = broadcast::channel(16);
        Arc::new(Self { value: RwLock::new(initial), tx })
    }

    pub async fn get(&self) -> serde_json::Value {
        self.value.read().await.clone()
    }

    pub async fn update(&self, patch: serde_json::Value) -> serde_json::Value {
        let mut value = self.value.write().await;
        if let (Some(obj), Some(patch_obj)) = (value.as_object_mut(), patch.as_object()) {
            for (k, v) in patch_obj {
                obj.insert(k.clone(), v.clone());
            }
        } else {
            *value = patch;
        }
        let updated = value.clone();
        drop(value);
        let _ = self.tx.send(updated.clone());
        updated
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<serde_json::Value> {
        self.tx.subscribe()
    }
}

pub struct SettingsWatcher {
    subscribers: RwLock<HashMap<String, Notifier>>,
    drops: DropCounter,
    cancel: CancellationToken,
}

impl SettingsWatcher {
    pub fn spawn(store: Arc<SettingsStore>, cancel: CancellationToken) -> Arc<Self> {
        let watcher = Arc::new(Self { subscribers: RwLock::new(HashMap::new()), drops: DropCounter::default(), cancel: cancel.clone() });
        let task_watcher = Arc::clone(&watcher);
        let mut rx = store.subscribe_changes();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_watcher.cancel.cancelled() => break,
                    event = rx.recv() => {
                        match event {
                            Ok(value) => task_watcher.fan_out(value).await,
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });
        watcher
    }

    async fn fan_out(&self, value: serde_json::Value) {
        let mut dead = Vec::new();
        {
            let subs = self.subscribers.read().await;
            for (id, notifier) in subs.iter() {
                if notifier.try_notify("settings-changed", value.clone()).is_err() {
                    dead.push(id.clone());
                }
            }
        }
        if !dead.is_empty() {
            let mut subs = self.subscribers.write().await;
            for id in dead {
                subs.remove(&id);
                self.drops.record();
            }
        }
    }

    pub async fn subscribe(&self, notifier: Notifier, current: serde_json::Value) -> (String, serde_json::Value) {
        let id = crate::watcher::new_subscription_id();
        self.subscribers.write().await.insert(id.clone(), notifier);
        (id, current)
    }

    pub async fn unsubscribe(&self, id: &str) {
        self.subscribers.write().await.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_merges_and_notifies() {
        let store = SettingsStore::new(serde_json::json!({"theme": "dark"}));
        let watcher = SettingsWatcher::spawn(Arc::clone(&store), CancellationToken::new());

        let (notifier, mut rx) = Notifier::channel(8);
        watcher.subscribe(notifier, store.get().await).await;

        store.update(serde_json::json!({"theme": "light"})).await;

        let note = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("no timeout")
            .expect("open");
        assert_eq!(note.params["theme"], "light");
    }
}
