// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generic list watcher: SessionList, WorkList, AgentRoleList, Worktree
//! list (§4.1). Payload is `{operation: create|update|delete|sync, item |
//! id}`; `sync` is used on initial subscribe and after state-invalidating
//! events such as a dropped subscriber being re-added.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::store::bus::{ChangeEvent, HasId};
use crate::watcher::{DropCounter, Notifier};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
enum ListPayload<T> {
    Create { item: T },
    Update { item: T },
    Delete { id: String },
    Sync { items: Vec<T> },
}

/// Fan-out watcher over one store's `ChangeBus<T>`. One instance per
/// (Worktree, entity kind) pair.
pub struct ListWatcher<T> {
    subscribers: RwLock<HashMap<String, Notifier>>,
    drops: DropCounter,
    cancel: CancellationToken,
    _marker: std::marker::PhantomData<T>,
}

impl<T> ListWatcher<T>
where
    T: Clone + Serialize + HasId + Send + Sync + 'static,
{
    /// Spawn the fan-out task listening on `bus_rx` and return the watcher
    /// handle. `cancel` is the owning Worktree's shutdown token (§5,
    /// "Watchers first" teardown ordering).
    pub fn spawn(mut bus_rx: broadcast::Receiver<ChangeEvent<T>>, cancel: CancellationToken) -> Arc<Self> {
        let watcher = Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
            drops: DropCounter::default(),
            cancel: cancel.clone(),
            _marker: std::marker::PhantomData,
        });

        let task_watcher = Arc::clone(&watcher);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_watcher.cancel.cancelled() => break,
                    event = bus_rx.recv() => {
                        match event {
                            Ok(event) => task_watcher.fan_out(event).await,
                            Err(broadcast::error::RecvError::Lagged(_)) => {
                                // We fell behind the bus: subscribers may have missed
                                // updates. Nothing to resync against without a store
                                // handle; lagging subscribers self-heal on their next
                                // `*.list.subscribe` call (fresh Sync snapshot).
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });

        watcher
    }

    async fn fan_out(&self, event: ChangeEvent<T>) {
        let payload = match event {
            ChangeEvent::Create { item } => ListPayload::Create { item },
            ChangeEvent::Update { item } => ListPayload::Update { item },
            ChangeEvent::Delete { id } => ListPayload::Delete { id },
        };
        let json = match serde_json::to_value(&payload) {
            Ok(v) => v,
            Err(_) => return,
        };

        let mut dead = Vec::new();
        {
            let subs = self.subscribers.read().await;
            for (id, notifier) in subs.iter() {
                if notifier.try_notify("list-changed", json.clone()).is_err() {
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

    /// Subscribe, returning the new subscription id and a `sync` snapshot
    /// of the current list (§4.1).
    pub async fn subscribe(&self, notifier: Notifier, current: Vec<T>) -> (String, serde_json::Value) {
        let id = crate::watcher::new_subscription_id();
        self.subscribers.write().await.insert(id.clone(), notifier);
        let snapshot = serde_json::to_value(ListPayload::Sync { items: current }).unwrap_or(serde_json::Value::Null);
        (id, snapshot)
    }

    /// Unsubscribe. Idempotent — unknown ids are a no-op (§4.1).
    pub async fn unsubscribe(&self, id: &str) {
        self.subscribers.write().await.remove(id);
    }

    pub fn dropped_subscriber_count(&self) -> u64 {
        self.drops.get()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}
