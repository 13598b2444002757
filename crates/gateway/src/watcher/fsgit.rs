// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-system-derived watchers: FSWatcher, GitWatcher, GitDiffWatcher
//! (§4.1). The actual filesystem and git command adapters are external
//! collaborators out of this spec's scope (§1); this module only owns the
//! debounce-and-fan-out shape every one of them shares. Each variant is
//! built by supplying a `refresh` closure that recomputes the payload
//! from the (out-of-scope) adapter.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::watcher::{DropCounter, Notifier};

type RefreshFn<T> = Box<dyn Fn() -> Pin<Box<dyn Future<Output = T> + Send>> + Send + Sync>;

/// A debounced, fan-out watcher over an external, non-event-driven
/// source (filesystem tree, git status/diff). Multiple rapid triggers
/// within `debounce` coalesce into a single refresh + broadcast.
pub struct DebouncedWatcher<T> {
    subscribers: RwLock<HashMap<String, Notifier>>,
    drops: DropCounter,
    trigger_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
    event_method: &'static str,
    _marker: std::marker::PhantomData<T>,
}

impl<T> DebouncedWatcher<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    /// Spawn the watcher. `event_method` names the notification method
    /// (e.g. `"fs-changed"`, `"git-changed"`); `refresh` recomputes the
    /// payload on each coalesced trigger.
    pub fn spawn(
        refresh: RefreshFn<T>,
        debounce: Duration,
        event_method: &'static str,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(64);
        let watcher = Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
            drops: DropCounter::default(),
            trigger_tx,
            cancel: cancel.clone(),
            event_method,
            _marker: std::marker::PhantomData,
        });

        let task_watcher = Arc::clone(&watcher);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_watcher.cancel.cancelled() => break,
                    got = trigger_rx.recv() => {
                        if got.is_none() {
                            break;
                        }
                    }
                }

                // Coalesce: drain any triggers that arrive within the debounce window.
                tokio::select! {
                    _ = task_watcher.cancel.cancelled() => break,
                    _ = tokio::time::sleep(debounce) => {}
                }
                while trigger_rx.try_recv().is_ok() {}

                let payload = refresh().await;
                task_watcher.fan_out(payload).await;
            }
        });

        watcher
    }

    /// Notify the watcher that the underlying source may have changed.
    /// Non-blocking; a saturated trigger channel just means a refresh is
    /// already pending, which is fine since it will pick up the latest state.
    pub fn trigger(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    async fn fan_out(&self, payload: T) {
        let json = match serde_json::to_value(&payload) {
            Ok(v) => v,
            Err(_) => return,
        };
        let mut dead = Vec::new();
        {
            let subs = self.subscribers.read().await;
            for (id, notifier) in subs.iter() {
                if notifier.try_notify(self.event_method, json.clone()).is_err() {
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

    pub async fn subscribe(&self, notifier: Notifier, current: T) -> (String, serde_json::Value) {
        let id = crate::watcher::new_subscription_id();
        self.subscribers.write().await.insert(id.clone(), notifier);
        (id, serde_json::to_value(current).unwrap_or(serde_json::Value::Null))
    }

    pub async fn unsubscribe(&self, id: &str) {
        self.subscribers.write().await.remove(id);
    }

    pub fn dropped_subscriber_count(&self) -> u64 {
        self.drops.get()
    }
}

/// Parameters identifying one `GitDiffWatcher` instance (§4.1: "GitDiffWatcher
/// is parameterized by (path, staged)").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GitDiffKey {
    pub path: String,
    pub staged: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn coalesces_rapid_triggers_into_one_refresh() {
        let refresh_count = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let counter = Arc::clone(&refresh_count);
        let refresh: RefreshFn<u64> = Box::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move { counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1 })
        });

        let watcher = DebouncedWatcher::spawn(refresh, Duration::from_millis(50), "fs-changed", CancellationToken::new());
        let (notifier, mut rx) = Notifier::channel(8);
        watcher.subscribe(notifier, 0u64).await;

        for _ in 0..5 {
            watcher.trigger();
        }

        let note = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("no timeout")
            .expect("open");
        assert_eq!(note.params, serde_json::json!(1));
        assert_eq!(refresh_count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
