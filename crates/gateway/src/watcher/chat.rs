// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat message watcher (§4.5): fans out `EventRecord` appends from a
//! session's history to subscribers, replaying from a point-in-time
//! snapshot without gap or duplicate.
//!
//! Process-end is additionally surfaced as its own notification (§6:
//! "Process-end is a distinct notification so the client can clear
//! 'streaming' UI state without inspecting event kinds"), fed by the
//! `ProcessManager`'s state-change bus rather than the history stream —
//! the `EventKind::ProcessEnded` history record (§3) is a separate,
//! ordinary event on the same session and is delivered like any other.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::model::EventRecord;
use crate::process::{AgentSessionState, ProcessStateChange};
use crate::store::session_store::HistoryAppend;
use crate::watcher::{DropCounter, Notifier};

struct Subscriber {
    session_id: String,
    notifier: Notifier,
    last_delivered_seq: u64,
}

/// One instance per Worktree's `SessionStore`, serving all of its
/// sessions' chat subscriptions from a single fan-out task.
pub struct ChatMessagesWatcher {
    subscribers: RwLock<HashMap<String, Subscriber>>,
    drops: DropCounter,
    cancel: CancellationToken,
}

impl ChatMessagesWatcher {
    /// `state_rx` is the owning `ProcessManager`'s state-change bus
    /// (§4.3), observed so this watcher can emit the distinct
    /// `process_ended` notification §6/§4.5 call for — independent of
    /// the ordinary `EventKind::ProcessEnded` history record, which rides
    /// `history_rx` like any other event.
    pub fn spawn(mut history_rx: broadcast::Receiver<HistoryAppend>, mut state_rx: broadcast::Receiver<ProcessStateChange>, cancel: CancellationToken) -> Arc<Self> {
        let watcher = Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
            drops: DropCounter::default(),
            cancel: cancel.clone(),
        });

        let task_watcher = Arc::clone(&watcher);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_watcher.cancel.cancelled() => break,
                    appended = history_rx.recv() => {
                        match appended {
                            Ok(append) => task_watcher.fan_out(append).await,
                            Err(broadcast::error::RecvError::Lagged(_)) => {
                                // A subscriber may now have a gap between its last delivered
                                // seq and the next one we deliver. It self-heals by
                                // resubscribing (fresh history snapshot + filter reset).
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    changed = state_rx.recv() => {
                        match changed {
                            Ok(change) if matches!(change.state, AgentSessionState::Stopped) => {
                                task_watcher.fan_out_process_ended(&change.session_id).await;
                            }
                            Ok(_) => continue,
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });

        watcher
    }

    async fn fan_out(&self, append: HistoryAppend) {
        let json = match serde_json::to_value(&append.record) {
            Ok(v) => v,
            Err(_) => return,
        };

        let mut dead = Vec::new();
        {
            let mut subs = self.subscribers.write().await;
            for (id, sub) in subs.iter_mut() {
                if sub.session_id != append.session_id {
                    continue;
                }
                if append.record.seq <= sub.last_delivered_seq {
                    continue; // already covered by this subscriber's initial snapshot
                }
                match sub.notifier.try_notify("chat-messages-changed", json.clone()) {
                    Ok(()) => sub.last_delivered_seq = append.record.seq,
                    Err(_) => dead.push(id.clone()),
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

    /// Emit the distinct `process_ended` notification (§4.5, §6) to every
    /// subscriber bound to `session_id`, so clients can clear "streaming"
    /// UI state without inspecting event kinds.
    async fn fan_out_process_ended(&self, session_id: &str) {
        let json = serde_json::json!({ "session_id": session_id });

        let mut dead = Vec::new();
        {
            let subs = self.subscribers.read().await;
            for (id, sub) in subs.iter() {
                if sub.session_id != session_id {
                    continue;
                }
                if sub.notifier.try_notify("process_ended", json.clone()).is_err() {
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

    /// Subscribe to one session's chat stream. `history` is a consistent
    /// point-in-time snapshot (§4.5 step 2) taken by the caller *before*
    /// this call, under the same lock that serializes appends, so that no
    /// event lands strictly between the snapshot and the subscription.
    pub async fn subscribe(&self, notifier: Notifier, session_id: String, history: Vec<EventRecord>) -> (String, serde_json::Value) {
        let last_delivered_seq = history.last().map(|r| r.seq).unwrap_or(0);
        let id = crate::watcher::new_subscription_id();
        let snapshot = serde_json::json!({ "operation": "sync", "events": history });
        self.subscribers.write().await.insert(
            id.clone(),
            Subscriber { session_id, notifier, last_delivered_seq },
        );
        (id, snapshot)
    }

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::session::EventKind;
    use crate::store::SessionStore;

    fn state_bus() -> (broadcast::Sender<ProcessStateChange>, broadcast::Receiver<ProcessStateChange>) {
        broadcast::channel(8)
    }

    #[tokio::test]
    async fn replay_then_live_delivers_without_duplication() {
        let store = SessionStore::new();
        let meta = store.create(None, "t".into(), 0).await.expect("create");
        store.append_to_history(&meta.id, EventKind::Done, 1).await.expect("append 1");

        let (_state_tx, state_rx) = state_bus();
        let watcher = ChatMessagesWatcher::spawn(store.subscribe_history(), state_rx, CancellationToken::new());
        let history = store.history(&meta.id).await.expect("history");
        let (_id, snapshot) = watcher
            .subscribe(Notifier::channel(8).0, meta.id.clone(), history)
            .await;
        assert_eq!(snapshot["events"].as_array().expect("array").len(), 1);

        let (notifier, mut rx) = Notifier::channel(8);
        watcher.subscribe(notifier, meta.id.clone(), store.history(&meta.id).await.expect("history")).await;

        store.append_to_history(&meta.id, EventKind::Done, 2).await.expect("append 2");

        let note = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("no timeout")
            .expect("open");
        assert_eq!(note.method, "chat-messages-changed");
        assert_eq!(note.params["seq"], 2);
    }

    #[tokio::test]
    async fn events_for_other_sessions_are_not_delivered() {
        let store = SessionStore::new();
        let a = store.create(None, "a".into(), 0).await.expect("create a");
        let b = store.create(None, "b".into(), 0).await.expect("create b");

        let (_state_tx, state_rx) = state_bus();
        let watcher = ChatMessagesWatcher::spawn(store.subscribe_history(), state_rx, CancellationToken::new());
        let (notifier, mut rx) = Notifier::channel(8);
        watcher.subscribe(notifier, a.id.clone(), vec![]).await;

        store.append_to_history(&b.id, EventKind::Done, 1).await.expect("append to b");
        store.append_to_history(&a.id, EventKind::Done, 2).await.expect("append to a");

        let note = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("no timeout")
            .expect("open");
        assert_eq!(note.params["seq"], 2);
    }

    #[tokio::test]
    async fn process_stopped_emits_distinct_process_ended_notification() {
        let store = SessionStore::new();
        let meta = store.create(None, "t".into(), 0).await.expect("create");

        let (state_tx, state_rx) = state_bus();
        let watcher = ChatMessagesWatcher::spawn(store.subscribe_history(), state_rx, CancellationToken::new());
        let (notifier, mut rx) = Notifier::channel(8);
        watcher.subscribe(notifier, meta.id.clone(), vec![]).await;

        state_tx
            .send(ProcessStateChange { session_id: meta.id.clone(), state: AgentSessionState::Stopped, needs_input: false, is_initial: false })
            .expect("publish state change");

        let note = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("no timeout")
            .expect("open");
        assert_eq!(note.method, "process_ended");
        assert_eq!(note.params["session_id"], meta.id);
    }
}
