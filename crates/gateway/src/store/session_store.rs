// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::error::{GatewayError, GatewayResult};
use crate::ids::new_id;
use crate::model::session::validate_title;
use crate::model::{EventRecord, SessionMeta, SessionMode};
use crate::store::bus::{ChangeBus, ChangeEvent, HasId};

impl HasId for SessionMeta {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A session history append, broadcast to `ChatMessagesWatcher` subscribers
/// (§4.5). Subscribers filter on `session_id`.
#[derive(Debug, Clone)]
pub struct HistoryAppend {
    pub session_id: String,
    pub record: EventRecord,
}

/// Partial-fields patch accepted by `Update` (§4.4).
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub mode: Option<SessionMode>,
    pub activated: Option<bool>,
}

/// Durable ordered collection of sessions plus their append-only event
/// histories (§3, §4.4, §4.5). One instance per Worktree.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionMeta>>,
    histories: RwLock<HashMap<String, Vec<EventRecord>>>,
    bus: ChangeBus<SessionMeta>,
    history_tx: broadcast::Sender<HistoryAppend>,
}

impl SessionStore {
    pub fn new() -> Arc<Self> {
        let (history_tx, _) = broadcast::channel(1024);
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            histories: RwLock::new(HashMap::new()),
            bus: ChangeBus::new(),
            history_tx,
        })
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent<SessionMeta>> {
        self.bus.subscribe()
    }

    pub fn subscribe_history(&self) -> broadcast::Receiver<HistoryAppend> {
        self.history_tx.subscribe()
    }

    pub async fn create(&self, id: Option<String>, title: String, now_ms: u64) -> GatewayResult<SessionMeta> {
        let id = id.unwrap_or_else(new_id);
        let meta = SessionMeta::new(id.clone(), title, now_ms)?;

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            return Err(GatewayError::conflict(format!("session {id} already exists")));
        }
        sessions.insert(id.clone(), meta.clone());
        drop(sessions);

        self.histories.write().await.insert(id, Vec::new());
        self.bus.publish(ChangeEvent::Create { item: meta.clone() });
        Ok(meta)
    }

    pub async fn get(&self, id: &str) -> GatewayResult<SessionMeta> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found(format!("session {id}")))
    }

    pub async fn list(&self) -> Vec<SessionMeta> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn update(&self, id: &str, patch: SessionPatch, now_ms: u64) -> GatewayResult<SessionMeta> {
        let mut sessions = self.sessions.write().await;
        let meta = sessions.get_mut(id).ok_or_else(|| GatewayError::not_found(format!("session {id}")))?;

        if let Some(title) = patch.title {
            meta.title = validate_title(title)?;
        }
        if let Some(mode) = patch.mode {
            meta.mode = mode;
        }
        if let Some(activated) = patch.activated {
            // Monotonic per §3: never clear an already-activated session.
            if activated {
                meta.activated = true;
            }
        }
        meta.updated_at_ms = now_ms;
        let updated = meta.clone();
        drop(sessions);

        self.bus.publish(ChangeEvent::Update { item: updated.clone() });
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> GatewayResult<()> {
        let removed = self.sessions.write().await.remove(id).is_some();
        if !removed {
            return Err(GatewayError::not_found(format!("session {id}")));
        }
        self.histories.write().await.remove(id);
        self.bus.publish(ChangeEvent::Delete { id: id.to_owned() });
        Ok(())
    }

    /// Read the full event history for a session under a consistent
    /// snapshot (§4.5 step 2).
    pub async fn history(&self, session_id: &str) -> GatewayResult<Vec<EventRecord>> {
        self.histories
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found(format!("session {session_id}")))
    }

    /// Append one event to a session's history, stamping the next
    /// monotonic sequence number, and notify `ChatMessagesWatcher` (§4.4).
    pub async fn append_to_history(
        &self,
        session_id: &str,
        event: crate::model::session::EventKind,
        now_ms: u64,
    ) -> GatewayResult<EventRecord> {
        let mut histories = self.histories.write().await;
        let history = histories
            .get_mut(session_id)
            .ok_or_else(|| GatewayError::not_found(format!("session {session_id}")))?;

        let seq = history.last().map(|r| r.seq + 1).unwrap_or(1);
        let record = EventRecord { seq, timestamp_ms: now_ms, event };
        history.push(record.clone());
        drop(histories);

        let _ = self.history_tx.send(HistoryAppend { session_id: session_id.to_owned(), record: record.clone() });
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::session::EventKind;

    #[tokio::test]
    async fn create_and_get() {
        let store = SessionStore::new();
        let meta = store.create(None, "hello".into(), 0).await.expect("create");
        let fetched = store.get(&meta.id).await.expect("get");
        assert_eq!(fetched.id, meta.id);
        assert!(!fetched.activated);
    }

    #[tokio::test]
    async fn activated_is_monotonic() {
        let store = SessionStore::new();
        let meta = store.create(None, "t".into(), 0).await.expect("create");
        let patch = SessionPatch { activated: Some(true), ..Default::default() };
        let updated = store.update(&meta.id, patch, 1).await.expect("update");
        assert!(updated.activated);

        let clear_attempt = SessionPatch { activated: Some(false), ..Default::default() };
        let still_on = store.update(&meta.id, clear_attempt, 2).await.expect("update");
        assert!(still_on.activated);
    }

    #[tokio::test]
    async fn append_to_history_assigns_monotonic_seq() {
        let store = SessionStore::new();
        let meta = store.create(None, "t".into(), 0).await.expect("create");
        let r1 = store
            .append_to_history(&meta.id, EventKind::Done, 10)
            .await
            .expect("append");
        let r2 = store
            .append_to_history(&meta.id, EventKind::Done, 11)
            .await
            .expect("append");
        assert_eq!(r1.seq, 1);
        assert_eq!(r2.seq, 2);
        assert_eq!(store.history(&meta.id).await.expect("history").len(), 2);
    }

    #[tokio::test]
    async fn append_to_missing_session_not_found() {
        let store = SessionStore::new();
        assert!(store.append_to_history("nope", EventKind::Done, 0).await.is_err());
    }
}
