// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{GatewayError, GatewayResult};
use crate::ids::new_id;
use crate::model::work::SessionIdEffect;
use crate::model::{Work, WorkStatus, WorkType};
use crate::store::bus::{ChangeBus, ChangeEvent, HasId};

impl HasId for Work {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Partial-fields patch accepted by `Update` (§4.4). `status` drives the
/// `session_id` effect per §3; callers never set `session_id` directly.
#[derive(Debug, Clone, Default)]
pub struct WorkPatch {
    pub title: Option<String>,
    pub body: Option<String>,
    pub status: Option<WorkStatus>,
    /// Required when `status` transitions `Open -> InProgress` or
    /// `Done -> InProgress`; the store rejects a status change requiring a
    /// new session id if this is absent.
    pub claim_session_id: Option<String>,
}

/// Work store: stories and tasks, single-writer, invariants enforced
/// atomically under one mutex per update (§3, §4.4, §4.7).
pub struct WorkStore {
    items: RwLock<HashMap<String, Work>>,
    bus: ChangeBus<Work>,
}

impl WorkStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { items: RwLock::new(HashMap::new()), bus: ChangeBus::new() })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ChangeEvent<Work>> {
        self.bus.subscribe()
    }

    pub async fn create(
        &self,
        kind: WorkType,
        parent_id: String,
        agent_role_id: Option<String>,
        title: String,
        body: String,
        now_ms: u64,
    ) -> GatewayResult<Work> {
        let mut items = self.items.write().await;

        let parent = if parent_id.is_empty() { None } else { Some(
            items.get(&parent_id).ok_or_else(|| GatewayError::not_found("parent work item"))?.clone()
        ) };
        Work::validate_parentage(kind, &parent_id, parent.as_ref())?;

        let agent_role_id = match kind {
            WorkType::Story => agent_role_id
                .ok_or_else(|| GatewayError::validation("story requires agent_role_id"))?,
            // Tasks inherit the parent story's role (§3).
            WorkType::Task => parent
                .as_ref()
                .map(|p| p.agent_role_id.clone())
                .ok_or_else(|| GatewayError::not_found("parent work item"))?,
        };

        let id = new_id();
        let work = Work {
            id: id.clone(),
            kind,
            parent_id,
            agent_role_id,
            title,
            body,
            status: WorkStatus::Open,
            session_id: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        };
        items.insert(id, work.clone());
        drop(items);

        self.bus.publish(ChangeEvent::Create { item: work.clone() });
        Ok(work)
    }

    pub async fn get(&self, id: &str) -> GatewayResult<Work> {
        self.items.read().await.get(id).cloned().ok_or_else(|| GatewayError::not_found(format!("work {id}")))
    }

    pub async fn list(&self) -> Vec<Work> {
        self.items.read().await.values().cloned().collect()
    }

    pub async fn children_of(&self, parent_id: &str) -> Vec<Work> {
        self.items.read().await.values().filter(|w| w.parent_id == parent_id).cloned().collect()
    }

    /// Apply a patch atomically, enforcing §3's invariants. On an invalid
    /// transition, no partial change is observable (the whole update is
    /// validated before any field is written).
    pub async fn update(&self, id: &str, patch: WorkPatch, now_ms: u64) -> GatewayResult<Work> {
        let mut items = self.items.write().await;
        let current =
            items.get(id).ok_or_else(|| GatewayError::not_found(format!("work {id}")))?.clone();

        let mut next = current.clone();
        if let Some(title) = patch.title {
            next.title = title;
        }
        if let Some(body) = patch.body {
            next.body = body;
        }

        let mut auto_closed_children: Vec<String> = Vec::new();

        if let Some(status) = patch.status {
            if status != current.status {
                let effect = Work::validate_transition(current.status, status)?;
                match effect {
                    SessionIdEffect::MustSet => {
                        let sid = patch
                            .claim_session_id
                            .ok_or_else(|| GatewayError::validation("transition requires a session id to claim"))?;
                        next.session_id = Some(sid);
                    }
                    SessionIdEffect::MustClear => {
                        next.session_id = None;
                    }
                    SessionIdEffect::Unchanged => {}
                }
                next.status = status;
            }
        }

        next.updated_at_ms = now_ms;
        items.insert(id.to_owned(), next.clone());

        // Auto-close check (§4.7): entering `done` may cascade to `closed`
        // on the same atomic pass if every child is already `closed`.
        if next.status == WorkStatus::Done {
            let children: Vec<Work> =
                items.values().filter(|w| w.parent_id == next.id).cloned().collect();
            if Work::should_auto_close(next.status, &children) {
                next.status = WorkStatus::Closed;
                next.updated_at_ms = now_ms;
                items.insert(id.to_owned(), next.clone());
            }
        }

        // If this item just became `closed` and has a parent, the parent
        // may need auto-close re-evaluation too (covers the case where
        // this was the last open child of an already-`done` parent that
        // wasn't itself transitioning right now — Trigger B in the
        // AutoResumer handles reactivating a `done` parent; this store
        // only performs the downward auto-close cascade of §4.7).
        if next.status == WorkStatus::Closed && !next.parent_id.is_empty() {
            if let Some(parent) = items.get(&next.parent_id).cloned() {
                if parent.status == WorkStatus::Done {
                    let siblings: Vec<Work> =
                        items.values().filter(|w| w.parent_id == parent.id).cloned().collect();
                    if Work::should_auto_close(parent.status, &siblings) {
                        let mut closed_parent = parent.clone();
                        closed_parent.status = WorkStatus::Closed;
                        closed_parent.updated_at_ms = now_ms;
                        items.insert(parent.id.clone(), closed_parent.clone());
                        auto_closed_children.push(parent.id.clone());
                    }
                }
            }
        }

        drop(items);

        self.bus.publish(ChangeEvent::Update { item: next.clone() });
        for id in auto_closed_children {
            if let Ok(parent) = self.get(&id).await {
                self.bus.publish(ChangeEvent::Update { item: parent });
            }
        }
        Ok(next)
    }

    /// Delete a work item. Fails with `ErrConflict` if it has children, or
    /// if it is the active claim (`in_progress`) of a live session.
    pub async fn delete(&self, id: &str) -> GatewayResult<()> {
        let mut items = self.items.write().await;
        let work = items.get(id).ok_or_else(|| GatewayError::not_found(format!("work {id}")))?.clone();

        let child_count = items.values().filter(|w| w.parent_id == id).count();
        if child_count > 0 {
            return Err(GatewayError::conflict(format!("{child_count} child work item(s) reference this item")));
        }
        if work.status == WorkStatus::InProgress {
            return Err(GatewayError::conflict("work item is in_progress"));
        }

        items.remove(id);
        drop(items);
        self.bus.publish(ChangeEvent::Delete { id: id.to_owned() });
        Ok(())
    }

    /// Count of work items referencing the given agent role, for
    /// referential-integrity checks on role deletion (§4.4 `ErrConflict`).
    pub async fn count_referencing_role(&self, role_id: &str) -> usize {
        self.items.read().await.values().filter(|w| w.agent_role_id == role_id).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn story(store: &WorkStore) -> Work {
        store.create(WorkType::Story, String::new(), Some("role-1".into()), "S".into(), String::new(), 0).await.expect("create story")
    }

    #[tokio::test]
    async fn task_inherits_parent_role() {
        let store = WorkStore::new();
        let s = story(&store).await;
        let t = store
            .create(WorkType::Task, s.id.clone(), None, "T".into(), String::new(), 0)
            .await
            .expect("create task");
        assert_eq!(t.agent_role_id, "role-1");
    }

    #[tokio::test]
    async fn claim_sets_session_id_atomically() {
        let store = WorkStore::new();
        let s = story(&store).await;
        let t = store.create(WorkType::Task, s.id, None, "T".into(), String::new(), 0).await.expect("create");

        let patch = WorkPatch {
            status: Some(WorkStatus::InProgress),
            claim_session_id: Some("sess-1".into()),
            ..Default::default()
        };
        let claimed = store.update(&t.id, patch, 1).await.expect("claim");
        assert_eq!(claimed.status, WorkStatus::InProgress);
        assert_eq!(claimed.session_id.as_deref(), Some("sess-1"));
    }

    #[tokio::test]
    async fn claim_without_session_id_fails_no_partial_change() {
        let store = WorkStore::new();
        let s = story(&store).await;
        let t = store.create(WorkType::Task, s.id, None, "T".into(), String::new(), 0).await.expect("create");

        let patch = WorkPatch { status: Some(WorkStatus::InProgress), ..Default::default() };
        assert!(store.update(&t.id, patch, 1).await.is_err());

        let reread = store.get(&t.id).await.expect("get");
        assert_eq!(reread.status, WorkStatus::Open);
        assert!(reread.session_id.is_none());
    }

    #[tokio::test]
    async fn returning_to_open_clears_session_id() {
        let store = WorkStore::new();
        let s = story(&store).await;
        let t = store.create(WorkType::Task, s.id, None, "T".into(), String::new(), 0).await.expect("create");
        let patch = WorkPatch {
            status: Some(WorkStatus::InProgress),
            claim_session_id: Some("sess-1".into()),
            ..Default::default()
        };
        store.update(&t.id, patch, 1).await.expect("claim");

        let reopened = store
            .update(&t.id, WorkPatch { status: Some(WorkStatus::Open), ..Default::default() }, 2)
            .await
            .expect("reopen");
        assert!(reopened.session_id.is_none());
    }

    #[tokio::test]
    async fn auto_close_cascades_when_last_child_closes() {
        let store = WorkStore::new();
        let s = story(&store).await;
        let t = store.create(WorkType::Task, s.id.clone(), None, "T".into(), String::new(), 0).await.expect("create");

        let patch = WorkPatch {
            status: Some(WorkStatus::InProgress),
            claim_session_id: Some("sess-1".into()),
            ..Default::default()
        };
        store.update(&s.id, patch, 1).await.expect("claim story");
        store.update(&s.id, WorkPatch { status: Some(WorkStatus::Done), ..Default::default() }, 2).await.expect("done");

        let still_open_story = store.get(&s.id).await.expect("get");
        assert_eq!(still_open_story.status, WorkStatus::Done, "not auto-closed while child is open");

        store.update(&t.id, WorkPatch { status: Some(WorkStatus::InProgress), claim_session_id: Some("sess-2".into()), ..Default::default() }, 3).await.expect("claim task");
        store.update(&t.id, WorkPatch { status: Some(WorkStatus::Done), ..Default::default() }, 4).await.expect("task done");
        // Task auto-closes immediately since it has no children.
        let task_after = store.get(&t.id).await.expect("get");
        assert_eq!(task_after.status, WorkStatus::Closed);

        let story_after = store.get(&s.id).await.expect("get");
        assert_eq!(story_after.status, WorkStatus::Closed, "story auto-closes once its only child closes");
    }

    #[tokio::test]
    async fn delete_rejects_item_with_children() {
        let store = WorkStore::new();
        let s = story(&store).await;
        store.create(WorkType::Task, s.id.clone(), None, "T".into(), String::new(), 0).await.expect("create");
        assert!(store.delete(&s.id).await.is_err());
    }

    #[tokio::test]
    async fn delete_rejects_in_progress() {
        let store = WorkStore::new();
        let s = story(&store).await;
        let t = store.create(WorkType::Task, s.id, None, "T".into(), String::new(), 0).await.expect("create");
        store.update(&t.id, WorkPatch { status: Some(WorkStatus::InProgress), claim_session_id: Some("s".into()), ..Default::default() }, 1).await.expect("claim");
        assert!(store.delete(&t.id).await.is_err());
    }
}
