// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{GatewayError, GatewayResult};
use crate::ids::new_id;
use crate::model::AgentRole;
use crate::store::bus::{ChangeBus, ChangeEvent, HasId};
use crate::store::work_store::WorkStore;

impl HasId for AgentRole {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default)]
pub struct RolePatch {
    pub name: Option<String>,
    pub prompt: Option<String>,
}

/// Agent role store. Deletion is refused while any work item still
/// references the role (§4.4 `ErrConflict`).
pub struct RoleStore {
    items: RwLock<HashMap<String, AgentRole>>,
    bus: ChangeBus<AgentRole>,
}

impl RoleStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { items: RwLock::new(HashMap::new()), bus: ChangeBus::new() })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ChangeEvent<AgentRole>> {
        self.bus.subscribe()
    }

    pub async fn create(&self, name: String, prompt: String, now_ms: u64) -> AgentRole {
        let role = AgentRole { id: new_id(), name, prompt, created_at_ms: now_ms, updated_at_ms: now_ms };
        self.items.write().await.insert(role.id.clone(), role.clone());
        self.bus.publish(ChangeEvent::Create { item: role.clone() });
        role
    }

    pub async fn get(&self, id: &str) -> GatewayResult<AgentRole> {
        self.items.read().await.get(id).cloned().ok_or_else(|| GatewayError::not_found(format!("agent role {id}")))
    }

    pub async fn list(&self) -> Vec<AgentRole> {
        self.items.read().await.values().cloned().collect()
    }

    pub async fn update(&self, id: &str, patch: RolePatch, now_ms: u64) -> GatewayResult<AgentRole> {
        let mut items = self.items.write().await;
        let role = items.get_mut(id).ok_or_else(|| GatewayError::not_found(format!("agent role {id}")))?;
        if let Some(name) = patch.name {
            role.name = name;
        }
        if let Some(prompt) = patch.prompt {
            role.prompt = prompt;
        }
        role.updated_at_ms = now_ms;
        let updated = role.clone();
        drop(items);
        self.bus.publish(ChangeEvent::Update { item: updated.clone() });
        Ok(updated)
    }

    /// Delete a role, refusing if `work_store` still has items referencing it.
    pub async fn delete(&self, id: &str, work_store: &WorkStore) -> GatewayResult<()> {
        if !self.items.read().await.contains_key(id) {
            return Err(GatewayError::not_found(format!("agent role {id}")));
        }
        let refs = work_store.count_referencing_role(id).await;
        if refs > 0 {
            return Err(GatewayError::conflict(format!("{refs} work item(s) reference this role")));
        }
        self.items.write().await.remove(id);
        self.bus.publish(ChangeEvent::Delete { id: id.to_owned() });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkType;

    #[tokio::test]
    async fn delete_refused_while_referenced() {
        let roles = RoleStore::new();
        let works = WorkStore::new();
        let role = roles.create("reviewer".into(), "Review code.".into(), 0).await;
        works
            .create(WorkType::Story, String::new(), Some(role.id.clone()), "S".into(), String::new(), 0)
            .await
            .expect("create story");

        assert!(roles.delete(&role.id, &works).await.is_err());
    }

    #[tokio::test]
    async fn delete_succeeds_when_unreferenced() {
        let roles = RoleStore::new();
        let works = WorkStore::new();
        let role = roles.create("reviewer".into(), "Review code.".into(), 0).await;
        assert!(roles.delete(&role.id, &works).await.is_ok());
    }
}
