// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{GatewayError, GatewayResult};
use crate::ids::new_id;
use crate::model::Command;
use crate::store::bus::{ChangeBus, ChangeEvent, HasId};

impl HasId for Command {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandPatch {
    pub name: Option<String>,
    pub template: Option<String>,
}

/// Saved command templates, one store per Worktree (§9 Design Notes).
pub struct CommandStore {
    items: RwLock<HashMap<String, Command>>,
    bus: ChangeBus<Command>,
}

impl CommandStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { items: RwLock::new(HashMap::new()), bus: ChangeBus::new() })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ChangeEvent<Command>> {
        self.bus.subscribe()
    }

    pub async fn create(&self, name: String, template: String, now_ms: u64) -> Command {
        let command = Command { id: new_id(), name, template, created_at_ms: now_ms, updated_at_ms: now_ms };
        self.items.write().await.insert(command.id.clone(), command.clone());
        self.bus.publish(ChangeEvent::Create { item: command.clone() });
        command
    }

    pub async fn get(&self, id: &str) -> GatewayResult<Command> {
        self.items.read().await.get(id).cloned().ok_or_else(|| GatewayError::not_found(format!("command {id}")))
    }

    pub async fn list(&self) -> Vec<Command> {
        self.items.read().await.values().cloned().collect()
    }

    pub async fn update(&self, id: &str, patch: CommandPatch, now_ms: u64) -> GatewayResult<Command> {
        let mut items = self.items.write().await;
        let command = items.get_mut(id).ok_or_else(|| GatewayError::not_found(format!("command {id}")))?;
        if let Some(name) = patch.name {
            command.name = name;
        }
        if let Some(template) = patch.template {
            command.template = template;
        }
        command.updated_at_ms = now_ms;
        let updated = command.clone();
        drop(items);
        self.bus.publish(ChangeEvent::Update { item: updated.clone() });
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> GatewayResult<()> {
        let removed = self.items.write().await.remove(id).is_some();
        if !removed {
            return Err(GatewayError::not_found(format!("command {id}")));
        }
        self.bus.publish(ChangeEvent::Delete { id: id.to_owned() });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_update_delete_round_trip() {
        let store = CommandStore::new();
        let command = store.create("review".into(), "Review {{file}}".into(), 0).await;

        let updated = store.update(&command.id, CommandPatch { template: Some("Re-review {{file}}".into()), ..Default::default() }, 1).await.expect("update");
        assert_eq!(updated.template, "Re-review {{file}}");

        store.delete(&command.id).await.expect("delete");
        assert!(store.get(&command.id).await.is_err());
    }
}
