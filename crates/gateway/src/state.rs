// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worktree and WorktreeManager (§3, §4, §5, §9 "Design Notes"): a
//! Worktree bundles one workspace's stores, watchers, process manager,
//! and controllers; the manager owns a refcounted map of them keyed by
//! name (empty string = main).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::GatewayConfig;
use crate::controller::{AutoResumer, WorkStarter};
use crate::error::GatewayResult;
use crate::process::{AgentAdapter, ProcessManager};
use crate::store::bus::{ChangeBus, ChangeEvent, HasId};
use crate::store::command_store::CommandStore;
use crate::store::role_store::RoleStore;
use crate::store::session_store::SessionStore;
use crate::store::work_store::WorkStore;
use crate::watcher::chat::ChatMessagesWatcher;
use crate::watcher::fsgit::{DebouncedWatcher, GitDiffKey};
use crate::watcher::list::ListWatcher;
use crate::watcher::settings::{SettingsStore, SettingsWatcher};

/// A row of the Worktree list watcher (§4.1: "List watchers (SessionList,
/// WorkList, AgentRoleList, Worktree)"). Keyed by name, not id, since a
/// Worktree has no separate identity beyond the name it was acquired under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub name: String,
    pub working_dir: String,
}

impl HasId for WorktreeInfo {
    fn id(&self) -> &str {
        &self.name
    }
}

/// One workspace's worth of state (GLOSSARY: "a bundle of stores,
/// watchers, and a process manager scoped to one working directory").
pub struct Worktree {
    pub name: String,
    pub working_dir: std::path::PathBuf,
    pub session_store: Arc<SessionStore>,
    pub work_store: Arc<WorkStore>,
    pub role_store: Arc<RoleStore>,
    pub command_store: Arc<CommandStore>,
    pub settings_store: Arc<SettingsStore>,
    pub process_manager: Arc<ProcessManager>,

    pub chat_watcher: Arc<ChatMessagesWatcher>,
    pub session_list_watcher: Arc<ListWatcher<crate::model::SessionMeta>>,
    pub work_list_watcher: Arc<ListWatcher<crate::model::Work>>,
    pub agent_role_list_watcher: Arc<ListWatcher<crate::model::AgentRole>>,
    pub command_list_watcher: Arc<ListWatcher<crate::model::Command>>,
    pub settings_watcher: Arc<SettingsWatcher>,
    pub fs_watcher: Arc<DebouncedWatcher<serde_json::Value>>,
    pub git_watcher: Arc<DebouncedWatcher<serde_json::Value>>,
    /// GitDiffWatcher instances, one per (path, staged) pair, created lazily
    /// on first subscribe (§4.1: "parameterized by (path, staged)").
    pub git_diff_watchers: RwLock<HashMap<GitDiffKey, Arc<DebouncedWatcher<serde_json::Value>>>>,

    pub work_starter: WorkStarter,
    pub auto_resumer: Arc<AutoResumer>,

    debounce: std::time::Duration,
    refcount: AtomicUsize,
    cancel: CancellationToken,
}

impl Worktree {
    fn new(name: String, working_dir: std::path::PathBuf, config: &GatewayConfig, adapter: Arc<dyn AgentAdapter>) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let session_store = SessionStore::new();
        let work_store = WorkStore::new();
        let role_store = RoleStore::new();
        let command_store = CommandStore::new();
        let settings_store = SettingsStore::new(serde_json::json!({}));
        let process_manager = ProcessManager::new(adapter, Arc::clone(&session_store), config.idle_timeout(), cancel.clone());

        let chat_watcher = ChatMessagesWatcher::spawn(session_store.subscribe_history(), process_manager.subscribe_state(), cancel.clone());
        let session_list_watcher = ListWatcher::spawn(session_store.subscribe_changes(), cancel.clone());
        let work_list_watcher = ListWatcher::spawn(work_store.subscribe(), cancel.clone());
        let agent_role_list_watcher = ListWatcher::spawn(role_store.subscribe(), cancel.clone());
        let command_list_watcher = ListWatcher::spawn(command_store.subscribe(), cancel.clone());
        let settings_watcher = SettingsWatcher::spawn(Arc::clone(&settings_store), cancel.clone());

        // Filesystem/git content adapters are external collaborators out
        // of scope here (§1); the watchers exist so subscribers get the
        // debounced fan-out shape, fed by an inert refresh until a real
        // adapter is wired in.
        let fs_watcher = DebouncedWatcher::spawn(Box::new(|| Box::pin(async { serde_json::json!({}) })), config.debounce(), "fs-changed", cancel.clone());
        let git_watcher = DebouncedWatcher::spawn(Box::new(|| Box::pin(async { serde_json::json!({}) })), config.debounce(), "git-changed", cancel.clone());

        let work_starter = WorkStarter::new(
            Arc::clone(&work_store),
            Arc::clone(&session_store),
            Arc::clone(&role_store),
            Arc::clone(&process_manager),
            working_dir.clone(),
        );
        let auto_resumer = AutoResumer::spawn(
            Arc::clone(&work_store),
            Arc::clone(&process_manager),
            config.max_retries,
            config.settle_delay(),
            working_dir.clone(),
            cancel.clone(),
        );

        Arc::new(Self {
            name,
            working_dir,
            session_store,
            work_store,
            role_store,
            command_store,
            settings_store,
            process_manager,
            chat_watcher,
            session_list_watcher,
            work_list_watcher,
            agent_role_list_watcher,
            command_list_watcher,
            settings_watcher,
            fs_watcher,
            git_watcher,
            git_diff_watchers: RwLock::new(HashMap::new()),
            work_starter,
            auto_resumer,
            debounce: config.debounce(),
            refcount: AtomicUsize::new(0),
            cancel,
        })
    }

    /// Release this Worktree's resources in dependency order (§9:
    /// "Watchers first, Stores last, ProcessManager in between"). Stores
    /// have no background tasks of their own, so only the cancellation
    /// token needs firing — it tears down every watcher task and the
    /// process manager's supervisors together.
    async fn teardown(&self) {
        self.process_manager.shutdown().await;
        self.cancel.cancel();
        debug!(worktree = %self.name, "worktree torn down");
    }

    /// Get or lazily spawn the GitDiffWatcher for one (path, staged) pair
    /// (§4.1). The refresh closure is the same inert placeholder as
    /// `fs_watcher`/`git_watcher` until a real git-command adapter is
    /// wired in (§1: out of scope here).
    pub async fn git_diff_watcher(&self, key: GitDiffKey) -> Arc<DebouncedWatcher<serde_json::Value>> {
        if let Some(existing) = self.git_diff_watchers.read().await.get(&key) {
            return Arc::clone(existing);
        }
        let mut watchers = self.git_diff_watchers.write().await;
        if let Some(existing) = watchers.get(&key) {
            return Arc::clone(existing);
        }
        let watcher = DebouncedWatcher::spawn(Box::new(|| Box::pin(async { serde_json::json!({}) })), self.debounce, "git-diff-changed", self.cancel.clone());
        watchers.insert(key, Arc::clone(&watcher));
        watcher
    }
}

/// Refcounted registry of Worktrees, keyed by name (§3, §5 "Shared-resource
/// policy"). Empty string names the main worktree, created eagerly.
pub struct WorktreeManager {
    config: GatewayConfig,
    adapter: Arc<dyn AgentAdapter>,
    worktrees: RwLock<HashMap<String, Arc<Worktree>>>,
    worktree_bus: ChangeBus<WorktreeInfo>,
    pub worktree_list_watcher: Arc<ListWatcher<WorktreeInfo>>,
    cancel: CancellationToken,
}

impl WorktreeManager {
    pub fn new(config: GatewayConfig, adapter: Arc<dyn AgentAdapter>) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let worktree_bus = ChangeBus::new();
        let worktree_list_watcher = ListWatcher::spawn(worktree_bus.subscribe(), cancel.clone());
        Arc::new(Self { config, adapter, worktrees: RwLock::new(HashMap::new()), worktree_bus, worktree_list_watcher, cancel })
    }

    /// Acquire a reference to the named worktree, creating it on first
    /// access. Every successful call must be balanced by exactly one
    /// [`Self::release`] (§5).
    pub async fn get(&self, name: &str) -> GatewayResult<Arc<Worktree>> {
        if let Some(worktree) = self.worktrees.read().await.get(name) {
            worktree.refcount.fetch_add(1, Ordering::SeqCst);
            return Ok(Arc::clone(worktree));
        }

        let mut worktrees = self.worktrees.write().await;
        if let Some(worktree) = worktrees.get(name) {
            worktree.refcount.fetch_add(1, Ordering::SeqCst);
            return Ok(Arc::clone(worktree));
        }

        let working_dir = if name.is_empty() { self.config.data_dir.clone() } else { self.config.data_dir.join(name) };
        let worktree = Worktree::new(name.to_owned(), working_dir, &self.config, Arc::clone(&self.adapter));
        worktree.refcount.fetch_add(1, Ordering::SeqCst);
        worktrees.insert(name.to_owned(), Arc::clone(&worktree));
        info!(worktree = %name, "worktree created");
        self.worktree_bus.publish(ChangeEvent::Create { item: WorktreeInfo { name: name.to_owned(), working_dir: worktree.working_dir.display().to_string() } });
        Ok(worktree)
    }

    /// Current snapshot of known worktrees, for `worktree.list.subscribe`'s
    /// initial sync payload.
    pub async fn list_info(&self) -> Vec<WorktreeInfo> {
        self.worktrees
            .read()
            .await
            .values()
            .map(|w| WorktreeInfo { name: w.name.clone(), working_dir: w.working_dir.display().to_string() })
            .collect()
    }

    /// Release one reference. At zero, the worktree is torn down and
    /// removed (§5: "zero triggers shutdown of that worktree's watchers
    /// and process manager").
    pub async fn release(&self, name: &str) {
        let mut worktrees = self.worktrees.write().await;
        let Some(worktree) = worktrees.get(name).cloned() else { return };
        let remaining = worktree.refcount.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            worktrees.remove(name);
            drop(worktrees);
            worktree.teardown().await;
            self.worktree_bus.publish(ChangeEvent::Delete { id: name.to_owned() });
        }
    }

    pub async fn shutdown_all(&self) {
        let all: Vec<Arc<Worktree>> = self.worktrees.write().await.drain().map(|(_, w)| w).collect();
        for worktree in all {
            worktree.teardown().await;
        }
        self.cancel.cancel();
    }
}

/// Constant-time string comparison, used for the `auth` bearer-token
/// check (§4.6) to avoid a timing side-channel.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Top-level state owning the WorktreeManager and auth configuration
/// (§9: "The dispatcher should be a value owning references to the
/// WorktreeManager... SettingsStore, and SettingsWatcher" — settings are
/// per-worktree here since each workspace has its own).
pub struct GatewayState {
    pub worktree_manager: Arc<WorktreeManager>,
    pub auth_token: Option<String>,
    pub watcher_channel_capacity: usize,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, adapter: Arc<dyn AgentAdapter>) -> Arc<Self> {
        let auth_token = config.auth_token.clone();
        let watcher_channel_capacity = config.watcher_channel_capacity;
        Arc::new(Self {
            worktree_manager: WorktreeManager::new(config, adapter),
            auth_token,
            watcher_channel_capacity,
        })
    }

    pub fn check_token(&self, presented: &str) -> bool {
        match &self.auth_token {
            None => true,
            Some(expected) => constant_time_eq(presented, expected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_strings() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "secrets"));
        assert!(!constant_time_eq("secret", "wrong!"));
    }
}
