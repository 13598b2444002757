// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection state (§4.6, §5): auth flag, the bound Worktree
//! reference, and the subscription map that makes teardown correct even
//! if a client never sends `*.unsubscribe`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::error::{GatewayError, GatewayResult};
use crate::state::{Worktree, WorktreeManager};
use crate::watcher::fsgit::GitDiffKey;
use crate::watcher::Notifier;

/// Which watcher a subscription id belongs to, so teardown can route the
/// unsubscribe call without the caller having to remember (§4.6 dispatch
/// policy: "register... so teardown cleans up even if the client never
/// calls `*.unsubscribe`").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionKind {
    SessionList,
    WorkList,
    AgentRoleList,
    CommandList,
    Settings,
    Chat,
    Fs,
    Git,
    GitDiff(GitDiffKey),
}

/// One connection's mutable state. The `state` mutex covers auth/worktree
/// binding/subscriptions; transport writes are serialized separately by
/// the single task draining the Notifier's receiver (§5 "Locks").
pub struct ConnectionState {
    pub id: String,
    pub notifier: Notifier,
    authenticated: AtomicBool,
    inner: Mutex<Inner>,
}

struct Inner {
    worktree: Option<Arc<Worktree>>,
    worktree_name: String,
    subscriptions: HashMap<String, SubscriptionKind>,
    /// Subscription id for the Worktree list watcher, tracked separately
    /// since that watcher lives on the WorktreeManager and outlives any
    /// single bound worktree (§4.1, `worktree.list.subscribe`).
    worktree_list_subscription: Option<String>,
}

impl ConnectionState {
    pub fn new(id: String, channel_capacity: usize) -> (Arc<Self>, mpsc::Receiver<crate::watcher::Notification>) {
        let (notifier, rx) = Notifier::channel(channel_capacity);
        let state = Arc::new(Self {
            id,
            notifier,
            authenticated: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                worktree: None,
                worktree_name: String::new(),
                subscriptions: HashMap::new(),
                worktree_list_subscription: None,
            }),
        });
        (state, rx)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Mark this connection authenticated and bind it to `worktree`,
    /// taking ownership of the caller's refcount reference (§4.6: "On
    /// success the connection is bound to the requested worktree...via a
    /// refcount increment").
    pub async fn complete_auth(&self, worktree_name: String, worktree: Arc<Worktree>) {
        self.authenticated.store(true, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        inner.worktree_name = worktree_name;
        inner.worktree = Some(worktree);
    }

    pub async fn bound_worktree(&self) -> Option<Arc<Worktree>> {
        self.inner.lock().await.worktree.clone()
    }

    pub async fn worktree_name(&self) -> String {
        self.inner.lock().await.worktree_name.clone()
    }

    pub async fn register_subscription(&self, id: String, kind: SubscriptionKind) {
        self.inner.lock().await.subscriptions.insert(id, kind);
    }

    pub async fn forget_subscription(&self, id: &str) {
        self.inner.lock().await.subscriptions.remove(id);
    }

    pub async fn register_worktree_list_subscription(&self, id: String) {
        self.inner.lock().await.worktree_list_subscription = Some(id);
    }

    /// Take and clear the current Worktree list subscription id, if any.
    pub async fn take_worktree_list_subscription(&self) -> Option<String> {
        self.inner.lock().await.worktree_list_subscription.take()
    }

    /// Swap the bound worktree, returning the previous one and its
    /// subscriptions so the caller can unsubscribe/release outside any
    /// lock (§4.6 `worktree.switch` protocol).
    pub async fn swap_worktree(&self, worktree_name: String, worktree: Arc<Worktree>) -> GatewayResult<(Arc<Worktree>, HashMap<String, SubscriptionKind>)> {
        let mut inner = self.inner.lock().await;
        let old_worktree = inner
            .worktree
            .replace(worktree)
            .ok_or_else(|| GatewayError::protocol("worktree.switch before auth"))?;
        inner.worktree_name = worktree_name;
        let old_subs = std::mem::take(&mut inner.subscriptions);
        Ok((old_worktree, old_subs))
    }

    /// Drain the subscription map and bound worktree for teardown. After
    /// this call the connection is inert.
    async fn take_for_teardown(&self) -> (Option<Arc<Worktree>>, String, HashMap<String, SubscriptionKind>, Option<String>) {
        let mut inner = self.inner.lock().await;
        (
            inner.worktree.take(),
            std::mem::take(&mut inner.worktree_name),
            std::mem::take(&mut inner.subscriptions),
            inner.worktree_list_subscription.take(),
        )
    }

    /// Full connection teardown (§4.6, §5 "Shared-resource policy"):
    /// unsubscribe every live subscription from the bound worktree's
    /// watchers, unsubscribe from the Worktree list watcher if
    /// subscribed, then release the worktree reference.
    pub async fn teardown(&self, worktree_manager: &WorktreeManager) {
        let (worktree, name, subscriptions, worktree_list_sub) = self.take_for_teardown().await;
        if let Some(id) = worktree_list_sub {
            worktree_manager.worktree_list_watcher.unsubscribe(&id).await;
        }
        let Some(worktree) = worktree else { return };
        unsubscribe_all(&worktree, &subscriptions).await;
        worktree_manager.release(&name).await;
    }
}

/// Unsubscribe every tracked subscription id from the appropriate watcher
/// on `worktree`. Used both by full teardown and by `worktree.switch`'s
/// "unsubscribe from the old worktree's Watchers" step.
pub async fn unsubscribe_all(worktree: &Worktree, subscriptions: &HashMap<String, SubscriptionKind>) {
    for (id, kind) in subscriptions {
        match kind {
            SubscriptionKind::SessionList => worktree.session_list_watcher.unsubscribe(id).await,
            SubscriptionKind::WorkList => worktree.work_list_watcher.unsubscribe(id).await,
            SubscriptionKind::AgentRoleList => worktree.agent_role_list_watcher.unsubscribe(id).await,
            SubscriptionKind::CommandList => worktree.command_list_watcher.unsubscribe(id).await,
            SubscriptionKind::Settings => worktree.settings_watcher.unsubscribe(id).await,
            SubscriptionKind::Chat => worktree.chat_watcher.unsubscribe(id).await,
            SubscriptionKind::Fs => worktree.fs_watcher.unsubscribe(id).await,
            SubscriptionKind::Git => worktree.git_watcher.unsubscribe(id).await,
            SubscriptionKind::GitDiff(key) => {
                if let Some(watcher) = worktree.git_diff_watchers.read().await.get(key) {
                    watcher.unsubscribe(id).await;
                }
            }
        }
    }
}
