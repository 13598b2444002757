// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `fs.*` and `git.*` (§4.1, §4.6, §6): debounced filesystem/git watchers.
//! `git.diff.subscribe` is parameterized by `(path, staged)`, so unlike
//! `fs.subscribe`/`git.subscribe` it lazily creates one `DebouncedWatcher`
//! per distinct pair on first subscribe.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::rpc::connection::{ConnectionState, SubscriptionKind};
use crate::rpc::parse_params;
use crate::state::Worktree;
use crate::watcher::fsgit::GitDiffKey;

pub async fn handle_fs(worktree: &Worktree, conn: &ConnectionState, method: &str, params: Value) -> GatewayResult<Value> {
    match method {
        "fs.subscribe" => {
            let (id, snapshot) = worktree.fs_watcher.subscribe(conn.notifier.clone(), serde_json::json!({})).await;
            conn.register_subscription(id.clone(), SubscriptionKind::Fs).await;
            Ok(serde_json::json!({ "id": id, "value": snapshot }))
        }
        "fs.unsubscribe" => {
            let params: IdParams = parse_params(params)?;
            worktree.fs_watcher.unsubscribe(&params.id).await;
            conn.forget_subscription(&params.id).await;
            Ok(serde_json::json!({ "ok": true }))
        }
        other => Err(GatewayError::protocol(format!("unknown fs method: {other}"))),
    }
}

pub async fn handle_git(worktree: &Worktree, conn: &ConnectionState, method: &str, params: Value) -> GatewayResult<Value> {
    match method {
        "git.subscribe" => {
            let (id, snapshot) = worktree.git_watcher.subscribe(conn.notifier.clone(), serde_json::json!({})).await;
            conn.register_subscription(id.clone(), SubscriptionKind::Git).await;
            Ok(serde_json::json!({ "id": id, "value": snapshot }))
        }
        "git.unsubscribe" => {
            let params: IdParams = parse_params(params)?;
            worktree.git_watcher.unsubscribe(&params.id).await;
            conn.forget_subscription(&params.id).await;
            Ok(serde_json::json!({ "ok": true }))
        }
        "git.diff.subscribe" => diff_subscribe(worktree, conn, params).await,
        "git.diff.unsubscribe" => diff_unsubscribe(worktree, conn, params).await,
        other => Err(GatewayError::protocol(format!("unknown git method: {other}"))),
    }
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DiffSubscribeParams {
    path: String,
    #[serde(default)]
    staged: bool,
}

async fn diff_subscribe(worktree: &Worktree, conn: &ConnectionState, params: Value) -> GatewayResult<Value> {
    let params: DiffSubscribeParams = parse_params(params)?;
    let key = GitDiffKey { path: params.path, staged: params.staged };
    let watcher = worktree.git_diff_watcher(key.clone()).await;
    let (id, snapshot) = watcher.subscribe(conn.notifier.clone(), serde_json::json!({})).await;
    conn.register_subscription(id.clone(), SubscriptionKind::GitDiff(key)).await;
    Ok(serde_json::json!({ "id": id, "value": snapshot }))
}

#[derive(Debug, Deserialize)]
struct DiffUnsubscribeParams {
    id: String,
    path: String,
    #[serde(default)]
    staged: bool,
}

async fn diff_unsubscribe(worktree: &Worktree, conn: &ConnectionState, params: Value) -> GatewayResult<Value> {
    let params: DiffUnsubscribeParams = parse_params(params)?;
    let key = GitDiffKey { path: params.path, staged: params.staged };
    if let Some(watcher) = worktree.git_diff_watchers.read().await.get(&key) {
        watcher.unsubscribe(&params.id).await;
    }
    conn.forget_subscription(&params.id).await;
    Ok(serde_json::json!({ "ok": true }))
}
