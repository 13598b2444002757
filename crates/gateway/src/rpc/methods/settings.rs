// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `settings.*` (§4.1, §4.6, §6): an opaque per-worktree settings document,
//! full-snapshot-on-change.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::rpc::connection::{ConnectionState, SubscriptionKind};
use crate::rpc::parse_params;
use crate::state::Worktree;

pub async fn handle(worktree: &Worktree, conn: &ConnectionState, method: &str, params: Value) -> GatewayResult<Value> {
    match method {
        "settings.get" => get(worktree).await,
        "settings.update" => update(worktree, params).await,
        "settings.subscribe" => subscribe(worktree, conn).await,
        "settings.unsubscribe" => unsubscribe(worktree, conn, params).await,
        other => Err(GatewayError::protocol(format!("unknown settings method: {other}"))),
    }
}

async fn get(worktree: &Worktree) -> GatewayResult<Value> {
    Ok(worktree.settings_store.get().await)
}

#[derive(Debug, Deserialize)]
struct UpdateParams {
    patch: Value,
}

async fn update(worktree: &Worktree, params: Value) -> GatewayResult<Value> {
    let params: UpdateParams = parse_params(params)?;
    Ok(worktree.settings_store.update(params.patch).await)
}

async fn subscribe(worktree: &Worktree, conn: &ConnectionState) -> GatewayResult<Value> {
    let current = worktree.settings_store.get().await;
    let (id, snapshot) = worktree.settings_watcher.subscribe(conn.notifier.clone(), current).await;
    conn.register_subscription(id.clone(), SubscriptionKind::Settings).await;
    Ok(serde_json::json!({ "id": id, "settings": snapshot }))
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

async fn unsubscribe(worktree: &Worktree, conn: &ConnectionState, params: Value) -> GatewayResult<Value> {
    let params: IdParams = parse_params(params)?;
    worktree.settings_watcher.unsubscribe(&params.id).await;
    conn.forget_subscription(&params.id).await;
    Ok(serde_json::json!({ "ok": true }))
}
