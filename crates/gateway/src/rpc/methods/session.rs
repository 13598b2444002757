// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `session.*` (§4.6, §6): session CRUD plus the SessionList watcher.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::rpc::connection::{ConnectionState, SubscriptionKind};
use crate::rpc::methods::with_subscription_id;
use crate::rpc::parse_params;
use crate::state::Worktree;
use crate::store::session_store::SessionPatch;

pub async fn handle(worktree: &Worktree, conn: &ConnectionState, method: &str, params: Value) -> GatewayResult<Value> {
    match method {
        "session.create" => create(worktree, params).await,
        "session.delete" => delete(worktree, params).await,
        "session.update_title" => update_title(worktree, params).await,
        "session.set_mode" => set_mode(worktree, params).await,
        "session.list.subscribe" => subscribe(worktree, conn).await,
        "session.list.unsubscribe" => unsubscribe(worktree, conn, params).await,
        other => Err(GatewayError::protocol(format!("unknown session method: {other}"))),
    }
}

#[derive(Debug, Deserialize)]
struct CreateParams {
    #[serde(default)]
    id: Option<String>,
    title: String,
}

async fn create(worktree: &Worktree, params: Value) -> GatewayResult<Value> {
    let params: CreateParams = parse_params(params)?;
    let now_ms = crate::store::epoch_ms();
    let meta = worktree.session_store.create(params.id, params.title, now_ms).await?;
    Ok(serde_json::to_value(meta).unwrap_or(Value::Null))
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

async fn delete(worktree: &Worktree, params: Value) -> GatewayResult<Value> {
    let params: IdParams = parse_params(params)?;
    worktree.session_store.delete(&params.id).await?;
    Ok(serde_json::json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
struct UpdateTitleParams {
    id: String,
    title: String,
}

async fn update_title(worktree: &Worktree, params: Value) -> GatewayResult<Value> {
    let params: UpdateTitleParams = parse_params(params)?;
    let now_ms = crate::store::epoch_ms();
    let patch = SessionPatch { title: Some(params.title), ..Default::default() };
    let meta = worktree.session_store.update(&params.id, patch, now_ms).await?;
    Ok(serde_json::to_value(meta).unwrap_or(Value::Null))
}

#[derive(Debug, Deserialize)]
struct SetModeParams {
    id: String,
    mode: crate::model::SessionMode,
}

async fn set_mode(worktree: &Worktree, params: Value) -> GatewayResult<Value> {
    let params: SetModeParams = parse_params(params)?;
    let now_ms = crate::store::epoch_ms();
    let patch = SessionPatch { mode: Some(params.mode), ..Default::default() };
    let meta = worktree.session_store.update(&params.id, patch, now_ms).await?;
    Ok(serde_json::to_value(meta).unwrap_or(Value::Null))
}

async fn subscribe(worktree: &Worktree, conn: &ConnectionState) -> GatewayResult<Value> {
    let current = worktree.session_store.list().await;
    let (id, snapshot) = worktree.session_list_watcher.subscribe(conn.notifier.clone(), current).await;
    conn.register_subscription(id.clone(), SubscriptionKind::SessionList).await;
    Ok(with_subscription_id(id, snapshot))
}

async fn unsubscribe(worktree: &Worktree, conn: &ConnectionState, params: Value) -> GatewayResult<Value> {
    let params: IdParams = parse_params(params)?;
    worktree.session_list_watcher.unsubscribe(&params.id).await;
    conn.forget_subscription(&params.id).await;
    Ok(serde_json::json!({ "ok": true }))
}
