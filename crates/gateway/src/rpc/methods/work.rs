// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `work.*` (§4.6, §4.7, §6): story/task CRUD, `work.start`, and the
//! WorkList watcher.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::rpc::connection::{ConnectionState, SubscriptionKind};
use crate::rpc::methods::with_subscription_id;
use crate::rpc::parse_params;
use crate::state::Worktree;
use crate::store::work_store::WorkPatch;

pub async fn handle(worktree: &Worktree, conn: &ConnectionState, method: &str, params: Value) -> GatewayResult<Value> {
    match method {
        "work.create" => create(worktree, params).await,
        "work.update" => update(worktree, params).await,
        "work.delete" => delete(worktree, params).await,
        "work.start" => start(worktree, params).await,
        "work.list.subscribe" => subscribe(worktree, conn).await,
        "work.list.unsubscribe" => unsubscribe(worktree, conn, params).await,
        other => Err(GatewayError::protocol(format!("unknown work method: {other}"))),
    }
}

#[derive(Debug, Deserialize)]
struct CreateParams {
    #[serde(rename = "type")]
    kind: crate::model::WorkType,
    #[serde(default)]
    parent_id: String,
    #[serde(default)]
    agent_role_id: Option<String>,
    title: String,
    #[serde(default)]
    body: String,
}

async fn create(worktree: &Worktree, params: Value) -> GatewayResult<Value> {
    let params: CreateParams = parse_params(params)?;
    let now_ms = crate::store::epoch_ms();
    let work = worktree
        .work_store
        .create(params.kind, params.parent_id, params.agent_role_id, params.title, params.body, now_ms)
        .await?;
    Ok(serde_json::to_value(work).unwrap_or(Value::Null))
}

#[derive(Debug, Deserialize)]
struct UpdateParams {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    status: Option<crate::model::WorkStatus>,
    #[serde(default)]
    claim_session_id: Option<String>,
}

async fn update(worktree: &Worktree, params: Value) -> GatewayResult<Value> {
    let params: UpdateParams = parse_params(params)?;
    let now_ms = crate::store::epoch_ms();
    let patch = WorkPatch { title: params.title, body: params.body, status: params.status, claim_session_id: params.claim_session_id };
    let work = worktree.work_store.update(&params.id, patch, now_ms).await?;
    Ok(serde_json::to_value(work).unwrap_or(Value::Null))
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

async fn delete(worktree: &Worktree, params: Value) -> GatewayResult<Value> {
    let params: IdParams = parse_params(params)?;
    worktree.work_store.delete(&params.id).await?;
    Ok(serde_json::json!({ "ok": true }))
}

async fn start(worktree: &Worktree, params: Value) -> GatewayResult<Value> {
    let params: IdParams = parse_params(params)?;
    let now_ms = crate::store::epoch_ms();
    let work = worktree.work_starter.start(&params.id, now_ms).await?;
    Ok(serde_json::to_value(work).unwrap_or(Value::Null))
}

async fn subscribe(worktree: &Worktree, conn: &ConnectionState) -> GatewayResult<Value> {
    let current = worktree.work_store.list().await;
    let (id, snapshot) = worktree.work_list_watcher.subscribe(conn.notifier.clone(), current).await;
    conn.register_subscription(id.clone(), SubscriptionKind::WorkList).await;
    Ok(with_subscription_id(id, snapshot))
}

async fn unsubscribe(worktree: &Worktree, conn: &ConnectionState, params: Value) -> GatewayResult<Value> {
    let params: IdParams = parse_params(params)?;
    worktree.work_list_watcher.unsubscribe(&params.id).await;
    conn.forget_subscription(&params.id).await;
    Ok(serde_json::json!({ "ok": true }))
}
