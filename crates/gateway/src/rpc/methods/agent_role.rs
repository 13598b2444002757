// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `agent_role.*` (§4.6, §6): agent-role CRUD plus the AgentRoleList watcher.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::rpc::connection::{ConnectionState, SubscriptionKind};
use crate::rpc::methods::with_subscription_id;
use crate::rpc::parse_params;
use crate::state::Worktree;
use crate::store::role_store::RolePatch;

pub async fn handle(worktree: &Worktree, conn: &ConnectionState, method: &str, params: Value) -> GatewayResult<Value> {
    match method {
        "agent_role.create" => create(worktree, params).await,
        "agent_role.update" => update(worktree, params).await,
        "agent_role.delete" => delete(worktree, params).await,
        "agent_role.list.subscribe" => subscribe(worktree, conn).await,
        "agent_role.list.unsubscribe" => unsubscribe(worktree, conn, params).await,
        other => Err(GatewayError::protocol(format!("unknown agent_role method: {other}"))),
    }
}

#[derive(Debug, Deserialize)]
struct CreateParams {
    name: String,
    prompt: String,
}

async fn create(worktree: &Worktree, params: Value) -> GatewayResult<Value> {
    let params: CreateParams = parse_params(params)?;
    let now_ms = crate::store::epoch_ms();
    let role = worktree.role_store.create(params.name, params.prompt, now_ms).await;
    Ok(serde_json::to_value(role).unwrap_or(Value::Null))
}

#[derive(Debug, Deserialize)]
struct UpdateParams {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

async fn update(worktree: &Worktree, params: Value) -> GatewayResult<Value> {
    let params: UpdateParams = parse_params(params)?;
    let now_ms = crate::store::epoch_ms();
    let patch = RolePatch { name: params.name, prompt: params.prompt };
    let role = worktree.role_store.update(&params.id, patch, now_ms).await?;
    Ok(serde_json::to_value(role).unwrap_or(Value::Null))
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

async fn delete(worktree: &Worktree, params: Value) -> GatewayResult<Value> {
    let params: IdParams = parse_params(params)?;
    worktree.role_store.delete(&params.id, &worktree.work_store).await?;
    Ok(serde_json::json!({ "ok": true }))
}

async fn subscribe(worktree: &Worktree, conn: &ConnectionState) -> GatewayResult<Value> {
    let current = worktree.role_store.list().await;
    let (id, snapshot) = worktree.agent_role_list_watcher.subscribe(conn.notifier.clone(), current).await;
    conn.register_subscription(id.clone(), SubscriptionKind::AgentRoleList).await;
    Ok(with_subscription_id(id, snapshot))
}

async fn unsubscribe(worktree: &Worktree, conn: &ConnectionState, params: Value) -> GatewayResult<Value> {
    let params: IdParams = parse_params(params)?;
    worktree.agent_role_list_watcher.unsubscribe(&params.id).await;
    conn.forget_subscription(&params.id).await;
    Ok(serde_json::json!({ "ok": true }))
}
