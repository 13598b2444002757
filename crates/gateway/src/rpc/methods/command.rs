// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `command.*` (§4.6, §6): saved command-template CRUD plus the
//! CommandList watcher.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::rpc::connection::{ConnectionState, SubscriptionKind};
use crate::rpc::methods::with_subscription_id;
use crate::rpc::parse_params;
use crate::state::Worktree;
use crate::store::command_store::CommandPatch;

pub async fn handle(worktree: &Worktree, conn: &ConnectionState, method: &str, params: Value) -> GatewayResult<Value> {
    match method {
        "command.create" => create(worktree, params).await,
        "command.update" => update(worktree, params).await,
        "command.delete" => delete(worktree, params).await,
        "command.list.subscribe" => subscribe(worktree, conn).await,
        "command.list.unsubscribe" => unsubscribe(worktree, conn, params).await,
        other => Err(GatewayError::protocol(format!("unknown command method: {other}"))),
    }
}

#[derive(Debug, Deserialize)]
struct CreateParams {
    name: String,
    template: String,
}

async fn create(worktree: &Worktree, params: Value) -> GatewayResult<Value> {
    let params: CreateParams = parse_params(params)?;
    let now_ms = crate::store::epoch_ms();
    let command = worktree.command_store.create(params.name, params.template, now_ms).await;
    Ok(serde_json::to_value(command).unwrap_or(Value::Null))
}

#[derive(Debug, Deserialize)]
struct UpdateParams {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    template: Option<String>,
}

async fn update(worktree: &Worktree, params: Value) -> GatewayResult<Value> {
    let params: UpdateParams = parse_params(params)?;
    let now_ms = crate::store::epoch_ms();
    let patch = CommandPatch { name: params.name, template: params.template };
    let command = worktree.command_store.update(&params.id, patch, now_ms).await?;
    Ok(serde_json::to_value(command).unwrap_or(Value::Null))
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

async fn delete(worktree: &Worktree, params: Value) -> GatewayResult<Value> {
    let params: IdParams = parse_params(params)?;
    worktree.command_store.delete(&params.id).await?;
    Ok(serde_json::json!({ "ok": true }))
}

async fn subscribe(worktree: &Worktree, conn: &ConnectionState) -> GatewayResult<Value> {
    let current = worktree.command_store.list().await;
    let (id, snapshot) = worktree.command_list_watcher.subscribe(conn.notifier.clone(), current).await;
    conn.register_subscription(id.clone(), SubscriptionKind::CommandList).await;
    Ok(with_subscription_id(id, snapshot))
}

async fn unsubscribe(worktree: &Worktree, conn: &ConnectionState, params: Value) -> GatewayResult<Value> {
    let params: IdParams = parse_params(params)?;
    worktree.command_list_watcher.unsubscribe(&params.id).await;
    conn.forget_subscription(&params.id).await;
    Ok(serde_json::json!({ "ok": true }))
}
