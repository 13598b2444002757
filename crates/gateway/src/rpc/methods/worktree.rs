// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `worktree.*` (§4.1, §4.6, §6): `worktree.switch` and the Worktree list
//! watcher. Unlike every other namespace this one operates on
//! `GatewayState` directly rather than a bound `Worktree`, since it is
//! the mechanism by which a connection's bound worktree changes.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::rpc::connection::{unsubscribe_all, ConnectionState};
use crate::rpc::parse_params;
use crate::state::GatewayState;

pub async fn handle(state: &GatewayState, conn: &ConnectionState, method: &str, params: Value) -> GatewayResult<Value> {
    match method {
        "worktree.switch" => switch(state, conn, params).await,
        "worktree.list.subscribe" => subscribe(state, conn).await,
        "worktree.list.unsubscribe" => unsubscribe(state, conn).await,
        other => Err(GatewayError::protocol(format!("unknown worktree method: {other}"))),
    }
}

#[derive(Debug, Deserialize)]
struct SwitchParams {
    #[serde(default)]
    name: String,
}

/// §4.6 dispatch policy: fetch the new worktree outside the connection
/// lock, swap under it, then unsubscribe/release the old one outside the
/// lock again. If already bound to `name`, no `get()` is performed at
/// all — there is no extra reference to release, and releasing the
/// connection's sole existing reference would tear the worktree down out
/// from under it.
async fn switch(state: &GatewayState, conn: &ConnectionState, params: Value) -> GatewayResult<Value> {
    let params: SwitchParams = parse_params(params)?;

    if conn.worktree_name().await == params.name {
        let work_dir = conn.bound_worktree().await.map(|w| w.working_dir.display().to_string()).unwrap_or_default();
        return Ok(serde_json::json!({ "worktree_name": params.name, "work_dir": work_dir }));
    }

    let new_worktree = state.worktree_manager.get(&params.name).await?;
    let work_dir = new_worktree.working_dir.display().to_string();
    let (old_worktree, old_subs) = conn.swap_worktree(params.name.clone(), new_worktree).await?;

    unsubscribe_all(&old_worktree, &old_subs).await;
    let old_name = old_worktree.name.clone();
    drop(old_worktree);
    state.worktree_manager.release(&old_name).await;

    Ok(serde_json::json!({ "worktree_name": params.name, "work_dir": work_dir }))
}

async fn subscribe(state: &GatewayState, conn: &ConnectionState) -> GatewayResult<Value> {
    let current = state.worktree_manager.list_info().await;
    let (id, snapshot) = state.worktree_manager.worktree_list_watcher.subscribe(conn.notifier.clone(), current).await;
    conn.register_worktree_list_subscription(id.clone()).await;
    let mut snapshot = snapshot;
    if let Some(obj) = snapshot.as_object_mut() {
        obj.insert("id".to_owned(), Value::String(id));
    }
    Ok(snapshot)
}

async fn unsubscribe(state: &GatewayState, conn: &ConnectionState) -> GatewayResult<Value> {
    // One subscription slot per connection (§4.1) so unsubscribe needs no
    // id param, unlike the per-entity list watchers.
    if let Some(id) = conn.take_worktree_list_subscription().await {
        state.worktree_manager.worktree_list_watcher.unsubscribe(&id).await;
    }
    Ok(serde_json::json!({ "ok": true }))
}
