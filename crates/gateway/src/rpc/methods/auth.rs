// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `auth` (§4.6): the only method admitted before a connection is
//! authenticated.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::rpc::connection::ConnectionState;
use crate::rpc::parse_params;
use crate::state::GatewayState;

#[derive(Debug, Deserialize)]
struct AuthParams {
    token: String,
    #[serde(default)]
    worktree: Option<String>,
}

pub async fn handle(state: &GatewayState, conn: &ConnectionState, params: Value) -> GatewayResult<Value> {
    let params: AuthParams = parse_params(params)?;
    if !state.check_token(&params.token) {
        return Err(GatewayError::protocol("invalid auth token"));
    }

    let worktree_name = params.worktree.unwrap_or_default();
    let worktree = state.worktree_manager.get(&worktree_name).await?;
    let work_dir = worktree.working_dir.display().to_string();
    conn.complete_auth(worktree_name.clone(), worktree).await;

    Ok(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "title": "sessiongw",
        "work_dir": work_dir,
        "worktree_name": worktree_name,
    }))
}
