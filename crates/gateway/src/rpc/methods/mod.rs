// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One module per method namespace named in §4.6. Each `handle` takes the
//! namespace-appropriate scope (`&GatewayState` for `auth`/`worktree`,
//! `&Worktree` for everything else bound to a connection) plus the raw
//! method name (for the `*.list.subscribe` / `*.list.unsubscribe` pairs
//! sharing one handler) and params.

pub mod agent_role;
pub mod auth;
pub mod chat;
pub mod command;
pub mod fsgit;
pub mod session;
pub mod settings;
pub mod work;
pub mod worktree;

use serde_json::Value;

/// Merge a subscription id into a watcher's `sync` snapshot object, so
/// `*.subscribe` results read as one flat object (§6: "Every list-watcher
/// notification includes an `operation` tag and either a full item or an
/// id" — the initial subscribe result follows the same shape, with `id`
/// added).
pub(crate) fn with_subscription_id(id: String, mut snapshot: Value) -> Value {
    if let Some(obj) = snapshot.as_object_mut() {
        obj.insert("id".to_owned(), Value::String(id));
        snapshot
    } else {
        serde_json::json!({ "id": id, "value": snapshot })
    }
}
