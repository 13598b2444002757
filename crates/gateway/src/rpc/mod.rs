// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC 2.0 dispatcher (§4.6, §6, §7): one [`Dispatcher`] per
//! [`crate::state::GatewayState`], invoked once per inbound WebSocket text
//! frame by the transport layer.

pub mod connection;
pub mod methods;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::error::{rpc_code, GatewayError, GatewayResult};
use crate::rpc::connection::ConnectionState;
use crate::state::GatewayState;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default = "null_id")]
    id: Value,
    method: String,
    #[serde(default = "null_params")]
    params: Value,
}

fn null_id() -> Value {
    Value::Null
}

fn null_params() -> Value {
    Value::Null
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Serialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Outcome of dispatching one frame: the reply text to send, and whether
/// the transport must close the connection afterward (§7 Protocol errors).
pub struct DispatchResult {
    pub reply: String,
    pub close: bool,
}

pub struct Dispatcher {
    state: Arc<GatewayState>,
}

impl Dispatcher {
    pub fn new(state: Arc<GatewayState>) -> Self {
        Self { state }
    }

    /// Handle one inbound text frame, returning the JSON text to send back
    /// and whether the connection must then close.
    pub async fn dispatch(&self, conn: &ConnectionState, raw: &str) -> DispatchResult {
        let request: RpcRequest = match serde_json::from_str(raw) {
            Ok(r) => r,
            Err(_) => return protocol_error(Value::Null, "malformed JSON-RPC request"),
        };

        if !conn.is_authenticated() && request.method != "auth" {
            return protocol_error(request.id, "the first request on a connection must be `auth`");
        }

        let routed = AssertUnwindSafe(self.route(conn, &request.method, request.params)).catch_unwind().await;

        match routed {
            Ok(Ok(result)) => success(request.id, result),
            Ok(Err(RouteError::Gateway(err))) => {
                let close = err.closes_connection();
                DispatchResult { reply: encode(error_response(request.id, err.rpc_code(), err.message())), close }
            }
            Ok(Err(RouteError::MethodNotFound)) => {
                DispatchResult { reply: encode(error_response(request.id, rpc_code::METHOD_NOT_FOUND, format!("unknown method: {}", request.method))), close: false }
            }
            Err(_panic) => {
                error!(method = %request.method, "rpc handler panicked");
                DispatchResult { reply: encode(error_response(request.id, rpc_code::INTERNAL_ERROR, "internal error")), close: false }
            }
        }
    }

    async fn route(&self, conn: &ConnectionState, method: &str, params: Value) -> Result<Value, RouteError> {
        if method == "auth" {
            return methods::auth::handle(&self.state, conn, params).await.map_err(RouteError::Gateway);
        }

        let worktree = conn
            .bound_worktree()
            .await
            .ok_or_else(|| RouteError::Gateway(GatewayError::protocol("no worktree bound")))?;

        let namespace = method.split('.').next().unwrap_or("");
        match namespace {
            "chat" => methods::chat::handle(&worktree, conn, method, params).await.map_err(RouteError::Gateway),
            "session" => methods::session::handle(&worktree, conn, method, params).await.map_err(RouteError::Gateway),
            "work" => methods::work::handle(&worktree, conn, method, params).await.map_err(RouteError::Gateway),
            "worktree" => methods::worktree::handle(&self.state, conn, method, params).await.map_err(RouteError::Gateway),
            "agent_role" => methods::agent_role::handle(&worktree, conn, method, params).await.map_err(RouteError::Gateway),
            "command" => methods::command::handle(&worktree, conn, method, params).await.map_err(RouteError::Gateway),
            "settings" => methods::settings::handle(&worktree, conn, method, params).await.map_err(RouteError::Gateway),
            "fs" => methods::fsgit::handle_fs(&worktree, conn, method, params).await.map_err(RouteError::Gateway),
            "git" => methods::fsgit::handle_git(&worktree, conn, method, params).await.map_err(RouteError::Gateway),
            _ => Err(RouteError::MethodNotFound),
        }
    }
}

/// A method that doesn't exist in any namespace (§6, §8: "Unknown method
/// returns `MethodNotFound` and leaves connection open") is distinct from
/// [`GatewayError`] because it's a dispatch-layer fact, not a domain one.
enum RouteError {
    Gateway(GatewayError),
    MethodNotFound,
}

fn success(id: Value, result: Value) -> DispatchResult {
    DispatchResult { reply: encode(RpcResponse { jsonrpc: "2.0", id, result: Some(result), error: None }), close: false }
}

fn error_response(id: Value, code: i64, message: impl Into<String>) -> RpcResponse {
    RpcResponse { jsonrpc: "2.0", id, result: None, error: Some(RpcErrorBody { code, message: message.into() }) }
}

fn protocol_error(id: Value, message: &str) -> DispatchResult {
    DispatchResult { reply: encode(error_response(id, rpc_code::INVALID_REQUEST, message)), close: true }
}

fn encode(response: RpcResponse) -> String {
    serde_json::to_string(&response).unwrap_or_else(|_| {
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"failed to encode response"}}"#.to_owned()
    })
}

/// Deserialize a handler's `params` object, mapping shape errors to
/// `InvalidParams` (§7 Validation).
pub(crate) fn parse_params<T: DeserializeOwned>(params: Value) -> GatewayResult<T> {
    serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))
}
