// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The single WebSocket endpoint every client speaks JSON-RPC over
//! (§4.6, §6). One task per connection: it both drains inbound frames
//! into the [`Dispatcher`] and drains the connection's [`Notifier`]
//! receiver, so transport writes are naturally serialized by running on
//! one task (§5 "Locks": "one separate mutex serializes transport
//! writes" — here a single writer makes the mutex unnecessary).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info};

use crate::ids::new_id;
use crate::rpc::connection::ConnectionState;
use crate::rpc::Dispatcher;
use crate::state::GatewayState;

pub async fn ws_handler(State(state): State<Arc<GatewayState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let connection_id = new_id();
    let (conn, mut notifier_rx) = ConnectionState::new(connection_id.clone(), state.watcher_channel_capacity);
    let dispatcher = Dispatcher::new(Arc::clone(&state));
    let (mut ws_tx, mut ws_rx) = socket.split();

    info!(connection_id = %connection_id, "connection accepted");

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let result = dispatcher.dispatch(&conn, &text).await;
                        if ws_tx.send(Message::Text(result.reply.into())).await.is_err() {
                            break;
                        }
                        if result.close {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    // Binary/Ping/Pong frames carry no JSON-RPC content (§6: "text frames").
                    _ => {}
                }
            }
            notification = notifier_rx.recv() => {
                let Some(notification) = notification else { break };
                let envelope = serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": notification.method,
                    "params": notification.params,
                });
                let Ok(text) = serde_json::to_string(&envelope) else { continue };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    conn.teardown(&state.worktree_manager).await;
    debug!(connection_id = %connection_id, "connection torn down");
}
