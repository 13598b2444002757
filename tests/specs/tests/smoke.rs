// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `sessiongw` binary and
//! exercise it over its single JSON-RPC-over-WebSocket endpoint.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use sessiongw_specs::GatewayProcess;

const TIMEOUT: Duration = Duration::from_secs(10);

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn send(socket: &mut Ws, id: i64, method: &str, params: Value) -> anyhow::Result<()> {
    let frame = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
    socket.send(Message::Text(frame.to_string().into())).await?;
    Ok(())
}

async fn recv_json(socket: &mut Ws) -> anyhow::Result<Value> {
    loop {
        let msg = tokio::time::timeout(TIMEOUT, socket.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("connection closed before a reply arrived"))??;
        if let Message::Text(text) = msg {
            return Ok(serde_json::from_str(&text)?);
        }
    }
}

#[tokio::test]
async fn http_health() -> anyhow::Result<()> {
    let gateway = GatewayProcess::start()?;
    gateway.wait_healthy(TIMEOUT).await?;

    let resp: Value = reqwest::get(format!("{}/api/v1/health", gateway.base_url())).await?.json().await?;
    assert_eq!(resp["status"], "running");

    Ok(())
}

#[tokio::test]
async fn first_request_must_be_auth() -> anyhow::Result<()> {
    let gateway = GatewayProcess::start()?;
    gateway.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = connect_async(gateway.ws_url()).await?;
    send(&mut ws, 1, "session.list.subscribe", json!({})).await?;
    let reply = recv_json(&mut ws).await?;

    assert_eq!(reply["error"]["code"], -32600);
    Ok(())
}

#[tokio::test]
async fn auth_then_session_and_work_crud_round_trip() -> anyhow::Result<()> {
    let gateway = GatewayProcess::start()?;
    gateway.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = connect_async(gateway.ws_url()).await?;

    send(&mut ws, 1, "auth", json!({ "token": "" })).await?;
    let reply = recv_json(&mut ws).await?;
    assert_eq!(reply["result"]["title"], "sessiongw");

    send(&mut ws, 2, "session.create", json!({ "title": "first session" })).await?;
    let reply = recv_json(&mut ws).await?;
    let session_id = reply["result"]["id"].as_str().ok_or_else(|| anyhow::anyhow!("missing session id"))?.to_owned();
    assert_eq!(reply["result"]["title"], "first session");

    send(&mut ws, 3, "agent_role.create", json!({ "name": "builder", "prompt": "build things" })).await?;
    let reply = recv_json(&mut ws).await?;
    let role_id = reply["result"]["id"].as_str().ok_or_else(|| anyhow::anyhow!("missing role id"))?.to_owned();

    send(&mut ws, 4, "work.create", json!({ "type": "story", "agent_role_id": role_id, "title": "do the thing", "body": "" })).await?;
    let reply = recv_json(&mut ws).await?;
    let work_id = reply["result"]["id"].as_str().ok_or_else(|| anyhow::anyhow!("missing work id"))?.to_owned();
    assert_eq!(reply["result"]["status"], "open");

    send(&mut ws, 5, "work.update", json!({ "id": work_id, "claim_session_id": session_id })).await?;
    let reply = recv_json(&mut ws).await?;
    assert_eq!(reply["result"]["id"], work_id);

    send(&mut ws, 6, "session.delete", json!({ "id": session_id })).await?;
    let reply = recv_json(&mut ws).await?;
    assert_eq!(reply["result"]["ok"], true);

    Ok(())
}

#[tokio::test]
async fn unknown_method_leaves_connection_open() -> anyhow::Result<()> {
    let gateway = GatewayProcess::start()?;
    gateway.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = connect_async(gateway.ws_url()).await?;
    send(&mut ws, 1, "auth", json!({ "token": "" })).await?;
    recv_json(&mut ws).await?;

    send(&mut ws, 2, "chat.not_a_real_method", json!({})).await?;
    let reply = recv_json(&mut ws).await?;
    assert_eq!(reply["error"]["code"], -32601);

    // the connection is still usable after an unknown method
    send(&mut ws, 3, "session.create", json!({ "title": "still alive" })).await?;
    let reply = recv_json(&mut ws).await?;
    assert_eq!(reply["result"]["title"], "still alive");

    Ok(())
}

#[tokio::test]
async fn chat_message_drives_echo_agent_and_replays_on_subscribe() -> anyhow::Result<()> {
    let gateway = GatewayProcess::start()?;
    gateway.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = connect_async(gateway.ws_url()).await?;
    send(&mut ws, 1, "auth", json!({ "token": "" })).await?;
    recv_json(&mut ws).await?;

    send(&mut ws, 2, "session.create", json!({ "title": "chat session" })).await?;
    let reply = recv_json(&mut ws).await?;
    let session_id = reply["result"]["id"].as_str().ok_or_else(|| anyhow::anyhow!("missing session id"))?.to_owned();

    send(&mut ws, 3, "chat.messages.subscribe", json!({ "session_id": session_id })).await?;
    let reply = recv_json(&mut ws).await?;
    assert_eq!(reply["result"]["process_running"], false);

    send(&mut ws, 4, "chat.message", json!({ "session_id": session_id, "content": "hi" })).await?;
    let reply = recv_json(&mut ws).await?;
    assert_eq!(reply["result"]["ok"], true);

    // drain notifications until the echo agent's "done" event lands
    let mut saw_done = false;
    for _ in 0..20 {
        let frame = recv_json(&mut ws).await?;
        if frame["method"] == "chat-messages-changed" && frame["params"]["type"] == "done" {
            saw_done = true;
            break;
        }
    }
    assert!(saw_done, "expected the echo agent's done event to be delivered");

    // a fresh subscriber replays full history including the agent's reply
    send(&mut ws, 5, "chat.messages.subscribe", json!({ "session_id": session_id })).await?;
    let reply = recv_json(&mut ws).await?;
    let history = reply["result"]["history"].as_array().ok_or_else(|| anyhow::anyhow!("expected a history array"))?;
    assert!(history.len() >= 2, "expected at least the user message and an agent event in history");

    Ok(())
}

#[tokio::test]
async fn auth_token_mismatch_is_rejected() -> anyhow::Result<()> {
    let gateway = GatewayProcess::start_with_token("s3cret")?;
    gateway.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = connect_async(gateway.ws_url()).await?;
    send(&mut ws, 1, "auth", json!({ "token": "wrong" })).await?;
    let reply = recv_json(&mut ws).await?;
    assert!(reply["error"].is_object());

    let (mut ws2, _) = connect_async(gateway.ws_url()).await?;
    send(&mut ws2, 1, "auth", json!({ "token": "s3cret" })).await?;
    let reply = recv_json(&mut ws2).await?;
    assert_eq!(reply["result"]["title"], "sessiongw");

    Ok(())
}
