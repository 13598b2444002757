// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `chat.*` (§4.2, §4.5, §4.6, §6): the message/interrupt/response
//! commands that drive a session's agent sub-process, and the chat
//! history watcher's subscribe/unsubscribe pair.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{GatewayError, GatewayResult};
use crate::model::session::{EventKind, PermissionChoice};
use crate::process::StartParams;
use crate::rpc::connection::{ConnectionState, SubscriptionKind};
use crate::rpc::parse_params;
use crate::state::Worktree;
use crate::store::session_store::SessionPatch;

pub async fn handle(worktree: &Worktree, conn: &ConnectionState, method: &str, params: Value) -> GatewayResult<Value> {
    match method {
        "chat.messages.subscribe" => subscribe(worktree, conn, params).await,
        "chat.messages.unsubscribe" => unsubscribe(worktree, conn, params).await,
        "chat.message" => message(worktree, params).await,
        "chat.interrupt" => interrupt(worktree, params).await,
        "chat.permission_response" => permission_response(worktree, params).await,
        "chat.question_response" => question_response(worktree, params).await,
        other => Err(GatewayError::protocol(format!("unknown chat method: {other}"))),
    }
}

#[derive(Debug, Deserialize)]
struct SessionIdParams {
    session_id: String,
}

/// §6: `chat.messages.subscribe{session_id} -> {id, history, process_running}`.
/// `process_running` is not something the watcher knows about, since it
/// tracks history appends, not process lifecycle, so it's composed here
/// from the ProcessManager's own view.
async fn subscribe(worktree: &Worktree, conn: &ConnectionState, params: Value) -> GatewayResult<Value> {
    let params: SessionIdParams = parse_params(params)?;
    let history = worktree.session_store.history(&params.session_id).await?;
    let (id, snapshot) = worktree.chat_watcher.subscribe(conn.notifier.clone(), params.session_id.clone(), history).await;
    conn.register_subscription(id.clone(), SubscriptionKind::Chat).await;
    let process_running = worktree.process_manager.has_process(&params.session_id).await;
    Ok(serde_json::json!({
        "id": id,
        "history": snapshot["events"],
        "process_running": process_running,
    }))
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

async fn unsubscribe(worktree: &Worktree, conn: &ConnectionState, params: Value) -> GatewayResult<Value> {
    let params: IdParams = parse_params(params)?;
    worktree.chat_watcher.unsubscribe(&params.id).await;
    conn.forget_subscription(&params.id).await;
    Ok(serde_json::json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
struct MessageParams {
    session_id: String,
    content: String,
}

/// §4.2: a chat message both lands in the session's history (so replaying
/// subscribers see it) and starts or resumes the session's agent process,
/// resuming iff the session was previously activated.
async fn message(worktree: &Worktree, params: Value) -> GatewayResult<Value> {
    let params: MessageParams = parse_params(params)?;
    let now_ms = crate::store::epoch_ms();

    let meta = worktree.session_store.get(&params.session_id).await?;
    let start_params = StartParams {
        session_id: params.session_id.clone(),
        working_dir: worktree.working_dir.clone(),
        resume: meta.activated,
        mode: meta.mode,
        system_prompt_override: None,
    };
    let (session, _created) = worktree.process_manager.get_or_create_process(params.session_id.clone(), start_params).await?;

    if !meta.activated {
        let patch = SessionPatch { activated: Some(true), ..Default::default() };
        worktree.session_store.update(&params.session_id, patch, now_ms).await?;
    }

    worktree
        .session_store
        .append_to_history(&params.session_id, EventKind::Message { content: params.content.clone(), extra: Default::default() }, now_ms)
        .await?;

    session.send_message(params.content).await?;
    Ok(serde_json::json!({ "ok": true }))
}

async fn interrupt(worktree: &Worktree, params: Value) -> GatewayResult<Value> {
    let params: SessionIdParams = parse_params(params)?;
    let session = worktree
        .process_manager
        .get_process(&params.session_id)
        .await
        .ok_or_else(|| GatewayError::invalid_transition("no running process for session"))?;
    session.send_interrupt().await?;
    Ok(serde_json::json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
struct PermissionResponseParams {
    session_id: String,
    request_id: String,
    #[serde(default)]
    tool_use_id: Option<String>,
    #[serde(default)]
    tool_input: Value,
    #[serde(default)]
    permission_suggestions: Value,
    choice: PermissionChoice,
}

/// `tool_use_id`/`tool_input`/`permission_suggestions` are the client's
/// echo of the originating `PermissionRequest` event; they're recorded
/// verbatim on the response record but play no role in validating it —
/// that's `request_id` alone, checked against the session's pending set.
async fn permission_response(worktree: &Worktree, params: Value) -> GatewayResult<Value> {
    let params: PermissionResponseParams = parse_params(params)?;
    let _ = (params.tool_use_id, params.tool_input, params.permission_suggestions);
    let now_ms = crate::store::epoch_ms();

    let session = worktree
        .process_manager
        .get_process(&params.session_id)
        .await
        .ok_or_else(|| GatewayError::invalid_transition("no running process for session"))?;

    session.send_permission_response(params.request_id.clone(), params.choice).await?;
    worktree
        .session_store
        .append_to_history(&params.session_id, EventKind::PermissionResponse { request_id: params.request_id, choice: params.choice }, now_ms)
        .await?;
    Ok(serde_json::json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
struct QuestionResponseParams {
    session_id: String,
    request_id: String,
    #[serde(default)]
    tool_use_id: Option<String>,
    #[serde(default)]
    answers: Option<Value>,
    #[serde(default)]
    cancelled: bool,
}

async fn question_response(worktree: &Worktree, params: Value) -> GatewayResult<Value> {
    let params: QuestionResponseParams = parse_params(params)?;
    let _ = params.tool_use_id;
    let now_ms = crate::store::epoch_ms();

    let session = worktree
        .process_manager
        .get_process(&params.session_id)
        .await
        .ok_or_else(|| GatewayError::invalid_transition("no running process for session"))?;

    session.send_question_response(params.request_id.clone(), params.answers.clone(), params.cancelled).await?;
    worktree
        .session_store
        .append_to_history(
            &params.session_id,
            EventKind::QuestionResponse { request_id: params.request_id, answers: params.answers, cancelled: params.cancelled },
            now_ms,
        )
        .await?;
    Ok(serde_json::json!({ "ok": true }))
}
