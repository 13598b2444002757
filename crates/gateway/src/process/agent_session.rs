// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! AgentSession (§4.2): wraps one external agent sub-process, exposing a
//! command channel, a finite non-restartable event stream, and an
//! observable state machine. The wire format spoken to the sub-process
//! itself is out of this gateway's scope (§1) — an [`AgentAdapter`]
//! is the external collaborator that actually launches it and hands back
//! a pair of channels already speaking [`AgentEvent`]/[`AgentCommand`].

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, GatewayResult};
use crate::model::session::PermissionChoice;

/// Parameters the caller (ProcessManager + WorkStarter) supplies when
/// starting or resuming a sub-process (§4.2).
#[derive(Debug, Clone)]
pub struct StartParams {
    pub session_id: String,
    pub working_dir: std::path::PathBuf,
    pub resume: bool,
    pub mode: crate::model::SessionMode,
    pub system_prompt_override: Option<String>,
}

/// One command accepted on an AgentSession's outbound channel.
#[derive(Debug, Clone)]
pub enum AgentCommand {
    Message { content: String },
    Interrupt,
    PermissionResponse { request_id: String, choice: PermissionChoice },
    QuestionResponse { request_id: String, answers: Option<serde_json::Value>, cancelled: bool },
}

/// One event emitted upward by the sub-process (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    SessionIdAnnounce { session_id: String },
    Text { text: String },
    ToolCall { tool_use_id: String, name: String, input: serde_json::Value },
    ToolResult { tool_use_id: String, output: serde_json::Value, #[serde(default)] is_error: bool },
    PermissionRequest { request_id: String, tool_use_id: String, tool_input: serde_json::Value, #[serde(default)] permission_suggestions: serde_json::Value },
    QuestionRequest { request_id: String, tool_use_id: String, question: serde_json::Value },
    Done,
    Error { message: String },
}

/// Channels an [`AgentAdapter`] hands back once the sub-process is up.
pub struct AgentProcessHandle {
    pub command_tx: mpsc::Sender<AgentCommand>,
    pub event_rx: mpsc::Receiver<AgentEvent>,
    /// Resolved when the sub-process exits, for any reason.
    pub exited: CancellationToken,
}

pub type SpawnFuture = Pin<Box<dyn Future<Output = GatewayResult<AgentProcessHandle>> + Send>>;

/// External collaborator that actually launches the agent sub-process.
/// The gateway only depends on this trait; a concrete adapter (shelling
/// out via `GatewayConfig::agent_launch`) lives outside this module's
/// test concerns, and tests substitute a fake.
pub trait AgentAdapter: Send + Sync {
    fn spawn(&self, params: StartParams) -> SpawnFuture;
}

/// Observable lifecycle state (§4.2). `needs_input` is carried as a
/// sub-flag of `RunningIdle` rather than a separate variant, matching
/// the spec's "carried on the state-change notification" framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AgentSessionState {
    Starting,
    RunningBusy,
    RunningIdle { needs_input: bool },
    Stopped,
}

impl AgentSessionState {
    pub fn is_idle_no_input(&self) -> bool {
        matches!(self, Self::RunningIdle { needs_input: false })
    }
}

/// How many buffered events the production task may hold before
/// treating a stalled consumer as a fatal session error (§4.2: "the
/// slowest pending event is buffered up to an implementation limit").
const EVENT_BUFFER_LIMIT: usize = 256;

/// One live (or recently-live) agent sub-process wrapper.
pub struct AgentSession {
    command_tx: mpsc::Sender<AgentCommand>,
    events_rx: Mutex<Option<mpsc::Receiver<AgentEvent>>>,
    state_tx: watch::Sender<AgentSessionState>,
    state_rx: watch::Receiver<AgentSessionState>,
    pending_requests: Mutex<HashSet<String>>,
    cancel: CancellationToken,
    closed: std::sync::atomic::AtomicBool,
}

impl AgentSession {
    /// Start a fresh sub-process via `adapter` and wrap it. Exposed via
    /// [`crate::process::manager::ProcessManager::get_or_create_process`]
    /// only — callers must not construct this directly (§3 ownership:
    /// "ProcessManager exclusively owns each AgentSession").
    pub async fn start(adapter: &dyn AgentAdapter, params: StartParams) -> GatewayResult<Arc<Self>> {
        let handle = adapter.spawn(params).await?;
        let (state_tx, state_rx) = watch::channel(AgentSessionState::Starting);
        let cancel = CancellationToken::new();

        let session = Arc::new(Self {
            command_tx: handle.command_tx,
            events_rx: Mutex::new(None),
            state_tx,
            state_rx,
            pending_requests: Mutex::new(HashSet::new()),
            cancel,
            closed: std::sync::atomic::AtomicBool::new(false),
        });

        // Re-buffer the adapter's event stream into one that tracks
        // state transitions as a side effect of each event, and
        // enforces the buffered-slack limit.
        let (buffered_tx, buffered_rx) = mpsc::channel(EVENT_BUFFER_LIMIT);
        *session.events_rx.lock().await = Some(buffered_rx);

        let state_tx_task = session.state_tx.clone();
        let exited = handle.exited;
        tokio::spawn(async move {
            let mut event_rx = handle.event_rx;
            loop {
                tokio::select! {
                    biased;
                    _ = exited.cancelled() => break,
                    event = event_rx.recv() => {
                        let Some(event) = event else { break };
                        update_state_for_event(&state_tx_task, &event);
                        if buffered_tx.try_send(event).is_err() {
                            // Consumer fell behind the implementation limit: the
                            // session is considered errored and torn down.
                            let _ = state_tx_task.send(AgentSessionState::Stopped);
                            break;
                        }
                    }
                }
            }
            let _ = state_tx_task.send(AgentSessionState::Stopped);
        });

        Ok(session)
    }

    pub fn state(&self) -> AgentSessionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<AgentSessionState> {
        self.state_rx.clone()
    }

    fn is_stopped(&self) -> bool {
        matches!(self.state(), AgentSessionState::Stopped)
    }

    pub async fn send_message(&self, content: String) -> GatewayResult<()> {
        if self.is_stopped() {
            return Err(GatewayError::invalid_transition("session process has exited"));
        }
        self.command_tx
            .send(AgentCommand::Message { content })
            .await
            .map_err(|_| GatewayError::invalid_transition("session process has exited"))
    }

    pub async fn send_interrupt(&self) -> GatewayResult<()> {
        if self.is_stopped() {
            return Err(GatewayError::invalid_transition("session process has exited"));
        }
        self.command_tx
            .send(AgentCommand::Interrupt)
            .await
            .map_err(|_| GatewayError::invalid_transition("session process has exited"))
    }

    /// Record an outstanding permission/question request id so the
    /// matching response can be validated (§4.2: duplicate responses
    /// fail with "no pending request").
    pub async fn track_pending_request(&self, request_id: String) {
        self.pending_requests.lock().await.insert(request_id);
    }

    pub async fn send_permission_response(&self, request_id: String, choice: PermissionChoice) -> GatewayResult<()> {
        self.take_pending(&request_id).await?;
        self.command_tx
            .send(AgentCommand::PermissionResponse { request_id, choice })
            .await
            .map_err(|_| GatewayError::invalid_transition("session process has exited"))
    }

    pub async fn send_question_response(&self, request_id: String, answers: Option<serde_json::Value>, cancelled: bool) -> GatewayResult<()> {
        self.take_pending(&request_id).await?;
        self.command_tx
            .send(AgentCommand::QuestionResponse { request_id, answers, cancelled })
            .await
            .map_err(|_| GatewayError::invalid_transition("session process has exited"))
    }

    async fn take_pending(&self, request_id: &str) -> GatewayResult<()> {
        let mut pending = self.pending_requests.lock().await;
        if !pending.remove(request_id) {
            return Err(GatewayError::invalid_transition("no pending request"));
        }
        Ok(())
    }

    /// Take the event stream. Lazy, finite, non-restartable (§4.2): a
    /// second call after the first returns `None`.
    pub async fn events(&self) -> Option<mpsc::Receiver<AgentEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Idempotent, synchronous-from-the-caller's-view shutdown (§4.2).
    pub async fn close(&self) {
        if self.closed.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let _ = self.state_tx.send(AgentSessionState::Stopped);
        *self.events_rx.lock().await = None;
    }
}

fn update_state_for_event(state_tx: &watch::Sender<AgentSessionState>, event: &AgentEvent) {
    let next = match event {
        AgentEvent::Done => AgentSessionState::RunningIdle { needs_input: false },
        AgentEvent::PermissionRequest { .. } | AgentEvent::QuestionRequest { .. } => {
            AgentSessionState::RunningIdle { needs_input: true }
        }
        AgentEvent::Error { .. } => AgentSessionState::Stopped,
        AgentEvent::SessionIdAnnounce { .. }
        | AgentEvent::Text { .. }
        | AgentEvent::ToolCall { .. }
        | AgentEvent::ToolResult { .. } => AgentSessionState::RunningBusy,
    };
    state_tx.send_replace(next);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeAdapter {
        command_tx: std::sync::Mutex<Option<mpsc::Sender<AgentCommand>>>,
        event_rx: std::sync::Mutex<Option<mpsc::Receiver<AgentEvent>>>,
        exited: CancellationToken,
    }

    impl AgentAdapter for FakeAdapter {
        fn spawn(&self, _params: StartParams) -> SpawnFuture {
            let command_tx = self.command_tx.lock().expect("lock").take().expect("spawn called once");
            let event_rx = self.event_rx.lock().expect("lock").take().expect("spawn called once");
            let exited = self.exited.clone();
            Box::pin(async move { Ok(AgentProcessHandle { command_tx, event_rx, exited }) })
        }
    }

    fn start_params() -> StartParams {
        StartParams {
            session_id: "s1".into(),
            working_dir: "/tmp".into(),
            resume: false,
            mode: crate::model::SessionMode::Default,
            system_prompt_override: None,
        }
    }

    #[tokio::test]
    async fn done_event_transitions_to_idle_no_input() {
        let (cmd_tx, _cmd_rx) = mpsc::channel(8);
        let (evt_tx, evt_rx) = mpsc::channel(8);
        let adapter = FakeAdapter { command_tx: std::sync::Mutex::new(Some(cmd_tx)), event_rx: std::sync::Mutex::new(Some(evt_rx)), exited: CancellationToken::new() };

        let session = AgentSession::start(&adapter, start_params()).await.expect("start");
        let mut events = session.events().await.expect("events taken once");

        evt_tx.send(AgentEvent::Done).await.expect("send");
        let received = events.recv().await.expect("event");
        assert!(matches!(received, AgentEvent::Done));

        // state update happens before the buffered send; poll briefly.
        for _ in 0..20 {
            if session.state().is_idle_no_input() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(session.state().is_idle_no_input());
    }

    #[tokio::test]
    async fn events_can_only_be_taken_once() {
        let (cmd_tx, _cmd_rx) = mpsc::channel(8);
        let (_evt_tx, evt_rx) = mpsc::channel(8);
        let adapter = FakeAdapter { command_tx: std::sync::Mutex::new(Some(cmd_tx)), event_rx: std::sync::Mutex::new(Some(evt_rx)), exited: CancellationToken::new() };

        let session = AgentSession::start(&adapter, start_params()).await.expect("start");
        assert!(session.events().await.is_some());
        assert!(session.events().await.is_none());
    }

    #[tokio::test]
    async fn duplicate_permission_response_fails() {
        let (cmd_tx, _cmd_rx) = mpsc::channel(8);
        let (_evt_tx, evt_rx) = mpsc::channel(8);
        let adapter = FakeAdapter { command_tx: std::sync::Mutex::new(Some(cmd_tx)), event_rx: std::sync::Mutex::new(Some(evt_rx)), exited: CancellationToken::new() };

        let session = AgentSession::start(&adapter, start_params()).await.expect("start");
        session.track_pending_request("req-dup".into()).await;

        session.send_permission_response("req-dup".into(), PermissionChoice::Allow).await.expect("first response succeeds");
        let second = session.send_permission_response("req-dup".into(), PermissionChoice::Allow).await;
        assert!(second.is_err());
        assert!(second.unwrap_err().message().contains("no pending request"));
    }

    #[tokio::test]
    async fn send_message_fails_after_close() {
        let (cmd_tx, _cmd_rx) = mpsc::channel(8);
        let (_evt_tx, evt_rx) = mpsc::channel(8);
        let adapter = FakeAdapter { command_tx: std::sync::Mutex::new(Some(cmd_tx)), event_rx: std::sync::Mutex::new(Some(evt_rx)), exited: CancellationToken::new() };

        let session = AgentSession::start(&adapter, start_params()).await.expect("start");
        session.close().await;
        session.close().await; // idempotent
        assert!(session.send_message("hi".into()).await.is_err());
    }
}
