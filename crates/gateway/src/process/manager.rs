// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ProcessManager (§4.3): the one-of-a-kind `session-id -> AgentSession`
//! map for one Worktree, idle-TTL eviction, and the state-change bus
//! ChatMessagesWatcher and AutoResumer subscribe to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::GatewayResult;
use crate::model::session::EventKind;
use crate::process::agent_session::{AgentAdapter, AgentEvent, AgentSession, AgentSessionState, StartParams};
use crate::store::session_store::SessionStore;

/// One state-change notification published by the manager (§4.3).
#[derive(Debug, Clone)]
pub struct ProcessStateChange {
    pub session_id: String,
    pub state: AgentSessionState,
    pub needs_input: bool,
    /// Set for the first transition observed after a session is tracked,
    /// which may not reflect a real agent-driven idle. Subscribers (the
    /// AutoResumer) must ignore it to avoid a false continuation send.
    pub is_initial: bool,
}

/// Owns the mapping `session-id -> AgentSession` for one Worktree (§4.3).
/// Always held behind an `Arc`, since its supervisor tasks need to
/// outlive the call that spawned them.
pub struct ProcessManager {
    adapter: Arc<dyn AgentAdapter>,
    session_store: Arc<SessionStore>,
    sessions: RwLock<HashMap<String, Arc<AgentSession>>>,
    /// Per-session-id mutex so two racing `GetOrCreateProcess` calls for
    /// the same id produce one sub-process, never two (§4.3).
    creation_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    state_tx: broadcast::Sender<ProcessStateChange>,
    idle_timeout: Duration,
    cancel: CancellationToken,
}

impl ProcessManager {
    pub fn new(adapter: Arc<dyn AgentAdapter>, session_store: Arc<SessionStore>, idle_timeout: Duration, cancel: CancellationToken) -> Arc<Self> {
        let (state_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            adapter,
            session_store,
            sessions: RwLock::new(HashMap::new()),
            creation_locks: Mutex::new(HashMap::new()),
            state_tx,
            idle_timeout,
            cancel,
        })
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<ProcessStateChange> {
        self.state_tx.subscribe()
    }

    pub async fn has_process(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Look up a live process without starting one. Used by command
    /// handlers (interrupt, permission/question response) that must not
    /// spawn a fresh process just because none is running (§4.6).
    pub async fn get_process(&self, session_id: &str) -> Option<Arc<AgentSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    async fn key_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.creation_locks.lock().await;
        Arc::clone(locks.entry(session_id.to_owned()).or_insert_with(|| Arc::new(Mutex::new(()))))
    }

    /// Idempotent get-or-create (§4.3, §8 round-trip property): if a live
    /// process exists for `session_id`, return it with `created=false`.
    /// Otherwise start one under the per-key mutex and return
    /// `created=true`. `resume` is the caller's choice (WorkStarter /
    /// chat.message handler), based on `SessionMeta::activated`.
    pub async fn get_or_create_process(self: &Arc<Self>, session_id: String, params: StartParams) -> GatewayResult<(Arc<AgentSession>, bool)> {
        if let Some(existing) = self.sessions.read().await.get(&session_id) {
            return Ok((Arc::clone(existing), false));
        }

        let key_lock = self.key_lock(&session_id).await;
        let _guard = key_lock.lock().await;

        // Re-check after acquiring the per-key lock: another racer may
        // have already won and inserted while we waited.
        if let Some(existing) = self.sessions.read().await.get(&session_id) {
            return Ok((Arc::clone(existing), false));
        }

        let session = AgentSession::start(self.adapter.as_ref(), params).await?;
        self.sessions.write().await.insert(session_id.clone(), Arc::clone(&session));
        info!(session_id = %session_id, "agent sub-process started");

        self.spawn_event_forwarder(session_id.clone(), Arc::clone(&session));
        self.spawn_state_supervisor(session_id, Arc::clone(&session));

        Ok((session, true))
    }

    /// Drain the session's event stream, append each event to the
    /// session's history, and append `process-ended` on exit (§4.2:
    /// "The server appends every emitted event to the session's history").
    fn spawn_event_forwarder(self: &Arc<Self>, session_id: String, session: Arc<AgentSession>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let Some(mut events) = session.events().await else { return };
            loop {
                tokio::select! {
                    _ = manager.cancel.cancelled() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        // A permission/question request becomes the one pending
                        // request its matching response is validated against
                        // (§4.2), so it must be tracked before the client can
                        // possibly see it and reply.
                        match &event {
                            AgentEvent::PermissionRequest { request_id, .. } | AgentEvent::QuestionRequest { request_id, .. } => {
                                session.track_pending_request(request_id.clone()).await;
                            }
                            _ => {}
                        }
                        let now_ms = crate::store::epoch_ms();
                        let kind = translate_event(event);
                        if let Err(err) = manager.session_store.append_to_history(&session_id, kind, now_ms).await {
                            warn!(session_id = %session_id, error = %err, "failed to append agent event to history");
                        }
                    }
                }
            }
            let now_ms = crate::store::epoch_ms();
            let _ = manager.session_store.append_to_history(&session_id, EventKind::ProcessEnded { exit_reason: None }, now_ms).await;
        });
    }

    /// Republish the session's state transitions onto the manager's bus,
    /// and evict the session from the map once it stops or sits idle past
    /// the TTL (§4.3).
    fn spawn_state_supervisor(self: &Arc<Self>, session_id: String, session: Arc<AgentSession>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut state_rx = session.subscribe_state();
            let mut is_initial = true;

            loop {
                let current = *state_rx.borrow();
                let needs_input = matches!(current, AgentSessionState::RunningIdle { needs_input: true });
                let _ = manager.state_tx.send(ProcessStateChange { session_id: session_id.clone(), state: current, needs_input, is_initial });
                is_initial = false;

                if matches!(current, AgentSessionState::Stopped) {
                    manager.sessions.write().await.remove(&session_id);
                    debug!(session_id = %session_id, "process stopped, evicted from manager");
                    break;
                }

                let idle_eviction = async {
                    if current.is_idle_no_input() {
                        tokio::time::sleep(manager.idle_timeout).await;
                        true
                    } else {
                        std::future::pending::<bool>().await
                    }
                };

                tokio::select! {
                    _ = manager.cancel.cancelled() => break,
                    _ = idle_eviction => {
                        info!(session_id = %session_id, "idle TTL elapsed, evicting process");
                        session.close().await;
                        manager.sessions.write().await.remove(&session_id);
                        let _ = manager.state_tx.send(ProcessStateChange { session_id: session_id.clone(), state: AgentSessionState::Stopped, needs_input: false, is_initial: false });
                        break;
                    }
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Close every live process and release resources (§4.3).
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let sessions: Vec<Arc<AgentSession>> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close().await;
        }
    }
}

fn translate_event(event: AgentEvent) -> EventKind {
    match event {
        AgentEvent::SessionIdAnnounce { session_id } => EventKind::SessionIdAnnounce { session_id },
        AgentEvent::Text { text } => EventKind::AgentText { text },
        AgentEvent::ToolCall { tool_use_id, name, input } => EventKind::ToolCall { tool_use_id, name, input },
        AgentEvent::ToolResult { tool_use_id, output, is_error } => EventKind::ToolResult { tool_use_id, output, is_error },
        AgentEvent::PermissionRequest { request_id, tool_use_id, tool_input, permission_suggestions } => {
            EventKind::PermissionRequest { request_id, tool_use_id, tool_input, permission_suggestions }
        }
        AgentEvent::QuestionRequest { request_id, tool_use_id, question } => EventKind::QuestionRequest { request_id, tool_use_id, question },
        AgentEvent::Done => EventKind::Done,
        AgentEvent::Error { message } => EventKind::Error { message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::agent_session::AgentProcessHandle;
    use std::future::Future;
    use std::pin::Pin;
    use tokio::sync::mpsc;

    struct ImmediateAdapter;

    impl AgentAdapter for ImmediateAdapter {
        fn spawn(&self, _params: StartParams) -> Pin<Box<dyn Future<Output = GatewayResult<AgentProcessHandle>> + Send>> {
            let (command_tx, _command_rx) = mpsc::channel(8);
            let (_event_tx, event_rx) = mpsc::channel(8);
            Box::pin(async move { Ok(AgentProcessHandle { command_tx, event_rx, exited: CancellationToken::new() }) })
        }
    }

    fn start_params(session_id: &str) -> StartParams {
        StartParams {
            session_id: session_id.into(),
            working_dir: "/tmp".into(),
            resume: false,
            mode: crate::model::SessionMode::Default,
            system_prompt_override: None,
        }
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = SessionStore::new();
        store.create(Some("s1".into()), "t".into(), 0).await.expect("create session");
        let manager = ProcessManager::new(Arc::new(ImmediateAdapter), store, Duration::from_secs(600), CancellationToken::new());

        let (first, created_first) = manager.get_or_create_process("s1".into(), start_params("s1")).await.expect("first");
        assert!(created_first);

        let (second, created_second) = manager.get_or_create_process("s1".into(), start_params("s1")).await.expect("second");
        assert!(!created_second);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn has_process_reflects_membership() {
        let store = SessionStore::new();
        store.create(Some("s1".into()), "t".into(), 0).await.expect("create session");
        let manager = ProcessManager::new(Arc::new(ImmediateAdapter), store, Duration::from_secs(600), CancellationToken::new());

        assert!(!manager.has_process("s1").await);
        manager.get_or_create_process("s1".into(), start_params("s1")).await.expect("create");
        assert!(manager.has_process("s1").await);
    }
}
