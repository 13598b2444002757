// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! AutoResumer (§4.8): reacts to process-idle and child-closed events by
//! injecting continuation messages, without any external caller driving it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::{Work, WorkStatus};
use crate::process::{AgentSessionState, ProcessManager, ProcessStateChange, StartParams};
use crate::store::bus::ChangeEvent;
use crate::store::work_store::{WorkPatch, WorkStore};

pub struct AutoResumer {
    work_store: Arc<WorkStore>,
    process_manager: Arc<ProcessManager>,
    retry_counts: RwLock<HashMap<String, u32>>,
    max_retries: u32,
    settle_delay: Duration,
    working_dir: std::path::PathBuf,
    cancel: CancellationToken,
}

impl AutoResumer {
    pub fn spawn(
        work_store: Arc<WorkStore>,
        process_manager: Arc<ProcessManager>,
        max_retries: u32,
        settle_delay: Duration,
        working_dir: std::path::PathBuf,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let resumer = Arc::new(Self {
            work_store,
            process_manager,
            retry_counts: RwLock::new(HashMap::new()),
            max_retries,
            settle_delay,
            working_dir,
            cancel,
        });

        let trigger_a = Arc::clone(&resumer);
        tokio::spawn(async move { trigger_a.run_trigger_a().await });

        let trigger_b = Arc::clone(&resumer);
        tokio::spawn(async move { trigger_b.run_trigger_b_and_reset().await });

        resumer
    }

    /// Trigger A: process-idle settle-delay continuation (§4.8).
    async fn run_trigger_a(self: Arc<Self>) {
        let mut state_rx = self.process_manager.subscribe_state();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                change = state_rx.recv() => {
                    match change {
                        Ok(change) => self.handle_state_change(change),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    fn handle_state_change(self: &Arc<Self>, change: ProcessStateChange) {
        if change.is_initial {
            return;
        }
        if !matches!(change.state, AgentSessionState::RunningIdle { needs_input: false }) {
            return;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = this.cancel.cancelled() => {}
                _ = tokio::time::sleep(this.settle_delay) => {
                    if let Err(err) = this.try_continue(&change.session_id).await {
                        warn!(session_id = %change.session_id, error = %err, "auto-resume trigger A failed");
                    }
                }
            }
        });
    }

    async fn try_continue(&self, session_id: &str) -> Result<(), String> {
        let work = self.find_in_progress_work_for_session(session_id).await;
        let Some(work) = work else { return Ok(()) };

        let mut counts = self.retry_counts.write().await;
        let count = counts.entry(session_id.to_owned()).or_insert(0);
        if *count >= self.max_retries {
            debug!(session_id, work_id = %work.id, "auto-resume retry budget exhausted");
            return Ok(());
        }
        *count += 1;
        let attempt = *count;
        drop(counts);

        let (session, _created) = self
            .process_manager
            .get_or_create_process(
                session_id.to_owned(),
                StartParams {
                    session_id: session_id.to_owned(),
                    working_dir: self.working_dir.clone(),
                    resume: true,
                    mode: crate::model::SessionMode::Default,
                    system_prompt_override: None,
                },
            )
            .await
            .map_err(|e| e.to_string())?;

        session.send_message("Continue.".into()).await.map_err(|e| e.to_string())?;
        debug!(session_id, attempt, "auto-resume continuation sent");
        Ok(())
    }

    async fn find_in_progress_work_for_session(&self, session_id: &str) -> Option<Work> {
        self.work_store
            .list()
            .await
            .into_iter()
            .find(|w| w.status == WorkStatus::InProgress && w.session_id.as_deref() == Some(session_id))
    }

    /// Trigger B (child-closed parent-reactivation) and retry-counter
    /// reset on done/closed, both driven off the Work change bus (§4.8).
    async fn run_trigger_b_and_reset(self: Arc<Self>) {
        let mut work_rx = self.work_store.subscribe();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = work_rx.recv() => {
                    match event {
                        Ok(ChangeEvent::Update { item }) => self.handle_work_update(item),
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    fn handle_work_update(self: &Arc<Self>, item: Work) {
        if matches!(item.status, WorkStatus::Done | WorkStatus::Closed) {
            if let Some(session_id) = item.session_id.clone() {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    this.retry_counts.write().await.remove(&session_id);
                });
            }
        }

        if item.status == WorkStatus::Closed && !item.parent_id.is_empty() {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(err) = this.reactivate_parent(&item).await {
                    warn!(work_id = %item.id, error = %err, "auto-resume trigger B failed");
                }
            });
        }
    }

    async fn reactivate_parent(&self, child: &Work) -> Result<(), String> {
        let parent = self.work_store.get(&child.parent_id).await.map_err(|e| e.to_string())?;
        if parent.status != WorkStatus::Done {
            return Ok(());
        }
        let Some(session_id) = parent.session_id.clone() else { return Ok(()) };

        self.work_store
            .update(&parent.id, WorkPatch { status: Some(WorkStatus::InProgress), claim_session_id: Some(session_id.clone()), ..Default::default() }, now_ms())
            .await
            .map_err(|e| e.to_string())?;
        self.retry_counts.write().await.remove(&session_id);

        let (session, _created) = self
            .process_manager
            .get_or_create_process(
                session_id.clone(),
                StartParams {
                    session_id: session_id.clone(),
                    working_dir: self.working_dir.clone(),
                    resume: true,
                    mode: crate::model::SessionMode::Default,
                    system_prompt_override: None,
                },
            )
            .await
            .map_err(|e| e.to_string())?;

        let message = format!("Child task \"{}\" was closed. Resuming.", child.title);
        session.send_message(message).await.map_err(|e| e.to_string())?;
        debug!(parent_id = %parent.id, child_id = %child.id, "auto-resume trigger B reactivated parent");
        Ok(())
    }
}

fn now_ms() -> u64 {
    crate::store::epoch_ms()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkType;
    use crate::process::agent_session::{AgentAdapter, AgentProcessHandle};
    use crate::store::session_store::SessionStore;
    use std::future::Future;
    use std::pin::Pin;
    use tokio::sync::mpsc;

    struct ImmediateAdapter;

    impl AgentAdapter for ImmediateAdapter {
        fn spawn(&self, _params: StartParams) -> Pin<Box<dyn Future<Output = crate::error::GatewayResult<AgentProcessHandle>> + Send>> {
            let (command_tx, _command_rx) = mpsc::channel(8);
            let (_event_tx, event_rx) = mpsc::channel(8);
            Box::pin(async move { Ok(AgentProcessHandle { command_tx, event_rx, exited: CancellationToken::new() }) })
        }
    }

    #[tokio::test]
    async fn trigger_a_sends_continuation_once_after_settle_delay() {
        let work_store = WorkStore::new();
        let session_store = SessionStore::new();
        let role_store_role_id = "role-1".to_owned();
        let story = work_store.create(WorkType::Story, String::new(), Some(role_store_role_id), "S".into(), String::new(), 0).await.expect("story");
        let task = work_store.create(WorkType::Task, story.id.clone(), None, "T".into(), String::new(), 0).await.expect("task");

        session_store.create(Some("sess-1".into()), "T".into(), 0).await.expect("session");
        work_store
            .update(&task.id, WorkPatch { status: Some(WorkStatus::InProgress), claim_session_id: Some("sess-1".into()), ..Default::default() }, 1)
            .await
            .expect("claim");

        let process_manager = ProcessManager::new(Arc::new(ImmediateAdapter), Arc::clone(&session_store), Duration::from_secs(600), CancellationToken::new());
        // Pre-create the process so AutoResumer's resume=true get_or_create finds it live.
        process_manager
            .get_or_create_process(
                "sess-1".into(),
                StartParams { session_id: "sess-1".into(), working_dir: "/tmp".into(), resume: false, mode: crate::model::SessionMode::Default, system_prompt_override: None },
            )
            .await
            .expect("pre-create");

        let resumer = AutoResumer::spawn(Arc::clone(&work_store), Arc::clone(&process_manager), 3, Duration::from_millis(20), "/tmp".into(), CancellationToken::new());

        resumer.handle_state_change(ProcessStateChange {
            session_id: "sess-1".into(),
            state: AgentSessionState::RunningIdle { needs_input: false },
            needs_input: false,
            is_initial: false,
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let counts = resumer.retry_counts.read().await;
        assert_eq!(counts.get("sess-1").copied(), Some(1));
    }

    #[tokio::test]
    async fn initial_state_change_is_ignored() {
        let work_store = WorkStore::new();
        let session_store = SessionStore::new();
        let process_manager = ProcessManager::new(Arc::new(ImmediateAdapter), session_store, Duration::from_secs(600), CancellationToken::new());
        let resumer = AutoResumer::spawn(work_store, process_manager, 3, Duration::from_millis(20), "/tmp".into(), CancellationToken::new());

        resumer.handle_state_change(ProcessStateChange {
            session_id: "sess-1".into(),
            state: AgentSessionState::RunningIdle { needs_input: false },
            needs_input: false,
            is_initial: true,
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(resumer.retry_counts.read().await.is_empty());
    }
}
