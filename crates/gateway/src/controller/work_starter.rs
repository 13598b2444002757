// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WorkStarter (§4.7): atomically claims a work item, provisions a fresh
//! session, and launches the agent process with a kickoff message —
//! rolling the claim back on any failure along the way.

use std::sync::Arc;

use tracing::warn;

use crate::error::{GatewayError, GatewayResult};
use crate::ids::new_id;
use crate::model::{Work, WorkStatus};
use crate::process::{AgentSessionState, ProcessManager, StartParams};
use crate::store::role_store::RoleStore;
use crate::store::session_store::SessionStore;
use crate::store::work_store::{WorkPatch, WorkStore};

pub struct WorkStarter {
    work_store: Arc<WorkStore>,
    session_store: Arc<SessionStore>,
    role_store: Arc<RoleStore>,
    process_manager: Arc<ProcessManager>,
    working_dir: std::path::PathBuf,
}

impl WorkStarter {
    pub fn new(
        work_store: Arc<WorkStore>,
        session_store: Arc<SessionStore>,
        role_store: Arc<RoleStore>,
        process_manager: Arc<ProcessManager>,
        working_dir: std::path::PathBuf,
    ) -> Self {
        Self { work_store, session_store, role_store, process_manager, working_dir }
    }

    /// Run the work-start protocol (§4.7). On success, the returned `Work`
    /// has `status=in_progress` and a freshly assigned `session_id`.
    pub async fn start(&self, work_id: &str, now_ms: u64) -> GatewayResult<Work> {
        let new_session_id = new_id();

        // Step 1-2: the claim. The store rejects the transition outright
        // if another caller already claimed this item (only one update
        // per id is admitted at a time), so "claim won" and "update
        // succeeded" are the same event here.
        let claimed = self
            .work_store
            .update(
                work_id,
                WorkPatch { status: Some(WorkStatus::InProgress), claim_session_id: Some(new_session_id.clone()), ..Default::default() },
                now_ms,
            )
            .await?;

        match self.provision_and_launch(&claimed, &new_session_id, now_ms).await {
            Ok(()) => Ok(claimed),
            Err(err) => {
                self.rollback(work_id, now_ms, err).await
            }
        }
    }

    async fn provision_and_launch(&self, work: &Work, session_id: &str, now_ms: u64) -> GatewayResult<()> {
        // Step 3: re-read denormalized fields (role prompt, parent title).
        let role = self.role_store.get(&work.agent_role_id).await?;
        let parent_title = if work.parent_id.is_empty() {
            None
        } else {
            self.work_store.get(&work.parent_id).await.ok().map(|p| p.title)
        };

        // Step 5: create the Session.
        self.session_store.create(Some(session_id.to_owned()), work.title.clone(), now_ms).await?;

        // Step 6: build the kickoff message and launch.
        let kickoff = build_kickoff_message(work, parent_title.as_deref(), &role.prompt);
        let launch_result = self
            .process_manager
            .get_or_create_process(
                session_id.to_owned(),
                StartParams {
                    session_id: session_id.to_owned(),
                    working_dir: self.working_dir.clone(),
                    resume: false,
                    mode: work_mode_hint(),
                    system_prompt_override: None,
                },
            )
            .await
            .and_then(|(session, _created)| {
                if session.state() == AgentSessionState::Stopped {
                    return Err(GatewayError::internal("send kickoff message: process exited before start"));
                }
                Ok(session)
            });

        let session = match launch_result {
            Ok(session) => session,
            Err(err) => {
                let _ = self.session_store.delete(session_id).await;
                return Err(GatewayError::internal(format!("send kickoff message: {err}")));
            }
        };

        if let Err(err) = session.send_message(kickoff).await {
            let _ = self.session_store.delete(session_id).await;
            return Err(GatewayError::internal(format!("send kickoff message: {err}")));
        }

        Ok(())
    }

    /// Undo the claim on failure (§4.7 step 4). If the rollback update
    /// itself fails, the original error is annotated so operators know
    /// the item may be stuck `in_progress`.
    async fn rollback(&self, work_id: &str, now_ms: u64, original: GatewayError) -> GatewayResult<Work> {
        let rollback_result = self
            .work_store
            .update(work_id, WorkPatch { status: Some(WorkStatus::Open), ..Default::default() }, now_ms)
            .await;

        if let Err(rollback_err) = rollback_result {
            warn!(work_id, error = %rollback_err, "work.start rollback failed, item may be stuck in_progress");
            return Err(GatewayError::internal(format!("{original} (rollback also failed, may be stuck in_progress: {rollback_err})")));
        }
        Err(original)
    }
}

/// Deterministic kickoff message: work title/body, optional parent
/// context, and the agent role's prompt substring (§4.7, §8 scenario 3).
fn build_kickoff_message(work: &Work, parent_title: Option<&str>, role_prompt: &str) -> String {
    let mut message = String::new();
    message.push_str(role_prompt);
    message.push_str("\n\n");
    if let Some(parent_title) = parent_title {
        message.push_str(&format!("Parent: {parent_title}\n"));
    }
    message.push_str(&format!("Title: {}\n", work.title));
    if !work.body.is_empty() {
        message.push_str(&format!("\n{}\n", work.body));
    }
    message
}

fn work_mode_hint() -> crate::model::SessionMode {
    crate::model::SessionMode::Default
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkType;
    use crate::process::agent_session::{AgentAdapter, AgentProcessHandle};
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct ScriptedAdapter {
        fail: bool,
    }

    impl AgentAdapter for ScriptedAdapter {
        fn spawn(&self, _params: StartParams) -> Pin<Box<dyn Future<Output = GatewayResult<AgentProcessHandle>> + Send>> {
            if self.fail {
                return Box::pin(async { Err(GatewayError::internal("adapter configured to fail")) });
            }
            let (command_tx, _command_rx) = mpsc::channel(8);
            let (_event_tx, event_rx) = mpsc::channel(8);
            Box::pin(async move { Ok(AgentProcessHandle { command_tx, event_rx, exited: CancellationToken::new() }) })
        }
    }

    struct Fixture {
        work_store: Arc<WorkStore>,
        role_store: Arc<RoleStore>,
        task: Work,
    }

    async fn setup(fail: bool) -> (WorkStarter, Fixture) {
        let work_store = WorkStore::new();
        let session_store = SessionStore::new();
        let role_store = RoleStore::new();
        let role = role_store.create("reviewer".into(), "You are a careful reviewer.".into(), 0).await;
        let story = work_store
            .create(WorkType::Story, String::new(), Some(role.id.clone()), "S".into(), String::new(), 0)
            .await
            .expect("create story");
        let task = work_store
            .create(WorkType::Task, story.id.clone(), None, "T".into(), "do the thing".into(), 0)
            .await
            .expect("create task");

        let adapter = Arc::new(ScriptedAdapter { fail });
        let process_manager = ProcessManager::new(adapter, Arc::clone(&session_store), Duration::from_secs(600), CancellationToken::new());
        let starter = WorkStarter::new(Arc::clone(&work_store), session_store, Arc::clone(&role_store), process_manager, "/tmp".into());
        (starter, Fixture { work_store, role_store, task })
    }

    #[tokio::test]
    async fn happy_path_claims_and_launches() {
        let (starter, fx) = setup(false).await;
        let started = starter.start(&fx.task.id, 1).await.expect("start");
        assert_eq!(started.status, WorkStatus::InProgress);
        assert!(started.session_id.is_some());

        let reread = fx.work_store.get(&fx.task.id).await.expect("get");
        assert_eq!(reread.status, WorkStatus::InProgress);
    }

    #[tokio::test]
    async fn launch_failure_rolls_back_claim() {
        let (starter, fx) = setup(true).await;
        let err = starter.start(&fx.task.id, 1).await.expect_err("should fail");
        assert!(err.message().contains("send kickoff message"));

        let reread = fx.work_store.get(&fx.task.id).await.expect("get");
        assert_eq!(reread.status, WorkStatus::Open);
        assert!(reread.session_id.is_none());
    }

    #[tokio::test]
    async fn retry_after_fault_cleared_succeeds() {
        let (starter, fx) = setup(true).await;
        assert!(starter.start(&fx.task.id, 1).await.is_err());

        // Swap in a working adapter and retry, matching §8 scenario 4's
        // "a retry after clearing the fault succeeds". The work/role
        // stores are untouched by the failed attempt, so only the
        // process manager's adapter needs to change.
        let adapter = Arc::new(ScriptedAdapter { fail: false });
        let process_manager = ProcessManager::new(adapter, SessionStore::new(), Duration::from_secs(600), CancellationToken::new());
        let retried = WorkStarter::new(Arc::clone(&fx.work_store), SessionStore::new(), Arc::clone(&fx.role_store), process_manager, "/tmp".into());

        let started = retried.start(&fx.task.id, 2).await.expect("retry succeeds");
        assert_eq!(started.status, WorkStatus::InProgress);
    }
}
