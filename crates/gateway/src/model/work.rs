// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkType {
    Story,
    Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Open,
    InProgress,
    Done,
    Closed,
}

/// A unit of intent: a top-level story, or a task nested under one (§3, GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Work {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: WorkType,
    /// Empty for top-level stories; the parent story's id for tasks.
    pub parent_id: String,
    /// Required for stories; inherited by tasks from their parent on create.
    pub agent_role_id: String,
    pub title: String,
    pub body: String,
    pub status: WorkStatus,
    /// Set iff `status == InProgress` (§3 invariant).
    pub session_id: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl Work {
    /// Validate the static shape invariants of §3: a task must reference a
    /// story parent; a story must be top-level.
    pub fn validate_parentage(
        kind: WorkType,
        parent_id: &str,
        parent: Option<&Work>,
    ) -> GatewayResult<()> {
        match kind {
            WorkType::Task => {
                if parent_id.is_empty() {
                    return Err(GatewayError::validation("task requires a parent story id"));
                }
                let parent =
                    parent.ok_or_else(|| GatewayError::not_found("parent work item"))?;
                if parent.kind != WorkType::Story {
                    return Err(GatewayError::validation("task parent must be a story"));
                }
            }
            WorkType::Story => {
                if !parent_id.is_empty() {
                    return Err(GatewayError::validation("story must be top-level"));
                }
            }
        }
        Ok(())
    }

    /// Validate an external status transition request, returning the
    /// `session_id` mutation it implies. `done -> closed` is excluded here:
    /// it is an internal-only transition driven by auto-close (§4.7).
    pub fn validate_transition(
        from: WorkStatus,
        to: WorkStatus,
    ) -> GatewayResult<SessionIdEffect> {
        use WorkStatus::*;
        match (from, to) {
            (Open, InProgress) => Ok(SessionIdEffect::MustSet),
            (InProgress, Open) => Ok(SessionIdEffect::MustClear),
            (InProgress, Done) => Ok(SessionIdEffect::Unchanged),
            (Done, InProgress) => Ok(SessionIdEffect::MustSet),
            (same_from, same_to) if same_from == same_to => Ok(SessionIdEffect::Unchanged),
            (Done, Closed) => Err(GatewayError::invalid_transition(
                "done -> closed is an internal-only transition (auto-close)",
            )),
            (from, to) => Err(GatewayError::invalid_transition(format!(
                "{from:?} -> {to:?} is not a legal external transition"
            ))),
        }
    }

    /// Whether this work item should auto-close given its children's
    /// statuses (§4.7). A leaf item (no children, e.g. a task) satisfies
    /// "every child is closed" vacuously and auto-closes as soon as it is
    /// `done`; a story only auto-closes once every task under it has
    /// itself reached `closed`.
    pub fn should_auto_close(status: WorkStatus, children: &[Work]) -> bool {
        status == WorkStatus::Done && children.iter().all(|c| c.status == WorkStatus::Closed)
    }
}

/// What a status transition implies for `session_id`, enforced atomically
/// alongside the status write (§3 invariant: "session id set/clear must
/// occur in the same atomic update as the status transition").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionIdEffect {
    MustSet,
    MustClear,
    Unchanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn work(kind: WorkType, parent_id: &str, status: WorkStatus) -> Work {
        Work {
            id: "w1".into(),
            kind,
            parent_id: parent_id.into(),
            agent_role_id: "r1".into(),
            title: "t".into(),
            body: String::new(),
            status,
            session_id: None,
            created_at_ms: 0,
            updated_at_ms: 0,
        }
    }

    #[test]
    fn task_requires_story_parent() {
        let story = work(WorkType::Story, "", WorkStatus::Open);
        assert!(Work::validate_parentage(WorkType::Task, "w1", Some(&story)).is_ok());

        let task_as_parent = work(WorkType::Task, "x", WorkStatus::Open);
        assert!(Work::validate_parentage(WorkType::Task, "w1", Some(&task_as_parent)).is_err());

        assert!(Work::validate_parentage(WorkType::Task, "", None).is_err());
    }

    #[test]
    fn story_must_be_top_level() {
        assert!(Work::validate_parentage(WorkType::Story, "", None).is_ok());
        assert!(Work::validate_parentage(WorkType::Story, "parent", None).is_err());
    }

    #[test]
    fn open_to_done_directly_is_illegal() {
        assert!(Work::validate_transition(WorkStatus::Open, WorkStatus::Done).is_err());
    }

    #[test]
    fn done_to_closed_is_internal_only() {
        assert!(Work::validate_transition(WorkStatus::Done, WorkStatus::Closed).is_err());
    }

    #[test]
    fn in_progress_to_open_clears_session() {
        assert_eq!(
            Work::validate_transition(WorkStatus::InProgress, WorkStatus::Open).expect("legal"),
            SessionIdEffect::MustClear
        );
    }

    #[test]
    fn auto_close_requires_all_children_closed() {
        let mut child = work(WorkType::Task, "w1", WorkStatus::Closed);
        assert!(Work::should_auto_close(WorkStatus::Done, std::slice::from_ref(&child)));
        child.status = WorkStatus::Open;
        assert!(!Work::should_auto_close(WorkStatus::Done, std::slice::from_ref(&child)));
    }

    #[test]
    fn leaf_item_auto_closes_vacuously() {
        // A task has no children of its own; "every child is closed" is
        // vacuously true, so it auto-closes as soon as it is done.
        assert!(Work::should_auto_close(WorkStatus::Done, &[]));
    }
}
