// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

/// Maximum session title length (§3: "≤ implementation limit").
pub const TITLE_MAX_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Default,
    Yolo,
}

impl Default for SessionMode {
    fn default() -> Self {
        Self::Default
    }
}

/// Per-session metadata (§3). Created once per chat session, mutated by
/// `session.update_title` / `session.set_mode`, and marked `activated`
/// the first time a live agent process is created for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub title: String,
    pub activated: bool,
    pub mode: SessionMode,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl SessionMeta {
    pub fn new(id: String, title: String, now_ms: u64) -> GatewayResult<Self> {
        let title = validate_title(title)?;
        Ok(Self { id, title, activated: false, mode: SessionMode::Default, created_at_ms: now_ms, updated_at_ms: now_ms })
    }
}

pub fn validate_title(title: String) -> GatewayResult<String> {
    if title.chars().count() > TITLE_MAX_LEN {
        return Err(GatewayError::validation(format!(
            "title exceeds {TITLE_MAX_LEN} characters"
        )));
    }
    Ok(title)
}

/// A single entry in a session's append-only event history (§3).
///
/// The `seq` field is monotonic *within one session* — it is the
/// ordering key chat subscribers linearize against (§8: "prefix-consistent
/// linearization").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub event: EventKind,
}

/// Tagged union of everything that can land in a session's history.
///
/// Per Design Notes §9, unknown fields on any variant are tolerated and
/// preserved on round-trip by keeping a `extra` bag of untyped fields —
/// older/newer client drafts may carry fields this server doesn't parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Message {
        content: String,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        extra: serde_json::Map<String, serde_json::Value>,
    },
    AgentText {
        text: String,
    },
    ToolCall {
        tool_use_id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        output: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    PermissionRequest {
        request_id: String,
        tool_use_id: String,
        tool_input: serde_json::Value,
        #[serde(default)]
        permission_suggestions: serde_json::Value,
    },
    PermissionResponse {
        request_id: String,
        choice: PermissionChoice,
    },
    QuestionRequest {
        request_id: String,
        tool_use_id: String,
        question: serde_json::Value,
    },
    QuestionResponse {
        request_id: String,
        #[serde(default)]
        answers: Option<serde_json::Value>,
        #[serde(default)]
        cancelled: bool,
    },
    Done,
    Error {
        message: String,
    },
    SessionIdAnnounce {
        session_id: String,
    },
    ProcessEnded {
        #[serde(default)]
        exit_reason: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionChoice {
    Deny,
    Allow,
    AlwaysAllow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_over_limit_rejected() {
        let long = "x".repeat(TITLE_MAX_LEN + 1);
        assert!(SessionMeta::new("s1".into(), long, 0).is_err());
    }

    #[test]
    fn title_at_limit_accepted() {
        let ok = "x".repeat(TITLE_MAX_LEN);
        assert!(SessionMeta::new("s1".into(), ok, 0).is_ok());
    }

    #[test]
    fn new_session_is_not_activated() {
        let s = SessionMeta::new("s1".into(), "hello".into(), 0).expect("valid title");
        assert!(!s.activated);
        assert_eq!(s.mode, SessionMode::Default);
    }

    #[test]
    fn event_record_round_trips_unknown_fields() {
        let raw = serde_json::json!({
            "seq": 1,
            "timestamp_ms": 5,
            "type": "message",
            "content": "hi",
            "message_id": "legacy-field-from-an-older-client"
        });
        let rec: EventRecord = serde_json::from_value(raw).expect("deserializes");
        let EventKind::Message { ref extra, .. } = rec.event else {
            panic!("expected message variant");
        };
        assert_eq!(
            extra.get("message_id").and_then(|v| v.as_str()),
            Some("legacy-field-from-an-older-client")
        );
    }
}
