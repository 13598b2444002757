// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// An agent role: a named system-prompt template stories are created
/// against (§3, §4.7 kickoff message).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRole {
    pub id: String,
    pub name: String,
    pub prompt: String,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}
