// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// A saved slash-command template a client can list and invoke by name
/// (§9 Design Notes: the dispatcher owns a `CommandStore` alongside the
/// other per-worktree stores; the spec's method surface names `command.*`
/// in §4.6 without detailing the record shape beyond "analogous CRUD").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub name: String,
    pub template: String,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}
