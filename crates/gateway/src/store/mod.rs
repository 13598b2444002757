// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transactional, durable ordered collections (§4.4): Session, Work, and
//! AgentRole stores, each with a `ChangeBus` subscribers fan out from.

pub mod bus;
pub mod command_store;
pub mod role_store;
pub mod session_store;
pub mod work_store;

pub use command_store::CommandStore;
pub use role_store::RoleStore;
pub use session_store::SessionStore;
pub use work_store::WorkStore;

/// Current epoch milliseconds, used for timestamping store writes.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
