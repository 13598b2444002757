// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! UUIDv7 identifiers. SessionMeta, Work, and Subscription ids are all
//! time-ordered per §3 so a naive `ORDER BY id` on any store matches
//! creation order without a separate timestamp index.

use uuid::Uuid;

/// Generate a new time-ordered id string.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}
