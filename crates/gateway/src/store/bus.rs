// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generic store change-event bus, modeled on the aggregator hub pattern:
//! a `broadcast` channel plus a typed event enum subscribers fan out from.
//! Each [`crate::store`] owns one `ChangeBus<T>` and publishes in commit order
//! under its own mutex (§4.4).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A single store mutation, broadcast to all subscribers in commit order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum ChangeEvent<T> {
    Create { item: T },
    Update { item: T },
    Delete { id: String },
}

impl<T> ChangeEvent<T> {
    pub fn id(&self) -> &str
    where
        T: HasId,
    {
        match self {
            Self::Create { item } | Self::Update { item } => item.id(),
            Self::Delete { id } => id,
        }
    }
}

pub trait HasId {
    fn id(&self) -> &str;
}

/// Broadcast bus wrapper. Default capacity follows the ground truth's
/// aggregator channel (256) — deep enough to absorb a burst of writes
/// between a watcher's select-loop iterations without lagging.
pub struct ChangeBus<T> {
    tx: broadcast::Sender<ChangeEvent<T>>,
}

impl<T: Clone> ChangeBus<T> {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent<T>> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ChangeEvent<T>) {
        // No subscribers is routine (e.g. no watcher started yet); the
        // bus is not the source of truth, the store's own map is.
        let _ = self.tx.send(event);
    }
}

impl<T: Clone> Default for ChangeBus<T> {
    fn default() -> Self {
        Self::new()
    }
}
