// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Notifier/Watcher fan-out framework (§4.1).
//!
//! A [`Notifier`] is a per-connection capability to deliver one
//! server-to-client notification, non-blocking from the producer's
//! perspective. A Watcher is a multi-producer/multi-consumer fan-out
//! built on top of many Notifiers; see [`list`], [`chat`], [`settings`],
//! and [`fsgit`] for the concrete variants named in §4.1.

pub mod chat;
pub mod fsgit;
pub mod list;
pub mod settings;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::ids::new_id;

/// One server -> client notification: a JSON-RPC object with no `id`.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub method: String,
    pub params: serde_json::Value,
}

/// Signal that a subscriber's outbound channel is full — the Watcher's
/// back-pressure policy (§4.1) treats this as "slow client" and evicts.
#[derive(Debug, Clone, Copy)]
pub struct SlowClient;

/// A per-connection capability to deliver one notification at a time.
///
/// Cloning a `Notifier` is cheap (it wraps a bounded `mpsc::Sender`); the
/// receiving end is drained by the connection's single transport-write
/// task, which is what gives per-connection notification delivery its
/// serialization (§4.1, §5 "Locks").
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Notification>,
}

impl Notifier {
    /// Create a connected `(Notifier, Receiver)` pair with the given
    /// channel capacity (`GatewayConfig::watcher_channel_capacity`).
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Attempt to deliver one notification without blocking. A full
    /// channel means the client is not draining fast enough; the caller
    /// (a Watcher) should unsubscribe and drop this Notifier rather than
    /// block other subscribers (§4.1 back-pressure policy).
    pub fn try_notify(&self, method: impl Into<String>, params: serde_json::Value) -> Result<(), SlowClient> {
        self.tx.try_send(Notification { method: method.into(), params }).map_err(|_| SlowClient)
    }
}

/// Counts dropped-subscriber events per watcher kind, for the "observable
/// metrics" the Design Notes call for so back-pressure regressions are
/// diagnosable rather than silent.
#[derive(Default)]
pub struct DropCounter(AtomicU64);

impl DropCounter {
    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Generate a new subscription id (UUIDv7, §3).
pub fn new_subscription_id() -> String {
    new_id()
}
