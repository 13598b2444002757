// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session-multiplex gateway (spec §1-§9): the JSON-RPC-over-WebSocket
//! front door, per-connection state machine, process-supervision layer,
//! watcher fan-out framework, work-start protocol, and auto-resumer that
//! sit between a browser client and external agent sub-processes.

pub mod config;
pub mod controller;
pub mod error;
pub mod ids;
pub mod model;
pub mod process;
pub mod rpc;
pub mod state;
pub mod store;
pub mod transport;
pub mod watcher;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use crate::config::GatewayConfig;
use crate::process::agent_session::SpawnFuture;
use crate::process::{AgentAdapter, ShellAgentAdapter, StartParams};
use crate::state::GatewayState;

/// A no-op adapter used when `GatewayConfig::agent_launch` is unset. Every
/// spawn attempt fails immediately rather than hanging a caller — the
/// gateway is still useful for Session/Work/Role CRUD and the watcher
/// framework without a configured agent.
struct UnconfiguredAdapter;

impl AgentAdapter for UnconfiguredAdapter {
    fn spawn(&self, _params: StartParams) -> SpawnFuture {
        Box::pin(async { Err(crate::error::GatewayError::internal("no agent launch command configured (--agent-launch / GATEWAY_AGENT_LAUNCH)")) })
    }
}

fn build_adapter(config: &GatewayConfig) -> Arc<dyn AgentAdapter> {
    match &config.agent_launch {
        Some(launch) => Arc::new(ShellAgentAdapter::new(launch.clone())),
        None => Arc::new(UnconfiguredAdapter),
    }
}

/// Run the gateway until shutdown (ctrl-c, or SIGTERM on unix).
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let adapter = build_adapter(&config);
    let state = GatewayState::new(config, adapter);

    let router = transport::build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "sessiongw listening");

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal(Arc::clone(&state))).await?;

    Ok(())
}

async fn shutdown_signal(state: Arc<GatewayState>) {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, draining worktrees");
    state.worktree_manager.shutdown_all().await;
}
