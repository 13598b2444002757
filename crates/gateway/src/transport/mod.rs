// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport (§6: "JSON-RPC 2.0 over WebSocket text
//! frames"). The only routes are a liveness probe and the single `/ws`
//! upgrade; everything else in §4.6's method surface is multiplexed over
//! that one connection by [`crate::rpc::Dispatcher`].

pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::GatewayState;

/// Build the axum `Router` serving this gateway's entire external surface.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
