// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Liveness probe (§1: out of scope beyond its stated interface — the
//! wire protocol proper lives entirely on `/ws`).

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::GatewayState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health(State(_state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    Json(HealthResponse { status: "running", version: env!("CARGO_PKG_VERSION") })
}
