// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// JSON-RPC standard error codes used by this gateway.
pub mod rpc_code {
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Gateway-wide error, shared by stores, watchers, the process manager,
/// and RPC handlers. Maps to a JSON-RPC error per §7 of the spec.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GatewayError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl GatewayError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(what: impl Into<String>) -> Self {
        Self::Validation(what.into())
    }

    pub fn invalid_transition(what: impl Into<String>) -> Self {
        Self::InvalidTransition(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    pub fn internal(what: impl Into<String>) -> Self {
        Self::Internal(what.into())
    }

    pub fn protocol(what: impl Into<String>) -> Self {
        Self::Protocol(what.into())
    }

    /// JSON-RPC error code this error maps to, per spec §6/§7.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::Validation(_) => rpc_code::INVALID_PARAMS,
            Self::NotFound(_) => rpc_code::INVALID_PARAMS,
            Self::InvalidTransition(_) => rpc_code::INVALID_PARAMS,
            Self::Conflict(_) => rpc_code::INVALID_PARAMS,
            Self::Internal(_) => rpc_code::INTERNAL_ERROR,
            Self::Protocol(_) => rpc_code::INVALID_REQUEST,
        }
    }

    /// Human-readable message, without the `kind` tag.
    pub fn message(&self) -> String {
        match self {
            Self::Validation(m)
            | Self::NotFound(m)
            | Self::InvalidTransition(m)
            | Self::Conflict(m)
            | Self::Internal(m)
            | Self::Protocol(m) => m.clone(),
        }
    }

    /// Whether this error should close the connection (protocol violations only).
    pub fn closes_connection(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
