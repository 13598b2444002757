// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for the session-multiplex gateway.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "sessiongw", version)]
pub struct GatewayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "GATEWAY_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8900, env = "GATEWAY_PORT")]
    pub port: u16,

    /// Shared bearer token required by the first `auth` request on every
    /// connection. If unset, auth is accepted unconditionally (dev mode).
    #[arg(long, env = "GATEWAY_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Directory the main worktree's stores persist under.
    #[arg(long, default_value = "./data", env = "GATEWAY_DATA_DIR")]
    pub data_dir: std::path::PathBuf,

    /// Idle TTL (seconds) before ProcessManager evicts a `running-idle`
    /// agent sub-process with no outstanding input request. §4.3.
    #[arg(long, default_value_t = 600, env = "GATEWAY_IDLE_TIMEOUT_SECS")]
    pub idle_timeout_secs: u64,

    /// Settle delay (ms) AutoResumer waits after observing process-idle
    /// before checking Work state. §4.8 Trigger A.
    #[arg(long, default_value_t = 2000, env = "GATEWAY_SETTLE_DELAY_MS")]
    pub settle_delay_ms: u64,

    /// Maximum auto-resume continuation attempts per session before giving up.
    #[arg(long, default_value_t = 3, env = "GATEWAY_MAX_RETRIES")]
    pub max_retries: u32,

    /// Launch command template for the external agent sub-process
    /// (invoked via `sh -c`, working directory and resume id are passed
    /// as environment variables `GATEWAY_SESSION_ID` / `GATEWAY_RESUME_ID`).
    #[arg(long, env = "GATEWAY_AGENT_LAUNCH")]
    pub agent_launch: Option<String>,

    /// Log output format.
    #[arg(long, default_value = "text", env = "GATEWAY_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Watcher subscriber channel capacity before a client is judged slow.
    #[arg(long, default_value_t = 256, env = "GATEWAY_WATCHER_CHANNEL_CAPACITY")]
    pub watcher_channel_capacity: usize,

    /// Filesystem/git watcher debounce window in milliseconds.
    #[arg(long, default_value_t = 100, env = "GATEWAY_DEBOUNCE_MS")]
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

impl GatewayConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
