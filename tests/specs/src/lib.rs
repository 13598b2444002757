// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `sessiongw` binary as a subprocess and exercises it
//! over its JSON-RPC-over-WebSocket wire protocol (§6, §8).

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Once;
use std::time::Duration;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Resolve the path to the compiled `sessiongw` binary.
pub fn sessiongw_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs -> tests -> workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("sessiongw")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A minimal newline-delimited-JSON "echo agent" fixture script: it reads
/// `AgentCommand` lines from stdin and emits the `session-id-announce`,
/// `text`, `done` sequence §8 scenario 1 expects for every `message`
/// command, ignoring everything else. Written to a temp file so
/// `GatewayConfig::agent_launch` can shell out to it.
pub fn write_echo_agent_script(dir: &Path) -> anyhow::Result<PathBuf> {
    let path = dir.join("echo-agent.sh");
    let script = r#"#!/bin/sh
while IFS= read -r line; do
  type=$(printf '%s' "$line" | sed -n 's/.*"type":"\([a-z_]*\)".*/\1/p')
  if [ "$type" = "message" ]; then
    echo '{"type":"session_id_announce","session_id":"'"$GATEWAY_SESSION_ID"'"}'
    echo '{"type":"text","text":"hello from echo agent"}'
    echo '{"type":"done"}'
  fi
done
"#;
    std::fs::write(&path, script)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms)?;
    }
    Ok(path)
}

/// A running `sessiongw` process that is killed on drop.
pub struct GatewayProcess {
    child: Child,
    port: u16,
    _scratch_dir: tempfile::TempDir,
}

impl GatewayProcess {
    /// Spawn the gateway with an `--agent-launch` pointed at a fixture
    /// echo-agent script, auth disabled, and an isolated `--data-dir`.
    pub fn start() -> anyhow::Result<Self> {
        ensure_crypto();
        let binary = sessiongw_binary();
        anyhow::ensure!(binary.exists(), "sessiongw binary not found at {}", binary.display());

        let scratch_dir = tempfile::tempdir()?;
        let agent_script = write_echo_agent_script(scratch_dir.path())?;
        let data_dir = scratch_dir.path().join("data");
        std::fs::create_dir_all(&data_dir)?;

        let port = free_port()?;
        let child = Command::new(&binary)
            .args([
                "--host",
                "127.0.0.1",
                "--port",
                &port.to_string(),
                "--data-dir",
                &data_dir.display().to_string(),
                "--agent-launch",
                &agent_script.display().to_string(),
                "--log-format",
                "text",
            ])
            .env("RUST_LOG", "warn")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, port, _scratch_dir: scratch_dir })
    }

    /// Spawn the gateway with a required bearer token (§4.6 auth gate tests).
    pub fn start_with_token(token: &str) -> anyhow::Result<Self> {
        ensure_crypto();
        let binary = sessiongw_binary();
        anyhow::ensure!(binary.exists(), "sessiongw binary not found at {}", binary.display());

        let scratch_dir = tempfile::tempdir()?;
        let agent_script = write_echo_agent_script(scratch_dir.path())?;
        let data_dir = scratch_dir.path().join("data");
        std::fs::create_dir_all(&data_dir)?;

        let port = free_port()?;
        let child = Command::new(&binary)
            .args([
                "--host",
                "127.0.0.1",
                "--port",
                &port.to_string(),
                "--data-dir",
                &data_dir.display().to_string(),
                "--agent-launch",
                &agent_script.display().to_string(),
                "--auth-token",
                token,
                "--log-format",
                "text",
            ])
            .env("RUST_LOG", "warn")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, port, _scratch_dir: scratch_dir })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    /// Poll the health endpoint until it responds, or time out.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let client = reqwest::Client::new();
        let url = format!("{}/api/v1/health", self.base_url());
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("sessiongw did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for GatewayProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
