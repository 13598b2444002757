// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concrete [`AgentAdapter`] that shells out to the external agent
//! sub-process named by `GatewayConfig::agent_launch` (§1: "the agent
//! sub-process wire format" is out of this gateway's scope beyond the
//! [`AgentEvent`]/[`AgentCommand`] shapes it already speaks once spawned).
//!
//! The launch command is invoked via `sh -c` with the session id and, when
//! resuming, the resume id passed as environment variables, matching the
//! convention in [`crate::config::GatewayConfig::agent_launch`]'s doc
//! comment. The child's stdout is read as newline-delimited JSON
//! [`AgentEvent`] values; its stdin accepts newline-delimited JSON
//! [`AgentCommand`] values. Stderr is drained to the log, one line at a
//! time, so a noisy child can't deadlock on a full pipe.

use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::process::agent_session::{AgentAdapter, AgentCommand, AgentEvent, AgentProcessHandle, SpawnFuture, StartParams};

const COMMAND_CHANNEL_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Shells out to `GatewayConfig::agent_launch` for every spawned session.
pub struct ShellAgentAdapter {
    launch_template: String,
}

impl ShellAgentAdapter {
    pub fn new(launch_template: String) -> Self {
        Self { launch_template }
    }
}

impl AgentAdapter for ShellAgentAdapter {
    fn spawn(&self, params: StartParams) -> SpawnFuture {
        let launch_template = self.launch_template.clone();
        Box::pin(async move { spawn_child(&launch_template, params).await })
    }
}

/// Newline-delimited wire envelope written to the child's stdin, mirroring
/// [`AgentCommand`] but with a serializable shape (the in-process enum
/// doesn't derive `Serialize` since it never crosses a channel boundary
/// elsewhere).
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireCommand<'a> {
    Message { content: &'a str },
    Interrupt,
    PermissionResponse { request_id: &'a str, choice: crate::model::session::PermissionChoice },
    QuestionResponse { request_id: &'a str, #[serde(skip_serializing_if = "Option::is_none")] answers: &'a Option<serde_json::Value>, cancelled: bool },
}

#[derive(Debug, Deserialize)]
struct WireEvent(AgentEvent);

async fn spawn_child(launch_template: &str, params: StartParams) -> GatewayResult<AgentProcessHandle> {
    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(launch_template)
        .current_dir(&params.working_dir)
        .env("GATEWAY_SESSION_ID", &params.session_id);
    if params.resume {
        command.env("GATEWAY_RESUME_ID", &params.session_id);
    }
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(ref prompt) = params.system_prompt_override {
        command.env("GATEWAY_SYSTEM_PROMPT", prompt);
    }

    let mut child = command
        .spawn()
        .map_err(|e| GatewayError::internal(format!("failed to spawn agent sub-process: {e}")))?;

    let stdin = child.stdin.take().ok_or_else(|| GatewayError::internal("agent sub-process has no stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| GatewayError::internal("agent sub-process has no stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| GatewayError::internal("agent sub-process has no stderr"))?;

    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let exited = CancellationToken::new();

    let session_id = params.session_id.clone();
    spawn_stdin_writer(session_id.clone(), stdin, command_rx);
    spawn_stdout_reader(session_id.clone(), stdout, event_tx);
    spawn_stderr_drain(session_id.clone(), stderr);
    spawn_exit_watcher(session_id, child, exited.clone());

    Ok(AgentProcessHandle { command_tx, event_rx, exited })
}

fn spawn_stdin_writer(session_id: String, mut stdin: tokio::process::ChildStdin, mut command_rx: mpsc::Receiver<AgentCommand>) {
    tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            let wire = match &command {
                AgentCommand::Message { content } => WireCommand::Message { content },
                AgentCommand::Interrupt => WireCommand::Interrupt,
                AgentCommand::PermissionResponse { request_id, choice } => {
                    WireCommand::PermissionResponse { request_id, choice: *choice }
                }
                AgentCommand::QuestionResponse { request_id, answers, cancelled } => {
                    WireCommand::QuestionResponse { request_id, answers, cancelled: *cancelled }
                }
            };
            let Ok(mut line) = serde_json::to_string(&wire) else { continue };
            line.push('\n');
            if stdin.write_all(line.as_bytes()).await.is_err() {
                debug!(session_id = %session_id, "agent stdin closed, stopping writer");
                break;
            }
        }
    });
}

fn spawn_stdout_reader(session_id: String, stdout: tokio::process::ChildStdout, event_tx: mpsc::Sender<AgentEvent>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<WireEvent>(&line) {
                        Ok(WireEvent(event)) => {
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(session_id = %session_id, line = %line, error = %err, "unparseable agent event"),
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "agent stdout read failed");
                    break;
                }
            }
        }
    });
}

fn spawn_stderr_drain(session_id: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(session_id = %session_id, target: "agent_stderr", "{line}");
        }
    });
}

fn spawn_exit_watcher(session_id: String, mut child: tokio::process::Child, exited: CancellationToken) {
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => debug!(session_id = %session_id, status = %status, "agent sub-process exited"),
            Err(err) => warn!(session_id = %session_id, error = %err, "failed to wait on agent sub-process"),
        }
        exited.cancel();
    });
}
