// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::tool::{decode_args, Tool, ToolCall, ToolContext, ToolOutput};

/// Cancellation poll interval while a foreground command runs.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Shell command execution.
///
/// Foreground commands capture stdout/stderr, stream chunks through the
/// context's command-out channel, and poll cancellation every 100 ms;
/// on cancel the child receives SIGTERM and the call fails with
/// `Operation cancelled`.  Background commands detach and return
/// immediately with the pid.
#[derive(Default)]
pub struct RunTerminalCmdTool;

#[derive(Debug, Deserialize)]
struct RunTerminalCmdArgs {
    command: String,
    #[serde(default)]
    is_background: bool,
    #[serde(default)]
    #[allow(dead_code)]
    explanation: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    required_permissions: Option<Vec<String>>,
}

fn shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
}

#[async_trait]
impl Tool for RunTerminalCmdTool {
    fn name(&self) -> &str {
        "run_terminal_cmd"
    }

    fn description(&self) -> &str {
        "Execute a shell command.\n\
         Foreground (default): waits for completion and returns \
         {exitCode, stdout, stderr}; output is streamed while it runs.\n\
         is_background=true: detaches the process and returns {pid, started_at} \
         immediately.\n\
         Do not use this for file reads, searches, or edits — the dedicated \
         tools (read_file, rg, edit_file) handle those."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "is_background": {
                    "type": "boolean",
                    "description": "Detach and return the pid immediately"
                },
                "explanation": {
                    "type": "string",
                    "description": "One sentence on why this command is being run"
                },
                "required_permissions": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Capabilities the command needs (informational)"
                }
            },
            "required": ["command", "is_background"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let args: RunTerminalCmdArgs = match decode_args(call) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        debug!(cmd = %args.command, background = args.is_background, "run_terminal_cmd tool");

        if args.is_background {
            return spawn_background(&call.id, &args.command);
        }
        run_foreground(&call.id, &args.command, ctx).await
    }
}

fn spawn_background(call_id: &str, command: &str) -> ToolOutput {
    let child = Command::new(shell())
        .arg("-lc")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    match child {
        Ok(child) => {
            let pid = child.id().unwrap_or(0);
            ToolOutput::ok(
                call_id,
                json!({
                    "pid": pid,
                    "started_at": chrono::Utc::now().to_rfc3339(),
                }),
            )
        }
        Err(e) => ToolOutput::err(call_id, format!("spawn error: {e}")),
    }
}

async fn run_foreground(call_id: &str, command: &str, ctx: &ToolContext) -> ToolOutput {
    let mut child = match Command::new(shell())
        .arg("-lc")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(c) => c,
        Err(e) => return ToolOutput::err(call_id, format!("spawn error: {e}")),
    };

    let pid = child.id().unwrap_or(0);
    let process_key = format!("pid_{}_{}", pid, chrono::Utc::now().timestamp_millis());
    ctx.active_processes
        .lock()
        .await
        .insert(process_key.clone(), pid);

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut stdout_lines = stdout.map(|s| BufReader::new(s).lines());
    let mut stderr_lines = stderr.map(|s| BufReader::new(s).lines());
    let mut stdout_buf = String::new();
    let mut stderr_buf = String::new();
    let mut stdout_done = stdout_lines.is_none();
    let mut stderr_done = stderr_lines.is_none();

    let mut poll = tokio::time::interval(CANCEL_POLL);
    let exit_status = loop {
        if ctx.cancel.is_cancelled() {
            terminate(&child);
            ctx.active_processes.lock().await.remove(&process_key);
            return ToolOutput::err(call_id, "Operation cancelled");
        }
        tokio::select! {
            line = next_line(&mut stdout_lines), if !stdout_done => {
                match line {
                    Some(l) => {
                        stdout_buf.push_str(&l);
                        stdout_buf.push('\n');
                        ctx.emit_command_out("stdout", l).await;
                    }
                    None => stdout_done = true,
                }
            }
            line = next_line(&mut stderr_lines), if !stderr_done => {
                match line {
                    Some(l) => {
                        stderr_buf.push_str(&l);
                        stderr_buf.push('\n');
                        ctx.emit_command_out("stderr", l).await;
                    }
                    None => stderr_done = true,
                }
            }
            status = child.wait(), if stdout_done && stderr_done => {
                break status;
            }
            _ = poll.tick() => {}
        }
    };

    ctx.active_processes.lock().await.remove(&process_key);

    match exit_status {
        Ok(status) => ToolOutput::ok(
            call_id,
            json!({
                "exitCode": status.code().unwrap_or(-1),
                "stdout": stdout_buf,
                "stderr": stderr_buf,
            }),
        ),
        Err(e) => ToolOutput::err(call_id, format!("wait error: {e}")),
    }
}

/// Ask the child to stop with SIGTERM so shutdown hooks run; the process
/// table entry is reaped by the kernel once the loop returns.
fn terminate(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        #[cfg(unix)]
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
        #[cfg(not(unix))]
        let _ = pid;
    }
}

async fn next_line(
    lines: &mut Option<tokio::io::Lines<BufReader<impl tokio::io::AsyncRead + Unpin>>>,
) -> Option<String> {
    match lines {
        Some(l) => l.next_line().await.ok().flatten(),
        None => None,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::CommandChunk;
    use tern_session::Session;

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: "run_terminal_cmd".into(),
            args,
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::for_session(Session::new_chat("test"))
    }

    #[tokio::test]
    async fn foreground_returns_exit_code_and_stdout() {
        let t = RunTerminalCmdTool;
        let out = t
            .execute(
                &call(json!({ "command": "echo hello", "is_background": false })),
                &ctx(),
            )
            .await;
        assert!(!out.is_error, "{:?}", out.payload);
        assert_eq!(out.payload["exitCode"], 0);
        assert!(out.payload["stdout"].as_str().unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn stderr_is_captured_separately() {
        let t = RunTerminalCmdTool;
        let out = t
            .execute(
                &call(json!({ "command": "echo oops >&2", "is_background": false })),
                &ctx(),
            )
            .await;
        assert!(out.payload["stderr"].as_str().unwrap().contains("oops"));
        assert!(!out.payload["stdout"].as_str().unwrap().contains("oops"));
    }

    #[tokio::test]
    async fn nonzero_exit_code_is_reported_not_an_error() {
        let t = RunTerminalCmdTool;
        let out = t
            .execute(
                &call(json!({ "command": "exit 3", "is_background": false })),
                &ctx(),
            )
            .await;
        assert!(!out.is_error, "exit codes are data, not failures");
        assert_eq!(out.payload["exitCode"], 3);
    }

    #[tokio::test]
    async fn output_chunks_are_streamed() {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<CommandChunk>(16);
        let mut ctx = ctx();
        ctx.command_out = Some(tx);
        let t = RunTerminalCmdTool;
        let out = t
            .execute(
                &call(json!({ "command": "echo streamed", "is_background": false })),
                &ctx,
            )
            .await;
        assert!(!out.is_error);
        let chunk = rx.try_recv().expect("expected a streamed chunk");
        assert_eq!(chunk.stream, "stdout");
        assert!(chunk.data.contains("streamed"));
    }

    #[tokio::test]
    async fn background_returns_pid_and_started_at() {
        let t = RunTerminalCmdTool;
        let out = t
            .execute(
                &call(json!({ "command": "sleep 0.1", "is_background": true })),
                &ctx(),
            )
            .await;
        assert!(!out.is_error);
        assert!(out.payload["pid"].as_u64().unwrap() > 0);
        assert!(out.payload["started_at"].as_str().is_some());
    }

    #[tokio::test]
    async fn cancellation_terminates_the_command() {
        let ctx = ctx();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            cancel.cancel();
        });
        let t = RunTerminalCmdTool;
        let start = std::time::Instant::now();
        let out = t
            .execute(
                &call(json!({ "command": "sleep 30", "is_background": false })),
                &ctx,
            )
            .await;
        assert!(out.is_error);
        assert_eq!(out.payload["error"], "Operation cancelled");
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "cancellation must not wait for the command"
        );
        assert!(
            ctx.active_processes.lock().await.is_empty(),
            "cancelled process must be deregistered"
        );
    }

    #[tokio::test]
    async fn missing_command_is_invalid_arguments() {
        let t = RunTerminalCmdTool;
        let out = t
            .execute(&call(json!({ "is_background": false })), &ctx())
            .await;
        assert!(out.is_error);
        assert!(out.payload["error"]
            .as_str()
            .unwrap()
            .contains("invalid arguments"));
    }
}
