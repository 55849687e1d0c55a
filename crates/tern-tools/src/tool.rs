// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

use tern_session::Session;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier from the model, forwarded verbatim.
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

/// Cooperative cancellation probe shared between the agent loop, the
/// streaming iterator, and every running tool.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Live child processes registered for forcible termination, keyed by
/// `pid_<pid>_<start-millis>` so a recycled pid never aliases an old entry.
pub type ActiveProcesses = Arc<Mutex<HashMap<String, u32>>>;

/// A chunk of subprocess output streamed while a command runs.
#[derive(Debug, Clone)]
pub struct CommandChunk {
    /// `"stdout"` or `"stderr"`.
    pub stream: &'static str,
    pub data: String,
}

/// Everything a tool may touch beyond its arguments.
#[derive(Clone)]
pub struct ToolContext {
    /// The owning session; mutations persist through it.
    pub session: Arc<Mutex<Session>>,
    /// Streaming sink for subprocess output.  `None` when the caller does
    /// not observe streams.
    pub command_out: Option<mpsc::Sender<CommandChunk>>,
    pub cancel: CancelToken,
    pub active_processes: ActiveProcesses,
}

impl ToolContext {
    /// A context over a fresh transient session — the common test fixture.
    pub fn for_session(session: Session) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            command_out: None,
            cancel: CancelToken::new(),
            active_processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Forward a subprocess chunk to the observer, if any.
    pub async fn emit_command_out(&self, stream: &'static str, data: String) {
        if let Some(tx) = &self.command_out {
            let _ = tx.send(CommandChunk { stream, data }).await;
        }
    }
}

/// Out-of-band results a tool produces for the runtime, never forwarded to
/// the model.  The agent routes them into `session.data.diffs`.
#[derive(Debug, Clone, Default)]
pub struct SideEffects {
    pub diff: Option<String>,
    pub patch_command: Option<String>,
}

impl SideEffects {
    pub fn is_empty(&self) -> bool {
        self.diff.is_none() && self.patch_command.is_none()
    }
}

/// The result of executing a tool: a JSON payload for the model plus the
/// side-effect channel.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub payload: Value,
    pub is_error: bool,
    pub side_effects: SideEffects,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, payload: Value) -> Self {
        Self {
            call_id: call_id.into(),
            payload,
            is_error: false,
            side_effects: SideEffects::default(),
        }
    }

    /// Failures are payloads, not exceptions: the model reads them and can
    /// retry with corrected arguments.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            payload: json!({ "success": false, "error": msg.into() }),
            is_error: true,
            side_effects: SideEffects::default(),
        }
    }

    pub fn with_diff(mut self, diff: Option<String>, patch_command: Option<String>) -> Self {
        self.side_effects.diff = diff;
        self.side_effects.patch_command = patch_command;
        self
    }

    /// The payload as the string that goes into the tool message: raw for
    /// string payloads, JSON otherwise.
    pub fn payload_text(&self) -> String {
        match &self.payload {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Decode a tool's typed argument struct.  Unknown or ill-typed fields fail
/// here, before the handler runs.
pub fn decode_args<T: DeserializeOwned>(call: &ToolCall) -> Result<T, String> {
    serde_json::from_value(call.args.clone()).map_err(|e| format!("invalid arguments: {e}"))
}

/// Trait every built-in tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the argument object.
    fn parameters_schema(&self) -> Value;
    /// Execute the tool.  Failures are wrapped in [`ToolOutput::err`].
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
