// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

/// Phase tag on [`AgentEvent::ToolCallData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolDataPhase {
    /// Subprocess output bytes while the tool runs.
    Stream,
    /// The tool's final payload.
    Result,
    /// The tool failed; `data` carries the error payload.
    Error,
}

/// The hook surface of the agent loop.
///
/// Events are delivered through an `mpsc::Sender`; every send is awaited
/// before the next chunk is processed, so consumers observe the exact
/// provider order (`request → reasoning* → response* → toolCalls…`).
/// A dropped receiver never aborts the loop.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    RequestStart {
        iteration: u32,
    },
    RequestDone {
        iteration: u32,
    },
    ReasoningStart,
    ReasoningData(String),
    /// Full reasoning text, emitted when the reasoning block closes.
    ReasoningDone(String),
    ResponseStart,
    ResponseData(String),
    /// Full response text for the turn.
    ResponseDone(String),
    ToolCallStart {
        call_id: String,
        name: String,
        arguments: String,
    },
    ToolCallData {
        call_id: String,
        phase: ToolDataPhase,
        data: Value,
    },
    ToolCallEnd {
        call_id: String,
        name: String,
        elapsed_ms: u64,
        is_error: bool,
    },
    /// Synthesized conversation title.
    Title(String),
}
