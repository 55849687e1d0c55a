// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Scripted provider for tests and offline runs.
//!
//! Each call to [`Provider::complete`] pops the next scripted turn and
//! streams its events.  Requests are recorded so tests can assert on the
//! exact wire-level history the loop would have sent.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{provider::ResponseStream, CompletionRequest, StreamEvent};

/// One scripted turn: either a stream of events or an error.
pub enum ScriptedTurn {
    Events(Vec<StreamEvent>),
    Error(String),
}

impl ScriptedTurn {
    /// A plain text answer followed by `Done`.
    pub fn text(t: &str) -> Self {
        Self::Events(vec![
            StreamEvent::TextDelta(t.to_string()),
            StreamEvent::Done,
        ])
    }

    /// A single tool call (complete arguments in one delta) and `Done`.
    pub fn tool_call(id: &str, name: &str, arguments: &str) -> Self {
        Self::Events(vec![
            StreamEvent::ToolCallDelta {
                index: 0,
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
                thought_signature: None,
            },
            StreamEvent::Done,
        ])
    }
}

#[derive(Default)]
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    /// Every request seen, in order.
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl crate::Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        self.requests.lock().unwrap().push(req);
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ScriptedTurn::Events(vec![StreamEvent::Done]));
        match turn {
            ScriptedTurn::Error(msg) => Err(anyhow::anyhow!(msg)),
            ScriptedTurn::Events(events) => {
                let items: Vec<anyhow::Result<StreamEvent>> =
                    events.into_iter().map(Ok).collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
