// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::bail;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use tern_config::ModelSpec;
use tern_model::{
    accumulate_usage, is_stale_response_id_error, provider_for, CompletionRequest, Message,
    Provider, StreamEvent, ToolCallAccumulator,
};
use tern_session::{DiffRecord, Session};
use tern_tools::{ActiveProcesses, CancelToken, CommandChunk, ToolContext, ToolRegistry};

use crate::cwd::CwdGuard;
use crate::events::{AgentEvent, ToolDataPhase};

const DEFAULT_MAX_ITERATIONS: u32 = 100;
const TITLE_MAX_CHARS: usize = 200;

/// Drives the model ↔ tool loop for one session.
///
/// One `complete` call runs a bounded iteration of request → stream parse →
/// tool dispatch → tool-message injection until the model stops requesting
/// tools.  Hooks are a typed [`AgentEvent`] stream; every send is awaited so
/// observers see provider order.
pub struct Agent {
    session: Arc<Mutex<Session>>,
    spec: ModelSpec,
    provider: Box<dyn Provider>,
    tools: Arc<ToolRegistry>,
    max_iterations: u32,
    cancel: CancelToken,
    active_processes: ActiveProcesses,
    /// Usage totals accumulated additively, in the dialect's native shape.
    usage: Value,
}

impl Agent {
    pub fn new(spec: ModelSpec, session: Session, tools: Arc<ToolRegistry>) -> Self {
        let provider = provider_for(&spec);
        Self::with_provider(spec, session, tools, provider)
    }

    /// Construct with an explicit provider (tests use a scripted one).
    pub fn with_provider(
        spec: ModelSpec,
        session: Session,
        tools: Arc<ToolRegistry>,
        provider: Box<dyn Provider>,
    ) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            spec,
            provider,
            tools,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            cancel: CancelToken::new(),
            active_processes: Arc::new(Mutex::new(HashMap::new())),
            usage: json!({}),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn session(&self) -> Arc<Mutex<Session>> {
        Arc::clone(&self.session)
    }

    /// Cancellation handle; safe to clone into another task.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn usage(&self) -> &Value {
        &self.usage
    }

    /// Abort the in-flight call: flips the shared token (checked at the loop
    /// head, before each tool call, and per streamed chunk) and SIGTERMs
    /// every registered child process.
    pub async fn cancel(&self) {
        self.cancel.cancel();
        let procs = self.active_processes.lock().await;
        for (key, pid) in procs.iter() {
            debug!(process = %key, pid, "terminating child on cancel");
            #[cfg(unix)]
            unsafe {
                libc::kill(*pid as i32, libc::SIGTERM);
            }
        }
    }

    /// Run one user turn to completion and return the final assistant text.
    pub async fn complete(
        &mut self,
        user_input: &str,
        tx: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<String> {
        {
            let mut session = self.session.lock().await;
            apply_system_prompt(&mut session, &self.spec);
            session.add_message(Message::user(user_input))?;
        }

        let tool_schemas: Vec<tern_model::ToolSchema> = self
            .tools
            .schemas_for_allowlist(&self.spec.tool_name_allowlist)
            .into_iter()
            .map(|s| tern_model::ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect();

        let mut final_text = String::new();
        for iteration in 0..self.max_iterations {
            if self.cancel.is_cancelled() {
                bail!("Operation cancelled");
            }

            let req = {
                let mut session = self.session.lock().await;
                // The system prompt file is re-read fresh at serialization
                // time; a changed file takes effect mid-conversation.
                apply_system_prompt(&mut session, &self.spec);
                CompletionRequest {
                    messages: session.messages.clone(),
                    tools: tool_schemas.clone(),
                    previous_response_id: session.last_response_id().map(str::to_string),
                }
            };

            let _ = tx.send(AgentEvent::RequestStart { iteration }).await;
            let turn = self.stream_turn(req, &tx).await?;
            let _ = tx.send(AgentEvent::RequestDone { iteration }).await;

            if self.cancel.is_cancelled() {
                bail!("Operation cancelled");
            }

            let assistant = Message {
                role: tern_model::Role::Assistant,
                content: tern_model::MessageContent::Text(turn.text.clone()),
                tool_calls: if turn.tool_calls.is_empty() {
                    None
                } else {
                    Some(turn.tool_calls.clone())
                },
                reasoning: turn.reasoning.clone(),
                response_id: turn.response_id.clone(),
                tool_call_id: None,
                name: None,
            };
            self.session.lock().await.add_message(assistant)?;

            if !turn.text.is_empty() {
                self.maybe_synthesize_title(&tx).await;
            }

            if turn.tool_calls.is_empty() {
                final_text = turn.text;
                return Ok(final_text);
            }
            final_text = turn.text;

            for tc in &turn.tool_calls {
                if self.cancel.is_cancelled() {
                    bail!("Operation cancelled");
                }
                self.dispatch_tool_call(tc, &tx).await?;
            }
        }

        warn!(
            max_iterations = self.max_iterations,
            "agent loop hit the iteration bound"
        );
        Ok(final_text)
    }

    /// Issue one provider call and fold its stream into a [`TurnOutcome`].
    ///
    /// Stale responses-dialect continuation tokens self-heal here: the token
    /// is cleared from its owning message and the request retried once with
    /// full history.  All other provider errors propagate.
    async fn stream_turn(
        &mut self,
        req: CompletionRequest,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<TurnOutcome> {
        let previous = req.previous_response_id.clone();
        let stream = match self.provider.complete(req.clone()).await {
            Ok(s) => s,
            Err(e) if previous.is_some() && is_stale_response_id_error(&e) => {
                let stale = previous.unwrap();
                warn!(response_id = %stale, "stale continuation token; retrying with full history");
                let retry_req = {
                    let mut session = self.session.lock().await;
                    session.clear_response_id(&stale)?;
                    CompletionRequest {
                        messages: session.messages.clone(),
                        tools: req.tools.clone(),
                        previous_response_id: None,
                    }
                };
                self.provider.complete(retry_req).await?
            }
            Err(e) => return Err(e),
        };
        self.consume_stream(stream, tx).await
    }

    async fn consume_stream(
        &mut self,
        mut stream: tern_model::ResponseStream,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<TurnOutcome> {
        let mut text = String::new();
        let mut reasoning = String::new();
        let mut response_id: Option<String> = None;
        let mut acc = ToolCallAccumulator::new();
        let mut reasoning_open = false;
        let mut response_open = false;

        while let Some(event) = stream.next().await {
            if self.cancel.is_cancelled() {
                bail!("Operation cancelled");
            }
            match event? {
                StreamEvent::ReasoningDelta(delta) => {
                    if !reasoning_open {
                        reasoning_open = true;
                        let _ = tx.send(AgentEvent::ReasoningStart).await;
                    }
                    reasoning.push_str(&delta);
                    let _ = tx.send(AgentEvent::ReasoningData(delta)).await;
                }
                StreamEvent::TextDelta(delta) if !delta.is_empty() => {
                    if reasoning_open {
                        reasoning_open = false;
                        let _ = tx.send(AgentEvent::ReasoningDone(reasoning.clone())).await;
                    }
                    if !response_open {
                        response_open = true;
                        let _ = tx.send(AgentEvent::ResponseStart).await;
                    }
                    text.push_str(&delta);
                    let _ = tx.send(AgentEvent::ResponseData(delta)).await;
                }
                StreamEvent::TextDelta(_) => {}
                StreamEvent::ToolCallDelta {
                    index,
                    id,
                    name,
                    arguments,
                    thought_signature,
                } => {
                    acc.push(index, &id, &name, &arguments, thought_signature);
                }
                StreamEvent::ResponseId(id) => response_id = Some(id),
                StreamEvent::Usage(u) => accumulate_usage(&mut self.usage, &u),
                StreamEvent::Error(e) => warn!("model stream warning: {e}"),
                StreamEvent::Done => break,
            }
        }

        if reasoning_open {
            let _ = tx.send(AgentEvent::ReasoningDone(reasoning.clone())).await;
        }
        if response_open {
            let _ = tx.send(AgentEvent::ResponseDone(text.clone())).await;
        }

        Ok(TurnOutcome {
            text,
            reasoning: if reasoning.is_empty() {
                None
            } else {
                Some(reasoning)
            },
            response_id,
            tool_calls: acc.finish(),
        })
    }

    /// Execute one tool call: chdir scope, argument parse, side-effect
    /// routing, tool-message injection, hook events.
    async fn dispatch_tool_call(
        &mut self,
        tc: &tern_model::ToolCall,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<()> {
        // Tools resolve paths relative to the session's base_dir; the guard
        // restores the previous CWD on every exit path.
        let base_dir = self.session.lock().await.base_dir.clone();
        let _cwd = match &base_dir {
            Some(dir) => Some(CwdGuard::enter(dir).await?),
            None => None,
        };

        let args: Value = if tc.function.arguments.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str(&tc.function.arguments) {
                Ok(v) => v,
                Err(e) => {
                    warn!(tool = %tc.function.name, error = %e, "unparseable tool arguments");
                    json!({})
                }
            }
        };

        let _ = tx
            .send(AgentEvent::ToolCallStart {
                call_id: tc.id.clone(),
                name: tc.function.name.clone(),
                arguments: tc.function.arguments.clone(),
            })
            .await;

        // Bridge subprocess chunks into the event stream while the tool runs.
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<CommandChunk>(64);
        let forward_tx = tx.clone();
        let forward_call_id = tc.id.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                let _ = forward_tx
                    .send(AgentEvent::ToolCallData {
                        call_id: forward_call_id.clone(),
                        phase: ToolDataPhase::Stream,
                        data: json!({ "stream": chunk.stream, "data": chunk.data }),
                    })
                    .await;
            }
        });

        let call = tern_tools::ToolCall {
            id: tc.id.clone(),
            name: tc.function.name.clone(),
            args,
        };
        let ctx = ToolContext {
            session: Arc::clone(&self.session),
            command_out: Some(chunk_tx),
            cancel: self.cancel.clone(),
            active_processes: Arc::clone(&self.active_processes),
        };

        let started = Instant::now();
        let output = self.tools.execute(&call, &ctx).await;
        drop(ctx);
        let _ = forwarder.await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        // A cancelled call appends nothing: the tool's result (usually the
        // "Operation cancelled" rejection) is discarded along with the turn.
        if self.cancel.is_cancelled() {
            bail!("Operation cancelled");
        }

        // Side effects never reach the model; they land in the diffs map.
        if !output.side_effects.is_empty() {
            let record = DiffRecord {
                diff: output.side_effects.diff.clone().unwrap_or_default(),
                patch_command: output.side_effects.patch_command.clone(),
                tool_name: tc.function.name.clone(),
            };
            self.session.lock().await.record_diff(&tc.id, record)?;
        }

        let _ = tx
            .send(AgentEvent::ToolCallData {
                call_id: tc.id.clone(),
                phase: if output.is_error {
                    ToolDataPhase::Error
                } else {
                    ToolDataPhase::Result
                },
                data: output.payload.clone(),
            })
            .await;

        self.session.lock().await.add_message(Message::tool_result(
            &tc.id,
            &tc.function.name,
            output.payload_text(),
        ))?;

        let _ = tx
            .send(AgentEvent::ToolCallEnd {
                call_id: tc.id.clone(),
                name: tc.function.name.clone(),
                elapsed_ms,
                is_error: output.is_error,
            })
            .await;

        Ok(())
    }

    /// Generate a short title after the first substantive assistant message.
    /// Strictly best-effort: every failure is swallowed.
    async fn maybe_synthesize_title(&mut self, tx: &mpsc::Sender<AgentEvent>) {
        let seed = {
            let session = self.session.lock().await;
            if session.title.is_some() {
                return;
            }
            match session.messages.iter().find_map(|m| {
                (m.role == tern_model::Role::Assistant)
                    .then(|| m.as_text())
                    .flatten()
                    .filter(|t| !t.trim().is_empty())
                    .map(|t| t.to_string())
            }) {
                Some(t) => t,
                None => return,
            }
        };

        let req = CompletionRequest {
            messages: vec![
                Message::system(
                    "Generate a title for the conversation below. \
                     Respond with the title only, at most 10 words, no quotes.",
                ),
                Message::user(seed),
            ],
            tools: vec![],
            previous_response_id: None,
        };

        let mut stream = match self.provider.complete(req).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, "title synthesis failed");
                return;
            }
        };
        let mut title = String::new();
        while let Some(event) = stream.next().await {
            match event {
                Ok(StreamEvent::TextDelta(d)) => title.push_str(&d),
                Ok(StreamEvent::Done) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "title synthesis stream failed");
                    return;
                }
            }
        }

        let title = title.trim().trim_matches('"').trim().to_string();
        if title.is_empty() {
            return;
        }
        let title: String = title.chars().take(TITLE_MAX_CHARS).collect();
        if self.session.lock().await.set_title(&title).is_err() {
            return;
        }
        let _ = tx.send(AgentEvent::Title(title)).await;
    }
}

struct TurnOutcome {
    text: String,
    reasoning: Option<String>,
    response_id: Option<String>,
    tool_calls: Vec<tern_model::ToolCall>,
}

/// Enforce the system prompt policy at serialization time.
///
/// `system_prompt_file` is re-read fresh and the first message is replaced
/// (when it is a system message) or inserted.  A plain `system_prompt` is
/// inserted only when no system message exists yet.
pub fn apply_system_prompt(session: &mut Session, spec: &ModelSpec) {
    if let Some(file) = &spec.system_prompt_file {
        match std::fs::read_to_string(file) {
            Ok(text) => {
                match session.messages.first_mut() {
                    Some(first) if first.role == tern_model::Role::System => {
                        first.content = tern_model::MessageContent::Text(text);
                    }
                    _ => session.messages.insert(0, Message::system(text)),
                }
                return;
            }
            Err(e) => {
                warn!(file = %file, error = %e, "cannot read system_prompt_file");
            }
        }
    }
    if let Some(prompt) = &spec.system_prompt {
        let has_system = session
            .messages
            .first()
            .is_some_and(|m| m.role == tern_model::Role::System);
        if !has_system {
            session.messages.insert(0, Message::system(prompt.clone()));
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tern_model::{ScriptedProvider, ScriptedTurn};

    use super::*;

    fn spec() -> ModelSpec {
        ModelSpec {
            name: "test".into(),
            model_id: "scripted-model".into(),
            base_url: "http://localhost".into(),
            api_key: None,
            api_key_file: None,
            reasoning_effort: None,
            system_prompt: None,
            system_prompt_file: None,
            tool_name_allowlist: vec![],
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut reg = ToolRegistry::new();
        tern_tools::register_builtins(&mut reg);
        Arc::new(reg)
    }

    fn agent_with(turns: Vec<ScriptedTurn>) -> Agent {
        Agent::with_provider(
            spec(),
            Session::new_chat("test"),
            registry(),
            Box::new(ScriptedProvider::new(turns)),
        )
    }

    fn drain(mut rx: mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    // ── System prompt policy ──────────────────────────────────────────────────

    #[test]
    fn inline_system_prompt_inserted_once() {
        let mut session = Session::new_chat("m");
        let mut s = spec();
        s.system_prompt = Some("be terse".into());
        apply_system_prompt(&mut session, &s);
        apply_system_prompt(&mut session, &s);
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].role, tern_model::Role::System);
    }

    #[test]
    fn system_prompt_file_replaces_existing_system_message() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("prompt.txt");
        std::fs::write(&file, "v1").unwrap();
        let mut s = spec();
        s.system_prompt_file = Some(file.to_string_lossy().into_owned());

        let mut session = Session::new_chat("m");
        apply_system_prompt(&mut session, &s);
        assert_eq!(session.messages[0].as_text(), Some("v1"));

        std::fs::write(&file, "v2").unwrap();
        session.add_message(Message::user("hi")).unwrap();
        apply_system_prompt(&mut session, &s);
        assert_eq!(session.messages[0].as_text(), Some("v2"), "re-read fresh");
        assert_eq!(session.messages.len(), 2);
    }

    // ── The loop ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn plain_answer_returns_after_one_iteration() {
        let mut agent = agent_with(vec![ScriptedTurn::text("hello there")]);
        let (tx, rx) = mpsc::channel(256);
        let answer = agent.complete("hi", tx).await.unwrap();
        assert_eq!(answer, "hello there");

        let session = agent.session();
        let session = session.lock().await;
        assert_eq!(session.messages.len(), 2); // user + assistant
        drop(session);

        let events = drain(rx);
        assert!(matches!(events[0], AgentEvent::RequestStart { iteration: 0 }));
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::ResponseDone(t) if t == "hello there")));
    }

    #[tokio::test]
    async fn tool_call_turn_injects_tool_message_and_iterates() {
        let mut agent = agent_with(vec![
            ScriptedTurn::tool_call("c1", "read_lints", "{}"),
            ScriptedTurn::text("all clean"),
        ]);
        let (tx, rx) = mpsc::channel(256);
        let answer = agent.complete("check lints", tx).await.unwrap();
        assert_eq!(answer, "all clean");

        let session = agent.session();
        let session = session.lock().await;
        // user, assistant(tool_calls), tool, assistant(answer)
        assert_eq!(session.messages.len(), 4);
        assert_eq!(session.messages[1].tool_calls.as_ref().unwrap()[0].id, "c1");
        assert_eq!(session.messages[2].role, tern_model::Role::Tool);
        assert_eq!(
            session.messages[2].as_text(),
            Some("No linter errors found.")
        );
        drop(session);

        let events = drain(rx);
        let start_idx = events
            .iter()
            .position(|e| matches!(e, AgentEvent::ToolCallStart { .. }))
            .unwrap();
        let end_idx = events
            .iter()
            .position(|e| matches!(e, AgentEvent::ToolCallEnd { .. }))
            .unwrap();
        assert!(start_idx < end_idx);
        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::ToolCallData { phase: ToolDataPhase::Result, .. }
        )));
    }

    #[tokio::test]
    async fn unknown_tool_result_feeds_error_back_to_model() {
        let mut agent = agent_with(vec![
            ScriptedTurn::tool_call("c1", "no_such_tool", "{}"),
            ScriptedTurn::text("understood"),
        ]);
        let (tx, _rx) = mpsc::channel(256);
        let answer = agent.complete("go", tx).await.unwrap();
        assert_eq!(answer, "understood");
        let session = agent.session();
        let session = session.lock().await;
        let tool_msg = session.messages[2].as_text().unwrap();
        assert!(tool_msg.contains("unknown tool"));
        assert!(tool_msg.contains("\"success\":false"));
    }

    #[tokio::test]
    async fn cancellation_before_start_appends_nothing_new() {
        let mut agent = agent_with(vec![ScriptedTurn::text("never seen")]);
        agent.cancel_token().cancel();
        let (tx, _rx) = mpsc::channel(256);
        let err = agent.complete("hi", tx).await.unwrap_err();
        assert_eq!(err.to_string(), "Operation cancelled");
        let session = agent.session();
        let session = session.lock().await;
        // Only the user message was appended before the loop-head check.
        assert_eq!(session.messages.len(), 1);
    }

    #[tokio::test]
    async fn loop_is_bounded_by_max_iterations() {
        // A model that requests tools forever.
        let turns: Vec<ScriptedTurn> = (0..10)
            .map(|i| ScriptedTurn::tool_call(&format!("c{i}"), "read_lints", "{}"))
            .collect();
        let mut agent = agent_with(turns).with_max_iterations(3);
        let (tx, _rx) = mpsc::channel(4096);
        let result = agent.complete("loop forever", tx).await.unwrap();
        assert_eq!(result, "");
        let session = agent.session();
        let session = session.lock().await;
        // user + 3 × (assistant + tool)
        assert_eq!(session.messages.len(), 7);
    }

    #[tokio::test]
    async fn stale_response_id_cleared_and_retried_once() {
        let mut agent = agent_with(vec![
            ScriptedTurn::Error(
                "responses error 400: previous_response_id 'resp_stale' not found".into(),
            ),
            ScriptedTurn::Events(vec![
                StreamEvent::ResponseId("resp_fresh".into()),
                StreamEvent::TextDelta("recovered".into()),
                StreamEvent::Done,
            ]),
        ]);
        // Seed an assistant message owning the stale token.
        {
            let session = agent.session();
            let mut session = session.lock().await;
            let mut m = Message::assistant("earlier answer");
            m.response_id = Some("resp_stale".into());
            session.add_message(m).unwrap();
        }
        let (tx, _rx) = mpsc::channel(256);
        let answer = agent.complete("continue", tx).await.unwrap();
        assert_eq!(answer, "recovered");
        let session = agent.session();
        let session = session.lock().await;
        assert!(
            session.messages[0].response_id.is_none(),
            "stale token must be cleared from its owning message"
        );
        assert_eq!(session.last_response_id(), Some("resp_fresh"));
    }

    #[tokio::test]
    async fn title_synthesized_after_first_substantive_answer() {
        let mut agent = agent_with(vec![
            ScriptedTurn::text("the actual answer"),
            ScriptedTurn::text("Session Title Here"),
        ]);
        let (tx, rx) = mpsc::channel(256);
        agent.complete("hi", tx).await.unwrap();
        let session = agent.session();
        let session = session.lock().await;
        assert_eq!(session.title.as_deref(), Some("Session Title Here"));
        drop(session);
        assert!(drain(rx)
            .iter()
            .any(|e| matches!(e, AgentEvent::Title(t) if t == "Session Title Here")));
    }

    #[tokio::test]
    async fn title_failure_is_swallowed() {
        let mut agent = agent_with(vec![
            ScriptedTurn::text("answer"),
            ScriptedTurn::Error("title backend down".into()),
        ]);
        let (tx, _rx) = mpsc::channel(256);
        let answer = agent.complete("hi", tx).await.unwrap();
        assert_eq!(answer, "answer");
        let session = agent.session();
        assert!(session.lock().await.title.is_none());
    }

    #[tokio::test]
    async fn reasoning_events_precede_response_events() {
        let mut agent = agent_with(vec![ScriptedTurn::Events(vec![
            StreamEvent::ReasoningDelta("thinking ".into()),
            StreamEvent::ReasoningDelta("hard".into()),
            StreamEvent::TextDelta("answer".into()),
            StreamEvent::Done,
        ])]);
        let (tx, rx) = mpsc::channel(256);
        agent.complete("hi", tx).await.unwrap();

        let events = drain(rx);
        let r_start = events
            .iter()
            .position(|e| matches!(e, AgentEvent::ReasoningStart))
            .unwrap();
        let r_done = events
            .iter()
            .position(|e| matches!(e, AgentEvent::ReasoningDone(t) if t == "thinking hard"))
            .unwrap();
        let resp_start = events
            .iter()
            .position(|e| matches!(e, AgentEvent::ResponseStart))
            .unwrap();
        assert!(r_start < r_done && r_done < resp_start);

        let session = agent.session();
        let session = session.lock().await;
        assert_eq!(
            session.messages.last().unwrap().reasoning.as_deref(),
            Some("thinking hard")
        );
    }

    #[tokio::test]
    async fn usage_accumulates_across_iterations() {
        let mut agent = agent_with(vec![
            ScriptedTurn::Events(vec![
                StreamEvent::ToolCallDelta {
                    index: 0,
                    id: "c1".into(),
                    name: "read_lints".into(),
                    arguments: "{}".into(),
                    thought_signature: None,
                },
                StreamEvent::Usage(json!({ "prompt_tokens": 10, "completion_tokens": 2 })),
                StreamEvent::Done,
            ]),
            ScriptedTurn::Events(vec![
                StreamEvent::TextDelta("done".into()),
                StreamEvent::Usage(json!({ "prompt_tokens": 15, "completion_tokens": 4 })),
                StreamEvent::Done,
            ]),
        ]);
        let (tx, _rx) = mpsc::channel(256);
        agent.complete("go", tx).await.unwrap();
        assert_eq!(agent.usage()["prompt_tokens"], 25);
        assert_eq!(agent.usage()["completion_tokens"], 6);
    }

    #[tokio::test]
    async fn diff_side_effects_routed_into_session_not_payload() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "a\nb\n").unwrap();
        let args = json!({ "target_file": file.to_string_lossy() }).to_string();
        let mut agent = agent_with(vec![
            ScriptedTurn::tool_call("c_del", "delete_file", &args),
            ScriptedTurn::text("deleted"),
        ]);
        let (tx, _rx) = mpsc::channel(256);
        agent.complete("remove it", tx).await.unwrap();

        let session = agent.session();
        let session = session.lock().await;
        // The tool message the model sees carries only the payload.
        let tool_msg = session.messages[2].as_text().unwrap();
        assert!(!tool_msg.contains("---"), "diff must not reach the model");
        if let Some(d) = session.data.diffs.get("c_del") {
            assert_eq!(d.tool_name, "delete_file");
        }
    }
}
