// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenAI `/responses` dialect.
//!
//! Selected for `gpt-4o*`, `gpt-4-turbo*`, and every GPT with a major
//! version above 4.  The server issues a continuation token (`response.id`)
//! after each turn; the next turn sends `previous_response_id` plus only the
//! input items that appeared *after* the message owning that token, instead
//! of replaying the whole history.
//!
//! Continuation tokens expire server-side.  A request that references a
//! stale token fails with 404 / "not found" / "unknown parameter
//! previous_response_id"; [`is_stale_response_id_error`] classifies those so
//! the agent loop can clear the stored token and retry once with full
//! history.

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use tern_config::ModelSpec;

use crate::{
    provider::ResponseStream, sse, CompletionRequest, Message, Role, StreamEvent,
};

pub struct ResponsesProvider {
    spec: ModelSpec,
    client: reqwest::Client,
}

impl ResponsesProvider {
    pub fn new(spec: ModelSpec) -> Self {
        Self {
            spec,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::Provider for ResponsesProvider {
    fn name(&self) -> &str {
        "responses"
    }

    fn model_id(&self) -> &str {
        &self.spec.model_id
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let key = self
            .spec
            .resolve_api_key()
            .context("API key not set; provide api_key, api_key_file, or OPENAI_API_KEY")?;

        let (input, continued_from) =
            build_responses_input(&req.messages, req.previous_response_id.as_deref());

        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                    "strict": false,
                })
            })
            .collect();

        let input_items = input.len();
        let mut body = json!({
            "model": self.spec.model_id,
            "input": input,
            "stream": true,
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }
        if let Some(prev) = &continued_from {
            body["previous_response_id"] = json!(prev);
        }
        if let Some(effort) = self.spec.reasoning_effort {
            // The responses dialect has no "on" tier; treat it as high.
            let effort = match effort {
                tern_config::ReasoningEffort::On => "high",
                e => e.as_str(),
            };
            body["reasoning"] = json!({ "effort": effort });
        }

        debug!(
            model = %self.spec.model_id,
            input_items,
            continued = continued_from.is_some(),
            "sending responses request"
        );

        let url = format!("{}/responses", self.spec.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&key)
            .json(&body)
            .send()
            .await
            .context("responses request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("responses error {status}: {text}");
        }

        let events = sse::data_payload_stream(resp)
            .map(|payload| match payload {
                Ok(data) => parse_responses_payload(&data),
                Err(e) => vec![Err(e)],
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(events))
    }
}

/// True when `err` reports a stale `previous_response_id` continuation token.
pub fn is_stale_response_id_error(err: &anyhow::Error) -> bool {
    let msg = format!("{err:#}").to_ascii_lowercase();
    if msg.contains("error 404") {
        return true;
    }
    msg.contains("previous_response_id")
        && (msg.contains("not found") || msg.contains("unknown parameter"))
}

/// Build the typed `input[]` array.
///
/// When `previous_response_id` matches an assistant message's stored token,
/// only the messages *after* it are converted and the token is returned for
/// the `previous_response_id` body field.  When no message carries the token
/// (or none was given) the full history is sent and no token is attached.
pub(crate) fn build_responses_input(
    messages: &[Message],
    previous_response_id: Option<&str>,
) -> (Vec<Value>, Option<String>) {
    let start = previous_response_id.and_then(|prev| {
        messages
            .iter()
            .position(|m| m.response_id.as_deref() == Some(prev))
            .map(|i| i + 1)
    });

    let slice = match start {
        Some(i) => &messages[i..],
        None => messages,
    };

    let mut input = Vec::new();
    for m in slice {
        match m.role {
            Role::System | Role::User => {
                input.push(json!({
                    "role": role_str(&m.role),
                    "content": m.content.to_wire_text(),
                }));
            }
            Role::Assistant => {
                let text = m.content.to_wire_text();
                if !text.is_empty() {
                    input.push(json!({ "role": "assistant", "content": text }));
                }
                if let Some(tcs) = &m.tool_calls {
                    for tc in tcs {
                        input.push(json!({
                            "type": "function_call",
                            "call_id": tc.id,
                            "name": tc.function.name,
                            "arguments": tc.function.arguments,
                        }));
                    }
                }
            }
            Role::Tool => {
                input.push(json!({
                    "type": "function_call_output",
                    "call_id": m.tool_call_id.as_deref().unwrap_or(""),
                    "output": m.content.to_wire_text(),
                }));
            }
        }
    }

    (
        input,
        start.and(previous_response_id.map(str::to_string)),
    )
}

fn role_str(r: &Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn parse_responses_payload(data: &str) -> Vec<anyhow::Result<StreamEvent>> {
    if data == "[DONE]" {
        // The responses stream signals completion via response.completed;
        // some gateways still append the chat-style sentinel.
        return vec![Ok(StreamEvent::Done)];
    }
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(_) => return vec![],
    };
    parse_responses_event(&v).into_iter().map(Ok).collect()
}

/// Map one decoded responses SSE event to stream events by its `type` field.
pub(crate) fn parse_responses_event(v: &Value) -> Vec<StreamEvent> {
    let kind = v["type"].as_str().unwrap_or("");
    match kind {
        "response.created" => {
            let id = v["response"]["id"].as_str().unwrap_or("");
            if id.is_empty() {
                vec![]
            } else {
                vec![StreamEvent::ResponseId(id.to_string())]
            }
        }
        "response.output_text.delta" => {
            let delta = v["delta"].as_str().unwrap_or("");
            vec![StreamEvent::TextDelta(delta.to_string())]
        }
        "response.reasoning_summary_text.delta" | "response.reasoning_text.delta" => {
            let delta = v["delta"].as_str().unwrap_or("");
            vec![StreamEvent::ReasoningDelta(delta.to_string())]
        }
        "response.output_item.added" => {
            let item = &v["item"];
            if item["type"].as_str() == Some("function_call") {
                vec![StreamEvent::ToolCallDelta {
                    index: v["output_index"].as_u64().unwrap_or(0) as u32,
                    id: item["call_id"].as_str().unwrap_or("").to_string(),
                    name: item["name"].as_str().unwrap_or("").to_string(),
                    arguments: item["arguments"].as_str().unwrap_or("").to_string(),
                    thought_signature: None,
                }]
            } else {
                vec![]
            }
        }
        "response.function_call_arguments.delta" => {
            vec![StreamEvent::ToolCallDelta {
                index: v["output_index"].as_u64().unwrap_or(0) as u32,
                id: String::new(),
                name: String::new(),
                arguments: v["delta"].as_str().unwrap_or("").to_string(),
                thought_signature: None,
            }]
        }
        "response.completed" => {
            let mut events = Vec::new();
            if let Some(id) = v["response"]["id"].as_str() {
                events.push(StreamEvent::ResponseId(id.to_string()));
            }
            if let Some(usage) = v["response"].get("usage").filter(|u| !u.is_null()) {
                events.push(StreamEvent::Usage(usage.clone()));
            }
            events.push(StreamEvent::Done);
            events
        }
        "response.failed" | "error" => {
            let msg = v["response"]["error"]["message"]
                .as_str()
                .or_else(|| v["message"].as_str())
                .unwrap_or("response failed");
            vec![StreamEvent::Error(msg.to_string())]
        }
        _ => vec![],
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ToolCall;

    fn history_with_token(token: &str) -> Vec<Message> {
        let mut assistant = Message::assistant("first answer");
        assistant.response_id = Some(token.to_string());
        vec![
            Message::system("sys"),
            Message::user("question"),
            assistant,
            Message::user("follow-up"),
        ]
    }

    // ── Input building / continuation ─────────────────────────────────────────

    #[test]
    fn full_history_sent_when_no_token() {
        let (input, prev) = build_responses_input(&history_with_token("resp_1"), None);
        assert_eq!(input.len(), 4);
        assert!(prev.is_none());
    }

    #[test]
    fn continuation_sends_only_new_items() {
        let (input, prev) = build_responses_input(&history_with_token("resp_1"), Some("resp_1"));
        assert_eq!(prev.as_deref(), Some("resp_1"));
        assert_eq!(input.len(), 1, "only the follow-up should be sent");
        assert_eq!(input[0]["content"], "follow-up");
    }

    #[test]
    fn unknown_token_falls_back_to_full_history() {
        let (input, prev) = build_responses_input(&history_with_token("resp_1"), Some("resp_9"));
        assert_eq!(input.len(), 4);
        assert!(prev.is_none(), "token without an owning message must not be sent");
    }

    #[test]
    fn tool_calls_become_function_call_items() {
        let mut assistant = Message::assistant("");
        assistant.tool_calls = Some(vec![ToolCall::new("c1", "rg", r#"{"pattern":"x"}"#)]);
        let msgs = vec![
            Message::user("u"),
            assistant,
            Message::tool_result("c1", "rg", "found"),
        ];
        let (input, _) = build_responses_input(&msgs, None);
        assert_eq!(input[1]["type"], "function_call");
        assert_eq!(input[1]["call_id"], "c1");
        assert_eq!(input[2]["type"], "function_call_output");
        assert_eq!(input[2]["output"], "found");
    }

    #[test]
    fn assistant_with_text_and_tool_calls_emits_both_items() {
        let mut assistant = Message::assistant("let me check");
        assistant.tool_calls = Some(vec![ToolCall::new("c1", "list_dir", "{}")]);
        let (input, _) = build_responses_input(&[assistant], None);
        assert_eq!(input.len(), 2);
        assert_eq!(input[0]["role"], "assistant");
        assert_eq!(input[1]["type"], "function_call");
    }

    // ── Event parsing ─────────────────────────────────────────────────────────

    #[test]
    fn created_event_yields_response_id() {
        let ev = parse_responses_event(&json!({
            "type": "response.created",
            "response": { "id": "resp_abc" }
        }));
        assert!(matches!(&ev[0], StreamEvent::ResponseId(id) if id == "resp_abc"));
    }

    #[test]
    fn output_text_delta_parsed() {
        let ev = parse_responses_event(&json!({
            "type": "response.output_text.delta",
            "delta": "hel"
        }));
        assert!(matches!(&ev[0], StreamEvent::TextDelta(t) if t == "hel"));
    }

    #[test]
    fn reasoning_summary_delta_parsed() {
        let ev = parse_responses_event(&json!({
            "type": "response.reasoning_summary_text.delta",
            "delta": "consider"
        }));
        assert!(matches!(&ev[0], StreamEvent::ReasoningDelta(t) if t == "consider"));
    }

    #[test]
    fn function_call_item_added_starts_tool_call() {
        let ev = parse_responses_event(&json!({
            "type": "response.output_item.added",
            "output_index": 1,
            "item": { "type": "function_call", "call_id": "c9", "name": "rg", "arguments": "" }
        }));
        assert!(matches!(
            &ev[0],
            StreamEvent::ToolCallDelta { index: 1, id, name, .. } if id == "c9" && name == "rg"
        ));
    }

    #[test]
    fn non_function_item_added_is_ignored() {
        let ev = parse_responses_event(&json!({
            "type": "response.output_item.added",
            "output_index": 0,
            "item": { "type": "message" }
        }));
        assert!(ev.is_empty());
    }

    #[test]
    fn arguments_delta_routed_by_output_index() {
        let ev = parse_responses_event(&json!({
            "type": "response.function_call_arguments.delta",
            "output_index": 2,
            "delta": "{\"pat"
        }));
        assert!(matches!(
            &ev[0],
            StreamEvent::ToolCallDelta { index: 2, arguments, .. } if arguments == "{\"pat"
        ));
    }

    #[test]
    fn completed_event_yields_id_usage_and_done() {
        let ev = parse_responses_event(&json!({
            "type": "response.completed",
            "response": {
                "id": "resp_2",
                "usage": { "input_tokens": 11, "output_tokens": 3 }
            }
        }));
        assert_eq!(ev.len(), 3);
        assert!(matches!(&ev[0], StreamEvent::ResponseId(id) if id == "resp_2"));
        assert!(matches!(&ev[1], StreamEvent::Usage(u) if u["input_tokens"] == 11));
        assert!(matches!(ev[2], StreamEvent::Done));
    }

    #[test]
    fn failed_event_becomes_stream_error() {
        let ev = parse_responses_event(&json!({
            "type": "response.failed",
            "response": { "error": { "message": "boom" } }
        }));
        assert!(matches!(&ev[0], StreamEvent::Error(m) if m == "boom"));
    }

    // ── Stale-token classification ────────────────────────────────────────────

    #[test]
    fn http_404_is_stale() {
        let err = anyhow::anyhow!("responses error 404 Not Found: {{}}");
        assert!(is_stale_response_id_error(&err));
    }

    #[test]
    fn unknown_parameter_previous_response_id_is_stale() {
        let err = anyhow::anyhow!(
            "responses error 400 Bad Request: {{\"error\":{{\"message\":\"Unknown parameter previous_response_id\"}}}}"
        );
        assert!(is_stale_response_id_error(&err));
    }

    #[test]
    fn previous_response_not_found_is_stale() {
        let err = anyhow::anyhow!(
            "responses error 400: previous_response_id 'resp_x' not found"
        );
        assert!(is_stale_response_id_error(&err));
    }

    #[test]
    fn unrelated_errors_are_not_stale() {
        assert!(!is_stale_response_id_error(&anyhow::anyhow!(
            "responses error 429 Too Many Requests: rate limited"
        )));
        assert!(!is_stale_response_id_error(&anyhow::anyhow!(
            "responses error 500: internal"
        )));
    }
}
