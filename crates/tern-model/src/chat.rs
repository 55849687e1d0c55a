// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenAI-style `/chat/completions` dialect — the default for every model id
//! that is neither a Gemini family member nor a responses-dialect GPT.
//!
//! The same wire format is spoken by dozens of OpenAI-compatible servers
//! (vLLM, llama.cpp, Groq, DeepSeek, …), so this driver makes no assumptions
//! beyond the standard schema.

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use tern_config::ModelSpec;

use crate::{
    provider::ResponseStream, sse, CompletionRequest, Message, MessageContent, Role, StreamEvent,
};

pub struct ChatProvider {
    spec: ModelSpec,
    client: reqwest::Client,
}

impl ChatProvider {
    pub fn new(spec: ModelSpec) -> Self {
        Self {
            spec,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::Provider for ChatProvider {
    fn name(&self) -> &str {
        "chat"
    }

    fn model_id(&self) -> &str {
        &self.spec.model_id
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let key = self
            .spec
            .resolve_api_key()
            .context("API key not set; provide api_key, api_key_file, or OPENAI_API_KEY")?;

        let messages = build_chat_messages(&req.messages);
        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.spec.model_id,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(
            model = %self.spec.model_id,
            message_count = req.messages.len(),
            tool_count = req.tools.len(),
            "sending chat completion request"
        );

        let url = format!(
            "{}/chat/completions",
            self.spec.base_url.trim_end_matches('/')
        );
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&key)
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("chat completions error {status}: {text}");
        }

        let events = sse::data_payload_stream(resp)
            .map(|payload| match payload {
                Ok(data) => parse_chat_payload(&data),
                Err(e) => vec![Err(e)],
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(events))
    }
}

fn role_str(r: &Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Convert the uniform history into the chat-completions wire array.
///
/// Extracted as a free function so it can be unit-tested without HTTP.
pub(crate) fn build_chat_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut v = json!({
                "role": role_str(&m.role),
                "content": match &m.content {
                    MessageContent::Text(t) => t.clone(),
                    block => block.to_wire_text(),
                },
            });
            if let Some(tcs) = &m.tool_calls {
                let calls: Vec<Value> = tcs
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.function.name,
                                "arguments": tc.function.arguments,
                            }
                        })
                    })
                    .collect();
                v["tool_calls"] = json!(calls);
            }
            if let Some(call_id) = &m.tool_call_id {
                v["tool_call_id"] = json!(call_id);
                if let Some(name) = &m.name {
                    v["name"] = json!(name);
                }
            }
            v
        })
        .collect()
}

/// Parse one complete SSE data payload into events.
fn parse_chat_payload(data: &str) -> Vec<anyhow::Result<StreamEvent>> {
    if data == "[DONE]" {
        return vec![Ok(StreamEvent::Done)];
    }
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(_) => return vec![],
    };
    parse_chat_chunk(&v).into_iter().map(Ok).collect()
}

/// Parse one decoded chunk object.
///
/// A chunk is either a usage-only record (emitted last when
/// `stream_options.include_usage` is on) or a delta carrying text, reasoning
/// (`reasoning_content` / `reasoning`), or tool-call fragments.
pub(crate) fn parse_chat_chunk(v: &Value) -> Vec<StreamEvent> {
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        return vec![StreamEvent::Usage(usage.clone())];
    }

    let delta = &v["choices"][0]["delta"];
    let mut events = Vec::new();

    if let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
        for tc in tool_calls {
            events.push(StreamEvent::ToolCallDelta {
                index: tc["index"].as_u64().unwrap_or(0) as u32,
                id: tc["id"].as_str().unwrap_or("").to_string(),
                name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: tc["function"]["arguments"]
                    .as_str()
                    .unwrap_or("")
                    .to_string(),
                thought_signature: None,
            });
        }
        if !events.is_empty() {
            return events;
        }
    }

    // Reasoning delta: `reasoning_content` (llama.cpp, DeepSeek) with
    // `reasoning` (OpenRouter) as the fallback name.
    let reasoning = delta
        .get("reasoning_content")
        .and_then(|c| c.as_str())
        .or_else(|| delta.get("reasoning").and_then(|c| c.as_str()));
    if let Some(r) = reasoning {
        if !r.is_empty() {
            return vec![StreamEvent::ReasoningDelta(r.to_string())];
        }
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            return vec![StreamEvent::TextDelta(text.to_string())];
        }
    }

    vec![]
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{ContentBlock, ToolCall};

    // ── Wire-format building ──────────────────────────────────────────────────

    #[test]
    fn text_messages_serialize_with_roles() {
        let msgs = vec![
            Message::system("sys"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let wire = build_chat_messages(&msgs);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[1]["content"], "hi");
        assert_eq!(wire[2]["role"], "assistant");
    }

    #[test]
    fn assistant_tool_calls_serialized_as_array() {
        let mut m = Message::assistant("");
        m.tool_calls = Some(vec![
            ToolCall::new("c1", "list_dir", r#"{"target_directory":"."}"#),
            ToolCall::new("c2", "read_lints", "{}"),
        ]);
        let wire = build_chat_messages(&[m]);
        let calls = wire[0]["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0]["id"], "c1");
        assert_eq!(calls[1]["function"]["name"], "read_lints");
    }

    #[test]
    fn tool_result_carries_call_id_and_name() {
        let wire = build_chat_messages(&[Message::tool_result("c1", "rg", "found 2")]);
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[0]["tool_call_id"], "c1");
        assert_eq!(wire[0]["name"], "rg");
        assert_eq!(wire[0]["content"], "found 2");
    }

    #[test]
    fn content_blocks_render_as_wire_text() {
        let m = Message::user_block(ContentBlock::ImagePrompt {
            prompt: "draw a tern".into(),
            images: vec![],
            reference_image_ids: vec![],
        });
        let wire = build_chat_messages(&[m]);
        assert_eq!(wire[0]["content"], "draw a tern");
    }

    // ── Chunk parsing ─────────────────────────────────────────────────────────

    #[test]
    fn text_delta_parsed() {
        let ev = parse_chat_chunk(&json!({
            "choices": [{ "delta": { "content": "hello" } }]
        }));
        assert!(matches!(&ev[0], StreamEvent::TextDelta(t) if t == "hello"));
    }

    #[test]
    fn empty_delta_produces_no_events() {
        assert!(parse_chat_chunk(&json!({ "choices": [{ "delta": {} }] })).is_empty());
    }

    #[test]
    fn reasoning_content_parsed_as_reasoning_delta() {
        let ev = parse_chat_chunk(&json!({
            "choices": [{ "delta": { "content": "", "reasoning_content": "thinking" } }]
        }));
        assert!(matches!(&ev[0], StreamEvent::ReasoningDelta(t) if t == "thinking"));
    }

    #[test]
    fn openrouter_reasoning_field_is_fallback() {
        let ev = parse_chat_chunk(&json!({
            "choices": [{ "delta": { "reasoning": "hmm" } }]
        }));
        assert!(matches!(&ev[0], StreamEvent::ReasoningDelta(t) if t == "hmm"));
    }

    #[test]
    fn tool_call_delta_parsed_with_index() {
        let ev = parse_chat_chunk(&json!({
            "choices": [{
                "delta": {
                    "tool_calls": [{
                        "index": 2,
                        "id": "call_x",
                        "function": { "name": "rg", "arguments": "" }
                    }]
                }
            }]
        }));
        assert!(matches!(
            &ev[0],
            StreamEvent::ToolCallDelta { index: 2, id, name, .. }
                if id == "call_x" && name == "rg"
        ));
    }

    #[test]
    fn parallel_tool_calls_in_one_chunk_all_emitted() {
        let ev = parse_chat_chunk(&json!({
            "choices": [{
                "delta": {
                    "tool_calls": [
                        { "index": 0, "id": "a", "function": { "name": "f", "arguments": "" } },
                        { "index": 1, "id": "b", "function": { "name": "g", "arguments": "" } }
                    ]
                }
            }]
        }));
        assert_eq!(ev.len(), 2);
    }

    #[test]
    fn usage_chunk_preserves_prompt_completion_shape() {
        let ev = parse_chat_chunk(&json!({
            "usage": { "prompt_tokens": 100, "completion_tokens": 50 }
        }));
        match &ev[0] {
            StreamEvent::Usage(u) => {
                assert_eq!(u["prompt_tokens"], 100);
                assert_eq!(u["completion_tokens"], 50);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn null_usage_falls_through_to_delta() {
        let ev = parse_chat_chunk(&json!({
            "usage": null,
            "choices": [{ "delta": { "content": "hi" } }]
        }));
        assert!(matches!(&ev[0], StreamEvent::TextDelta(t) if t == "hi"));
    }

    #[test]
    fn done_sentinel_maps_to_done_event() {
        let ev = parse_chat_payload("[DONE]");
        assert!(matches!(ev[0], Ok(StreamEvent::Done)));
    }

    #[test]
    fn unparseable_payload_is_skipped() {
        assert!(parse_chat_payload("not json").is_empty());
    }
}
