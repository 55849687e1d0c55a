// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Google Gemini dialect — native Generative Language API.
//!
//! Uses `streamGenerateContent?alt=sse` for conversation turns and
//! `generateContent` for one-shot image generation.
//!
//! # thoughtSignature
//! Gemini attaches an opaque signature to each streamed `functionCall` part
//! and requires it back verbatim when the call is replayed in history.  The
//! signature is treated as a capability: it is never inspected, and when a
//! replayed call lacks one (history imported from another dialect, older
//! session files) the call degrades to a plain-text placeholder part rather
//! than an invalid tool part the API would reject.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use tern_config::{ModelSpec, ReasoningEffort};

use crate::{
    provider::ResponseStream, sse, CompletionRequest, Message, Role, StreamEvent, ToolSchema,
};

/// Tool names that select Gemini built-in tools instead of function
/// declarations.  The API rejects requests mixing the two.
const BUILTIN_TOOLS: &[&str] = &["googleSearch", "codeExecution"];

pub struct GeminiProvider {
    spec: ModelSpec,
    client: reqwest::Client,
}

/// Result of a one-shot image generation call.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub data_b64: String,
    /// Any text the model produced alongside the image.
    pub text: Option<String>,
    /// The full model message, kept for generation-history replay.
    pub raw_model_message: Value,
}

impl GeminiProvider {
    pub fn new(spec: ModelSpec) -> Self {
        Self {
            spec,
            client: reqwest::Client::new(),
        }
    }

    fn api_key(&self) -> anyhow::Result<String> {
        self.spec
            .resolve_api_key()
            .context("API key not set; provide api_key, api_key_file, or GEMINI_API_KEY")
    }

    /// One-shot image generation: a single `generateContent` call with image
    /// response modality.  Reference images are passed as inline data parts
    /// ahead of the prompt.
    pub async fn generate_image(
        &self,
        prompt: &str,
        reference_images: &[(String, String)], // (mime_type, base64)
    ) -> anyhow::Result<GeneratedImage> {
        let key = self.api_key()?;

        let mut parts: Vec<Value> = reference_images
            .iter()
            .map(|(mime, data)| {
                json!({ "inlineData": { "mimeType": mime, "data": data } })
            })
            .collect();
        parts.push(json!({ "text": prompt }));

        let body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
        });

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.spec.base_url.trim_end_matches('/'),
            self.spec.model_id
        );

        debug!(model = %self.spec.model_id, "sending Gemini image generation request");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &key)
            .json(&body)
            .send()
            .await
            .context("Gemini image generation request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Gemini error {status}: {text}");
        }

        let v: Value = resp.json().await.context("decoding Gemini response")?;
        let content = v["candidates"][0]["content"].clone();
        let empty = vec![];
        let parts = content["parts"].as_array().unwrap_or(&empty);

        let mut image: Option<(String, String)> = None;
        let mut text_out: Option<String> = None;
        for part in parts {
            if let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) {
                let mime = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("image/png");
                if let Some(data) = inline["data"].as_str() {
                    image = Some((mime.to_string(), data.to_string()));
                }
            } else if let Some(t) = part["text"].as_str() {
                text_out = Some(t.to_string());
            }
        }

        let (mime_type, data_b64) =
            image.context("Gemini response contained no image data")?;
        Ok(GeneratedImage {
            mime_type,
            data_b64,
            text: text_out,
            raw_model_message: content,
        })
    }
}

#[async_trait]
impl crate::Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model_id(&self) -> &str {
        &self.spec.model_id
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let key = self.api_key()?;

        let (system_parts, contents) = build_gemini_contents(&req.messages);

        let mut body = json!({ "contents": contents });
        if !system_parts.is_empty() {
            body["systemInstruction"] = json!({ "parts": system_parts });
        }
        if let Some(tools) = build_gemini_tools(&req.tools) {
            body["tools"] = tools;
        }
        let mut generation_config = json!({});
        if let Some(thinking) = thinking_config(&self.spec.model_id, self.spec.reasoning_effort) {
            generation_config["thinkingConfig"] = thinking;
        }
        if generation_config.as_object().is_some_and(|o| !o.is_empty()) {
            body["generationConfig"] = generation_config;
        }

        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.spec.base_url.trim_end_matches('/'),
            self.spec.model_id
        );

        debug!(
            model = %self.spec.model_id,
            message_count = req.messages.len(),
            "sending Gemini request"
        );

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &key)
            .json(&body)
            .send()
            .await
            .context("Gemini request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Gemini error {status}: {text}");
        }

        // Gemini has no parallel-call index; assign one per functionCall part
        // in arrival order so the accumulator keeps the calls separate.
        let events = sse::data_payload_stream(resp)
            .scan(0u32, |fc_counter, payload| {
                let items: Vec<anyhow::Result<StreamEvent>> = match payload {
                    Ok(data) => {
                        if data == "[DONE]" {
                            vec![Ok(StreamEvent::Done)]
                        } else {
                            match serde_json::from_str::<Value>(&data) {
                                Ok(v) => parse_gemini_chunk(&v, fc_counter)
                                    .into_iter()
                                    .map(Ok)
                                    .collect(),
                                Err(_) => vec![],
                            }
                        }
                    }
                    Err(e) => vec![Err(e)],
                };
                std::future::ready(Some(items))
            })
            .flat_map(futures::stream::iter)
            .chain(futures::stream::once(async { Ok(StreamEvent::Done) }));

        Ok(Box::pin(events))
    }
}

/// Map the catalog reasoning effort to Gemini `thinkingConfig`.
///
/// Gemini-3 models take a discrete `thinkingLevel`; MEDIUM exists only on
/// Flash, so Pro rounds `medium` up to HIGH.  Older models take a numeric
/// `thinkingBudget`: 64/256/1024 tokens for low/medium/high and -1 (dynamic)
/// for `on`.
pub(crate) fn thinking_config(
    model_id: &str,
    effort: Option<ReasoningEffort>,
) -> Option<Value> {
    let effort = effort?;
    let id = model_id.to_ascii_lowercase();
    if id.contains("gemini-3") {
        let level = match effort {
            ReasoningEffort::Minimal => "MINIMAL",
            ReasoningEffort::Low => "LOW",
            ReasoningEffort::Medium => {
                if id.contains("flash") {
                    "MEDIUM"
                } else {
                    "HIGH"
                }
            }
            ReasoningEffort::High | ReasoningEffort::On => "HIGH",
        };
        Some(json!({ "thinkingLevel": level }))
    } else {
        let budget = match effort {
            ReasoningEffort::Minimal | ReasoningEffort::Low => 64,
            ReasoningEffort::Medium => 256,
            ReasoningEffort::High => 1024,
            ReasoningEffort::On => -1,
        };
        Some(json!({ "thinkingBudget": budget }))
    }
}

/// Translate tool schemas into the Gemini `tools` section.
///
/// Built-in tool names become their empty-object selectors; they must never
/// be mixed with function declarations in one request, so when both are
/// present the built-ins win and the declarations are dropped with a warning.
pub(crate) fn build_gemini_tools(tools: &[ToolSchema]) -> Option<Value> {
    if tools.is_empty() {
        return None;
    }
    let builtins: Vec<&ToolSchema> = tools
        .iter()
        .filter(|t| BUILTIN_TOOLS.contains(&t.name.as_str()))
        .collect();
    if !builtins.is_empty() {
        if builtins.len() != tools.len() {
            warn!(
                dropped = tools.len() - builtins.len(),
                "Gemini forbids mixing built-in tools with function declarations; \
                 dropping function declarations"
            );
        }
        let entries: Vec<Value> = builtins
            .iter()
            .map(|t| json!({ t.name.clone(): {} }))
            .collect();
        return Some(json!(entries));
    }
    let declarations: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters,
            })
        })
        .collect();
    Some(json!([{ "functionDeclarations": declarations }]))
}

/// Convert the uniform history into (`systemInstruction` parts, `contents`).
///
/// Tool results are matched to calls by *function name* (Gemini ignores the
/// opaque call id), so a `tool_call_id → name` map is built first.  Calls
/// replayed without a `thoughtSignature` degrade to text placeholders, and
/// their results follow as plain user text.
pub(crate) fn build_gemini_contents(messages: &[Message]) -> (Vec<Value>, Vec<Value>) {
    let mut tc_names: HashMap<String, String> = HashMap::new();
    for m in messages {
        if let Some(tcs) = &m.tool_calls {
            for tc in tcs {
                tc_names.insert(tc.id.clone(), tc.function.name.clone());
            }
        }
    }

    let mut system_parts: Vec<Value> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();
    // Call ids degraded to text placeholders; their results degrade too.
    let mut degraded: HashSet<String> = HashSet::new();

    for m in messages {
        match m.role {
            Role::System => {
                let t = m.content.to_wire_text();
                if !t.is_empty() {
                    system_parts.push(json!({ "text": t }));
                }
            }
            Role::User => {
                contents.push(json!({
                    "role": "user",
                    "parts": [{ "text": m.content.to_wire_text() }],
                }));
            }
            Role::Assistant => {
                let mut parts: Vec<Value> = Vec::new();
                let text = m.content.to_wire_text();
                if !text.is_empty() {
                    parts.push(json!({ "text": text }));
                }
                if let Some(tcs) = &m.tool_calls {
                    for tc in tcs {
                        let args: Value =
                            serde_json::from_str(&tc.function.arguments).unwrap_or(json!({}));
                        match &tc.thought_signature {
                            Some(sig) => parts.push(json!({
                                "functionCall": { "name": tc.function.name, "args": args },
                                "thoughtSignature": sig,
                            })),
                            None => {
                                degraded.insert(tc.id.clone());
                                parts.push(json!({
                                    "text": format!(
                                        "[called {}({})]",
                                        tc.function.name, tc.function.arguments
                                    ),
                                }));
                            }
                        }
                    }
                }
                if parts.is_empty() {
                    parts.push(json!({ "text": "" }));
                }
                contents.push(json!({ "role": "model", "parts": parts }));
            }
            Role::Tool => {
                let call_id = m.tool_call_id.as_deref().unwrap_or("");
                let output = m.content.to_wire_text();
                let part = if degraded.contains(call_id) {
                    let name = tc_names
                        .get(call_id)
                        .map(String::as_str)
                        .or(m.name.as_deref())
                        .unwrap_or(call_id);
                    json!({ "text": format!("[{name} result]\n{output}") })
                } else {
                    let name = tc_names
                        .get(call_id)
                        .map(String::as_str)
                        .or(m.name.as_deref())
                        .unwrap_or(call_id);
                    json!({
                        "functionResponse": {
                            "name": name,
                            "response": { "output": output },
                        }
                    })
                };
                contents.push(json!({ "role": "user", "parts": [part] }));
            }
        }
    }

    (system_parts, contents)
}

/// Parse one decoded stream chunk.  `fc_counter` assigns a fresh index to
/// each `functionCall` part so parallel calls accumulate separately.
pub(crate) fn parse_gemini_chunk(v: &Value, fc_counter: &mut u32) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    if let Some(meta) = v.get("usageMetadata") {
        events.push(StreamEvent::Usage(meta.clone()));
    }

    let candidate = &v["candidates"][0];
    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for part in parts {
            if part.get("thought").and_then(|t| t.as_bool()) == Some(true) {
                if let Some(text) = part["text"].as_str() {
                    events.push(StreamEvent::ReasoningDelta(text.to_string()));
                }
                continue;
            }
            if let Some(fc) = part.get("functionCall") {
                let name = fc["name"].as_str().unwrap_or("").to_string();
                let args = serde_json::to_string(&fc["args"]).unwrap_or_default();
                let signature = part
                    .get("thoughtSignature")
                    .and_then(|s| s.as_str())
                    .map(str::to_string);
                let index = *fc_counter;
                *fc_counter += 1;
                events.push(StreamEvent::ToolCallDelta {
                    index,
                    id: name.clone(),
                    name,
                    arguments: args,
                    thought_signature: signature,
                });
                continue;
            }
            if let Some(text) = part["text"].as_str() {
                if !text.is_empty() {
                    events.push(StreamEvent::TextDelta(text.to_string()));
                }
            }
        }
    }

    events
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
