use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A structured content block for the image/video generation flows.
///
/// Asset payloads are never embedded here — blocks reference records in the
/// session's asset maps by id.  The reachability sweep in `tern-session`
/// walks exactly these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    ImagePrompt {
        prompt: String,
        /// Generated image ids produced for this prompt.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<String>,
        /// Reference image ids the user attached to the prompt.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        reference_image_ids: Vec<String>,
    },
    Image {
        id: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        reference_images: Vec<String>,
    },
    VideoPrompt {
        prompt: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<String>,
    },
    Video {
        id: String,
    },
}

/// Message content: plain text for conversation turns, a structured block
/// for generation flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Block(ContentBlock),
}

impl MessageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::Block(_) => None,
        }
    }

    /// Best-effort text rendering for wire formats that only carry text.
    /// Prompts render as their prompt; finished assets render as a reference.
    pub fn to_wire_text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Block(ContentBlock::ImagePrompt { prompt, .. })
            | Self::Block(ContentBlock::VideoPrompt { prompt, .. }) => prompt.clone(),
            Self::Block(ContentBlock::Image { id, .. }) => format!("[image {id}]"),
            Self::Block(ContentBlock::Video { id }) => format!("[video {id}]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object (accumulated across streaming deltas).
    pub arguments: String,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
    /// Opaque Gemini capability token; reserialized verbatim on replay.
    #[serde(
        rename = "thoughtSignature",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub thought_signature: Option<String>,
}

fn function_kind() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
            thought_signature: None,
        }
    }
}

/// One message in the conversation history.  This struct is also the
/// persisted session format, so optional fields are omitted from JSON when
/// absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Reasoning text the model produced before the answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Continuation token from the responses dialect.  Cleared when the
    /// server reports it stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    /// Set on `role: tool` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name, set on `role: tool` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
            tool_calls: None,
            reasoning: None,
            response_id: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    pub fn user_block(block: ContentBlock) -> Self {
        Self {
            content: MessageContent::Block(block),
            ..Self::text(Role::User, "")
        }
    }

    pub fn assistant_block(block: ContentBlock) -> Self {
        Self {
            content: MessageContent::Block(block),
            ..Self::text(Role::Assistant, "")
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            name: Some(name.into()),
            ..Self::text(Role::Tool, content)
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        self.content.as_text()
    }
}

/// A tool schema offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the argument object.
    pub parameters: Value,
}

/// Request handed to a provider.  The provider owns the model spec; the
/// request carries only per-call state.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    /// Responses-dialect continuation token.  When set, only messages after
    /// its owning assistant message are sent.
    pub previous_response_id: Option<String>,
}

// ─── Stream events ────────────────────────────────────────────────────────────

/// A single event surfaced from any of the three wire dialects.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Reasoning/thinking text delta.
    ReasoningDelta(String),
    /// Answer text delta.
    TextDelta(String),
    /// Tool-call delta.  `index` routes accumulation: the chat dialect
    /// interleaves parallel calls by index, the other dialects count up.
    ToolCallDelta {
        index: u32,
        id: String,
        name: String,
        arguments: String,
        thought_signature: Option<String>,
    },
    /// Server-issued continuation token (responses dialect only).
    ResponseId(String),
    /// Usage object in the dialect's native shape (prompt/completion vs
    /// input/output token keys).  Accumulated additively across iterations.
    Usage(Value),
    /// Recoverable stream warning.
    Error(String),
    /// Stream finished.
    Done,
}

/// Add every numeric field of `delta` into `total`, recursively, preserving
/// whatever key shape the dialect uses.  Non-numeric fields are copied when
/// absent from `total` and left alone otherwise.
pub fn accumulate_usage(total: &mut Value, delta: &Value) {
    match (total, delta) {
        (Value::Object(t), Value::Object(d)) => {
            for (k, dv) in d {
                match t.get_mut(k) {
                    Some(tv) => accumulate_usage(tv, dv),
                    None => {
                        t.insert(k.clone(), dv.clone());
                    }
                }
            }
        }
        (t, d) => {
            if let (Some(a), Some(b)) = (t.as_u64(), d.as_u64()) {
                *t = Value::from(a + b);
            }
        }
    }
}

// ─── Tool-call accumulation ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
    thought_signature: Option<String>,
}

/// Reassembles tool calls from streaming deltas, keyed by the provider's
/// parallel-call index.
///
/// Some gateways retransmit the *complete* argument JSON in a late delta
/// after already streaming it piecewise; naively appending doubles the
/// arguments and corrupts the JSON.  Such retransmissions are detected by
/// parsing both sides and comparing, and dropped.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    pending: std::collections::BTreeMap<u32, PendingToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn push(
        &mut self,
        index: u32,
        id: &str,
        name: &str,
        arguments: &str,
        thought_signature: Option<String>,
    ) {
        let p = self.pending.entry(index).or_default();
        if !id.is_empty() {
            p.id = id.to_string();
        }
        if !name.is_empty() {
            p.name = name.to_string();
        }
        if thought_signature.is_some() {
            p.thought_signature = thought_signature;
        }
        if arguments.is_empty() {
            return;
        }
        if !p.args_buf.is_empty() {
            let existing: Option<Value> = serde_json::from_str(&p.args_buf).ok();
            let incoming: Option<Value> = serde_json::from_str(arguments).ok();
            if let (Some(a), Some(b)) = (existing, incoming) {
                if a == b {
                    tracing::debug!(
                        index,
                        "dropping duplicate full-JSON tool argument retransmission"
                    );
                    return;
                }
            }
        }
        p.args_buf.push_str(arguments);
    }

    /// Flush accumulated calls ordered by index.  Calls with an empty name
    /// cannot be dispatched and are dropped; empty ids get a synthetic
    /// fallback; empty argument buffers become `{}`.
    pub fn finish(self) -> Vec<ToolCall> {
        let mut out = Vec::with_capacity(self.pending.len());
        for (i, (_, p)) in self.pending.into_iter().enumerate() {
            if p.name.is_empty() {
                tracing::warn!(call_id = %p.id, "dropping tool call with empty name");
                continue;
            }
            let id = if p.id.is_empty() {
                format!("call_synthetic_{i}")
            } else {
                p.id
            };
            let arguments = if p.args_buf.is_empty() {
                "{}".to_string()
            } else {
                p.args_buf
            };
            out.push(ToolCall {
                id,
                kind: "function".to_string(),
                function: FunctionCall {
                    name: p.name,
                    arguments,
                },
                thought_signature: p.thought_signature,
            });
        }
        out
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
