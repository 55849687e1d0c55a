// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Reasoning effort requested from the model, when the dialect supports it.
///
/// `On` requests the provider's dynamic/unbounded budget (Gemini maps it to
/// `thinkingBudget: -1`; the responses dialect treats it as `high`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
    On,
}

impl ReasoningEffort {
    /// Wire string for dialects that take the effort verbatim.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::On => "on",
        }
    }
}

/// One entry in the model catalog.
///
/// Immutable after load, except that the API key may be re-resolved from
/// `api_key_file` on every request (keys are rotated out-of-band).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Catalog key — unique, used for equality and CLI selection.
    pub name: String,
    /// Model identifier forwarded to the provider API.  Also drives dialect
    /// detection (chat/completions vs responses vs Gemini).
    pub model_id: String,
    /// API base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Inline API key.  Prefer `api_key_file` in catalogs kept under version
    /// control.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Path to a file holding the API key.  Re-read fresh on every
    /// resolution so rotated keys are picked up without a restart.
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default)]
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Inline system prompt, inserted only when no system message exists.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Path to a system prompt file.  Re-read fresh at serialization time;
    /// the first message is inserted or replaced accordingly.
    #[serde(default)]
    pub system_prompt_file: Option<String>,
    /// When non-empty, only tools with these names are offered to the model.
    #[serde(default)]
    pub tool_name_allowlist: Vec<String>,
}

impl PartialEq for ModelSpec {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl ModelSpec {
    /// Resolve the API key: file (re-read fresh) → inline → conventional
    /// environment variable for the model's dialect.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(path) = &self.api_key_file {
            match std::fs::read_to_string(path) {
                Ok(s) => {
                    let s = s.trim();
                    if !s.is_empty() {
                        return Some(s.to_string());
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "cannot read api_key_file");
                }
            }
        }
        if let Some(k) = &self.api_key {
            if !k.is_empty() {
                return Some(k.clone());
            }
        }
        let env_var = if is_gemini_model_id(&self.model_id) {
            "GEMINI_API_KEY"
        } else {
            "OPENAI_API_KEY"
        };
        std::env::var(env_var).ok().filter(|k| !k.is_empty())
    }
}

/// Shared by key resolution and dialect detection in `tern-model`: a model id
/// belongs to the Gemini family when it contains `gemini`/`veo` or uses the
/// `google/` prefix.
pub fn is_gemini_model_id(model_id: &str) -> bool {
    let id = model_id.to_ascii_lowercase();
    id.contains("gemini") || id.contains("veo") || id.starts_with("google/")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
