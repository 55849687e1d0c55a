// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use tern_config::ModelSpec;

use crate::{CompletionRequest, StreamEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamEvent>> + Send>>;

/// The three wire dialects tern speaks.  Selection is by model id alone so
/// the caller never names a dialect explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// OpenAI-style `/chat/completions` — the default.
    Chat,
    /// OpenAI `/responses` with server-side continuation tokens.
    Responses,
    /// Google Gemini `generateContent` / `streamGenerateContent`.
    Gemini,
}

impl Dialect {
    /// Detect the dialect from a model id.
    ///
    /// - Gemini: id contains `gemini`/`veo` or starts with `google/`.
    /// - Responses: id starts `gpt-` and is `gpt-4o*`, `gpt-4-turbo*`, or has
    ///   a major version greater than 4.
    /// - Chat: everything else (including `gpt-4`, `gpt-3.5-turbo`, and all
    ///   non-OpenAI OpenAI-compatible models).
    pub fn detect(model_id: &str) -> Self {
        if tern_config::is_gemini_model_id(model_id) {
            return Self::Gemini;
        }
        let id = model_id.to_ascii_lowercase();
        if let Some(rest) = id.strip_prefix("gpt-") {
            if rest.starts_with("4o") || rest.starts_with("4-turbo") {
                return Self::Responses;
            }
            let major: Option<u32> = rest
                .split(|c: char| !c.is_ascii_digit())
                .next()
                .filter(|s| !s.is_empty())
                .and_then(|s| s.parse().ok());
            if matches!(major, Some(m) if m > 4) {
                return Self::Responses;
            }
        }
        Self::Chat
    }
}

/// A single logical request method over all three dialects.  Every
/// implementation surfaces the identical [`StreamEvent`] stream so the agent
/// loop is dialect-blind.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Dialect-stable provider name for logs and status display.
    fn name(&self) -> &str;

    /// Model id forwarded to the API.
    fn model_id(&self) -> &str;

    /// Send a completion request and stream response events.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;
}

/// Construct the provider for a model spec by detecting its dialect.
pub fn provider_for(spec: &ModelSpec) -> Box<dyn Provider> {
    match Dialect::detect(&spec.model_id) {
        Dialect::Gemini => Box::new(crate::GeminiProvider::new(spec.clone())),
        Dialect::Responses => Box::new(crate::ResponsesProvider::new(spec.clone())),
        Dialect::Chat => Box::new(crate::ChatProvider::new(spec.clone())),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini_ids_detected() {
        assert_eq!(Dialect::detect("gemini-2.5-flash"), Dialect::Gemini);
        assert_eq!(Dialect::detect("gemini-3-pro-preview"), Dialect::Gemini);
        assert_eq!(Dialect::detect("veo-3.0-generate-001"), Dialect::Gemini);
        assert_eq!(Dialect::detect("google/custom"), Dialect::Gemini);
    }

    #[test]
    fn responses_ids_detected() {
        assert_eq!(Dialect::detect("gpt-4o"), Dialect::Responses);
        assert_eq!(Dialect::detect("gpt-4o-mini"), Dialect::Responses);
        assert_eq!(Dialect::detect("gpt-4-turbo"), Dialect::Responses);
        assert_eq!(Dialect::detect("gpt-4-turbo-2024-04-09"), Dialect::Responses);
        assert_eq!(Dialect::detect("gpt-5"), Dialect::Responses);
        assert_eq!(Dialect::detect("gpt-5.1-codex"), Dialect::Responses);
        assert_eq!(Dialect::detect("gpt-12-preview"), Dialect::Responses);
    }

    #[test]
    fn chat_is_the_default_dialect() {
        assert_eq!(Dialect::detect("gpt-4"), Dialect::Chat);
        assert_eq!(Dialect::detect("gpt-4-0613"), Dialect::Chat);
        assert_eq!(Dialect::detect("gpt-3.5-turbo"), Dialect::Chat);
        assert_eq!(Dialect::detect("llama-3.3-70b-versatile"), Dialect::Chat);
        assert_eq!(Dialect::detect("deepseek-chat"), Dialect::Chat);
        assert_eq!(Dialect::detect("qwen2.5-coder"), Dialect::Chat);
    }
}
