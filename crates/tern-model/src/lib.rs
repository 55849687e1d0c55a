// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod mock;
pub mod sse;
mod chat;
mod gemini;
mod provider;
mod responses;
mod types;

pub use chat::ChatProvider;
pub use mock::{ScriptedProvider, ScriptedTurn};
pub use gemini::{GeminiProvider, GeneratedImage};
pub use provider::{provider_for, Dialect, Provider, ResponseStream};
pub use responses::{is_stale_response_id_error, ResponsesProvider};
pub use types::*;
