// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use crate::tool::{Tool, ToolCall, ToolContext, ToolOutput};

/// A tool schema handed to the provider adapter.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Central registry holding all available tools.
///
/// `execute` never lets a handler failure escape: unknown tools and handler
/// panics become `{success:false, error}` payloads the model can read.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Schemas for every registered tool, name-sorted for stable requests.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Schemas filtered through a model's tool-name allowlist.  An empty
    /// allowlist means every tool is offered.
    pub fn schemas_for_allowlist(&self, allowlist: &[String]) -> Vec<ToolSchema> {
        if allowlist.is_empty() {
            return self.schemas();
        }
        self.schemas()
            .into_iter()
            .filter(|s| allowlist.iter().any(|n| n == &s.name))
            .collect()
    }

    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let tool = match self.tools.get(&call.name) {
            Some(t) => Arc::clone(t),
            None => return ToolOutput::err(&call.id, format!("unknown tool: {}", call.name)),
        };
        // Isolate handler panics: a buggy tool must not take down the loop.
        let call_clone = call.clone();
        let ctx_clone = ctx.clone();
        match tokio::spawn(async move { tool.execute(&call_clone, &ctx_clone).await }).await {
            Ok(output) => output,
            Err(e) => ToolOutput::err(&call.id, format!("tool execution panicked: {e}")),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
