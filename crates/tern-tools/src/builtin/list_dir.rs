// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::globmatch::glob_match;
use crate::tool::{decode_args, Tool, ToolCall, ToolContext, ToolOutput};

/// List a directory: dotfiles hidden, optional ignore globs applied,
/// directories marked with a trailing `/`, alphabetical order.
pub struct ListDirTool;

#[derive(Debug, Deserialize)]
struct ListDirArgs {
    target_directory: String,
    #[serde(default)]
    ignore_globs: Vec<String>,
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Dotfiles are hidden; directories \
         carry a trailing '/'. ignore_globs filters names with minimal glob \
         syntax (*, **, ?)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target_directory": {
                    "type": "string",
                    "description": "Directory to list"
                },
                "ignore_globs": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Glob patterns to hide"
                }
            },
            "required": ["target_directory"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
        let args: ListDirArgs = match decode_args(call) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        debug!(dir = %args.target_directory, "list_dir tool");

        let mut read_dir = match tokio::fs::read_dir(&args.target_directory).await {
            Ok(rd) => rd,
            Err(e) => return ToolOutput::err(&call.id, format!("list error: {e}")),
        };

        let mut entries: Vec<String> = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if args.ignore_globs.iter().any(|g| glob_match(g, &name)) {
                continue;
            }
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();

        ToolOutput::ok(&call.id, json!(entries.join("\n")))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use tern_session::Session;

    fn ctx() -> ToolContext {
        ToolContext::for_session(Session::new_chat("test"))
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "l1".into(),
            name: "list_dir".into(),
            args,
        }
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("main.rs"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        std::fs::write(dir.path().join(".hidden"), "").unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        dir
    }

    #[tokio::test]
    async fn hides_dotfiles_marks_dirs_sorts_alphabetically() {
        let dir = fixture();
        let out = ListDirTool
            .execute(
                &call(json!({ "target_directory": dir.path().to_string_lossy() })),
                &ctx(),
            )
            .await;
        assert!(!out.is_error);
        assert_eq!(out.payload, json!("main.rs\nnotes.txt\nsrc/"));
    }

    #[tokio::test]
    async fn ignore_globs_filter_entries() {
        let dir = fixture();
        let out = ListDirTool
            .execute(
                &call(json!({
                    "target_directory": dir.path().to_string_lossy(),
                    "ignore_globs": ["*.txt"]
                })),
                &ctx(),
            )
            .await;
        assert_eq!(out.payload, json!("main.rs\nsrc/"));
    }

    #[tokio::test]
    async fn missing_directory_is_error() {
        let out = ListDirTool
            .execute(&call(json!({ "target_directory": "/no/such/dir" })), &ctx())
            .await;
        assert!(out.is_error);
    }
}
