// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use tern_session::{ids, MemoryEntry};

use crate::tool::{decode_args, Tool, ToolCall, ToolContext, ToolOutput};

/// Environment variable overriding the standalone memory file path.
/// Read once per call so tests and callers can redirect it at runtime.
pub const MEMORY_FILE_ENV: &str = "TERN_MEMORY_FILE";

/// Persist long-lived knowledge across sessions.
///
/// Memories live in the session's data (persisted with it) and are mirrored
/// to a standalone JSON file so other sessions can load them.
#[derive(Default)]
pub struct UpdateMemoryTool {
    /// Explicit path override; the env var and the default config path are
    /// consulted when unset.
    pub memory_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct UpdateMemoryArgs {
    action: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    knowledge_to_store: Option<String>,
}

#[async_trait]
impl Tool for UpdateMemoryTool {
    fn name(&self) -> &str {
        "update_memory"
    }

    fn description(&self) -> &str {
        "Store, update, or delete a long-lived memory.\n\
         action=create requires title and knowledge_to_store;\n\
         action=update requires id plus the fields to change;\n\
         action=delete requires id."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["create", "update", "delete"],
                    "description": "Operation to perform"
                },
                "id": {
                    "type": "string",
                    "description": "Memory id (required for update/delete)"
                },
                "title": {
                    "type": "string",
                    "description": "Short memory title"
                },
                "knowledge_to_store": {
                    "type": "string",
                    "description": "The knowledge to persist"
                }
            },
            "required": ["action"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let args: UpdateMemoryArgs = match decode_args(call) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        debug!(action = %args.action, "update_memory tool");

        let mut session = ctx.session.lock().await;
        let result = match args.action.as_str() {
            "create" => {
                let title = match args.title {
                    Some(t) => t,
                    None => return ToolOutput::err(&call.id, "missing 'title' for create"),
                };
                let knowledge = match args.knowledge_to_store {
                    Some(k) => k,
                    None => {
                        return ToolOutput::err(
                            &call.id,
                            "missing 'knowledge_to_store' for create",
                        )
                    }
                };
                let now = chrono::Utc::now();
                let entry = MemoryEntry {
                    id: ids::new_memory_id(),
                    title,
                    knowledge_to_store: knowledge,
                    created_at: now,
                    updated_at: now,
                };
                let id = entry.id.clone();
                session.data.memories.push(entry);
                json!({ "success": true, "id": id })
            }
            "update" => {
                let id = match args.id {
                    Some(i) => i,
                    None => return ToolOutput::err(&call.id, "missing 'id' for update"),
                };
                match session.data.memories.iter_mut().find(|m| m.id == id) {
                    Some(entry) => {
                        if let Some(t) = args.title {
                            entry.title = t;
                        }
                        if let Some(k) = args.knowledge_to_store {
                            entry.knowledge_to_store = k;
                        }
                        entry.updated_at = chrono::Utc::now();
                        json!({ "success": true, "id": id })
                    }
                    None => return ToolOutput::err(&call.id, format!("memory not found: {id}")),
                }
            }
            "delete" => {
                let id = match args.id {
                    Some(i) => i,
                    None => return ToolOutput::err(&call.id, "missing 'id' for delete"),
                };
                let before = session.data.memories.len();
                session.data.memories.retain(|m| m.id != id);
                if session.data.memories.len() == before {
                    return ToolOutput::err(&call.id, format!("memory not found: {id}"));
                }
                json!({ "success": true })
            }
            other => return ToolOutput::err(&call.id, format!("unknown action: {other}")),
        };

        if let Err(e) = session.save() {
            return ToolOutput::err(&call.id, format!("failed to persist memories: {e}"));
        }
        if let Err(e) = self.write_memory_file(&session.data.memories) {
            // The session copy is authoritative; the mirror is best-effort.
            debug!(error = %e, "memory file mirror failed");
        }
        ToolOutput::ok(&call.id, result)
    }
}

impl UpdateMemoryTool {
    /// Path resolution order: explicit override, then the env var (read per
    /// call), then the conventional config location.
    fn memory_path(&self) -> Option<PathBuf> {
        if let Some(p) = &self.memory_file {
            return Some(p.clone());
        }
        if let Ok(p) = std::env::var(MEMORY_FILE_ENV) {
            if !p.is_empty() {
                return Some(PathBuf::from(p));
            }
        }
        dirs::config_dir().map(|d| d.join("tern/memories.json"))
    }

    fn write_memory_file(&self, memories: &[MemoryEntry]) -> std::io::Result<()> {
        let path = match self.memory_path() {
            Some(p) => p,
            None => return Ok(()),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(memories)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
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

    fn tool(dir: &tempfile::TempDir) -> UpdateMemoryTool {
        UpdateMemoryTool {
            memory_file: Some(dir.path().join("memories.json")),
        }
    }

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "m1".into(),
            name: "update_memory".into(),
            args,
        }
    }

    #[tokio::test]
    async fn create_stores_memory_with_generated_id() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx();
        let out = tool(&dir)
            .execute(
                &call(json!({
                    "action": "create",
                    "title": "build system",
                    "knowledge_to_store": "project builds with make"
                })),
                &ctx,
            )
            .await;
        assert!(!out.is_error, "{:?}", out.payload);
        let id = out.payload["id"].as_str().unwrap().to_string();
        assert!(id.starts_with("mem_"), "id format: {id}");

        let session = ctx.session.lock().await;
        assert_eq!(session.data.memories.len(), 1);
        assert_eq!(session.data.memories[0].title, "build system");
    }

    #[tokio::test]
    async fn update_changes_fields_and_bumps_updated_at() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx();
        let t = tool(&dir);
        let created = t
            .execute(
                &call(json!({
                    "action": "create",
                    "title": "old",
                    "knowledge_to_store": "k"
                })),
                &ctx,
            )
            .await;
        let id = created.payload["id"].as_str().unwrap().to_string();

        let out = t
            .execute(
                &call(json!({ "action": "update", "id": id, "title": "new" })),
                &ctx,
            )
            .await;
        assert!(!out.is_error);
        let session = ctx.session.lock().await;
        let m = &session.data.memories[0];
        assert_eq!(m.title, "new");
        assert_eq!(m.knowledge_to_store, "k");
        assert!(m.updated_at >= m.created_at);
    }

    #[tokio::test]
    async fn delete_removes_memory() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx();
        let t = tool(&dir);
        let created = t
            .execute(
                &call(json!({
                    "action": "create", "title": "x", "knowledge_to_store": "y"
                })),
                &ctx,
            )
            .await;
        let id = created.payload["id"].as_str().unwrap().to_string();
        let out = t.execute(&call(json!({ "action": "delete", "id": id })), &ctx).await;
        assert!(!out.is_error);
        assert!(ctx.session.lock().await.data.memories.is_empty());
    }

    #[tokio::test]
    async fn unknown_action_and_missing_fields_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let t = tool(&dir);
        let out = t.execute(&call(json!({ "action": "merge" })), &ctx()).await;
        assert!(out.is_error);
        let out = t.execute(&call(json!({ "action": "create" })), &ctx()).await;
        assert!(out.is_error);
        let out = t.execute(&call(json!({ "action": "delete" })), &ctx()).await;
        assert!(out.is_error);
        let out = t
            .execute(&call(json!({ "action": "delete", "id": "mem_0_x" })), &ctx())
            .await;
        assert!(out.is_error, "deleting a nonexistent memory is an error");
    }

    #[tokio::test]
    async fn memories_are_mirrored_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let t = tool(&dir);
        t.execute(
            &call(json!({
                "action": "create", "title": "t", "knowledge_to_store": "k"
            })),
            &ctx(),
        )
        .await;
        let text = std::fs::read_to_string(dir.path().join("memories.json")).unwrap();
        assert!(text.contains("\"title\": \"t\""));
    }
}
