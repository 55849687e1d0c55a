// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use tern_session::{Todo, TodoStatus};

use crate::tool::{decode_args, Tool, ToolCall, ToolContext, ToolOutput};

/// Session todo list management.
///
/// `merge: false` replaces the list; `merge: true` upserts by id, keeping
/// the insertion order of each id's first occurrence.
pub struct TodoWriteTool {
    /// Minimum accepted list length.  Callers that require an initial plan
    /// of several steps raise this via [`TodoWriteTool::with_min_items`].
    min_items: usize,
}

impl Default for TodoWriteTool {
    fn default() -> Self {
        Self { min_items: 1 }
    }
}

impl TodoWriteTool {
    pub fn with_min_items(min_items: usize) -> Self {
        Self { min_items }
    }
}

#[derive(Debug, Deserialize)]
struct TodoItemArg {
    id: String,
    status: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct TodoWriteArgs {
    #[serde(default)]
    merge: bool,
    todos: Vec<TodoItemArg>,
}

fn parse_status(s: &str) -> Option<TodoStatus> {
    match s {
        "pending" => Some(TodoStatus::Pending),
        "in_progress" => Some(TodoStatus::InProgress),
        "completed" => Some(TodoStatus::Completed),
        "cancelled" => Some(TodoStatus::Cancelled),
        _ => None,
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Create and manage a structured task list for the current session.\n\
         Statuses: pending, in_progress, completed, cancelled.\n\
         merge=false replaces the whole list; merge=true upserts items by id, \
         preserving the order in which ids first appeared.\n\
         Use for multi-step tasks; mark items completed immediately when done."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "merge": {
                    "type": "boolean",
                    "description": "Upsert by id instead of replacing the list"
                },
                "todos": {
                    "type": "array",
                    "description": "Todo items to write",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed", "cancelled"]
                            },
                            "content": { "type": "string" }
                        },
                        "required": ["id", "status", "content"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["merge", "todos"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let args: TodoWriteArgs = match decode_args(call) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        if args.todos.len() < self.min_items {
            return ToolOutput::err(
                &call.id,
                format!(
                    "todos must contain at least {} item(s), got {}",
                    self.min_items,
                    args.todos.len()
                ),
            );
        }

        let mut incoming: Vec<Todo> = Vec::with_capacity(args.todos.len());
        for item in &args.todos {
            let status = match parse_status(&item.status) {
                Some(s) => s,
                None => {
                    return ToolOutput::err(
                        &call.id,
                        format!("invalid status '{}' for todo '{}'", item.status, item.id),
                    )
                }
            };
            incoming.push(Todo {
                id: item.id.clone(),
                status,
                content: item.content.clone(),
            });
        }

        debug!(count = incoming.len(), merge = args.merge, "todo_write tool");

        let mut session = ctx.session.lock().await;
        if args.merge {
            for todo in incoming {
                match session.data.todos.iter_mut().find(|t| t.id == todo.id) {
                    Some(existing) => *existing = todo,
                    None => session.data.todos.push(todo),
                }
            }
        } else {
            session.data.todos = incoming;
        }
        let count = session.data.todos.len();
        if let Err(e) = session.save() {
            return ToolOutput::err(&call.id, format!("failed to persist todos: {e}"));
        }

        ToolOutput::ok(&call.id, json!({ "success": true, "todo_count": count }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use tern_session::Session;

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "t1".into(),
            name: "todo_write".into(),
            args,
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::for_session(Session::new_chat("test"))
    }

    #[tokio::test]
    async fn replace_then_merge_round_trip() {
        // The end-to-end scenario: replace with two items, then merge an
        // update plus a new item.
        let tool = TodoWriteTool::default();
        let ctx = ctx();

        let out = tool
            .execute(
                &call(json!({
                    "merge": false,
                    "todos": [
                        { "id": "1", "status": "pending", "content": "A" },
                        { "id": "2", "status": "in_progress", "content": "B" }
                    ]
                })),
                &ctx,
            )
            .await;
        assert!(!out.is_error, "{:?}", out.payload);
        assert_eq!(out.payload, json!({ "success": true, "todo_count": 2 }));

        let out = tool
            .execute(
                &call(json!({
                    "merge": true,
                    "todos": [
                        { "id": "2", "status": "completed", "content": "B'" },
                        { "id": "3", "status": "pending", "content": "C" }
                    ]
                })),
                &ctx,
            )
            .await;
        assert_eq!(out.payload["todo_count"], 3);

        let session = ctx.session.lock().await;
        let ids: Vec<&str> = session.data.todos.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"], "first-occurrence order preserved");
        let two = session.data.todos.iter().find(|t| t.id == "2").unwrap();
        assert_eq!(two.status, TodoStatus::Completed);
        assert_eq!(two.content, "B'");
    }

    #[tokio::test]
    async fn replace_overwrites_previous_list() {
        let tool = TodoWriteTool::default();
        let ctx = ctx();
        tool.execute(
            &call(json!({ "merge": false, "todos": [
                { "id": "1", "status": "pending", "content": "old" }
            ]})),
            &ctx,
        )
        .await;
        tool.execute(
            &call(json!({ "merge": false, "todos": [
                { "id": "9", "status": "pending", "content": "new" }
            ]})),
            &ctx,
        )
        .await;
        let session = ctx.session.lock().await;
        assert_eq!(session.data.todos.len(), 1);
        assert_eq!(session.data.todos[0].id, "9");
    }

    #[tokio::test]
    async fn invalid_status_rejected() {
        let tool = TodoWriteTool::default();
        let out = tool
            .execute(
                &call(json!({ "merge": false, "todos": [
                    { "id": "1", "status": "paused", "content": "x" }
                ]})),
                &ctx(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.payload["error"]
            .as_str()
            .unwrap()
            .contains("invalid status 'paused'"));
    }

    #[tokio::test]
    async fn empty_list_rejected_at_default_minimum() {
        let tool = TodoWriteTool::default();
        let out = tool
            .execute(&call(json!({ "merge": false, "todos": [] })), &ctx())
            .await;
        assert!(out.is_error);
        assert!(out.payload["error"].as_str().unwrap().contains("at least 1"));
    }

    #[tokio::test]
    async fn configurable_minimum_of_two_rejects_single_item() {
        let tool = TodoWriteTool::with_min_items(2);
        let out = tool
            .execute(
                &call(json!({ "merge": false, "todos": [
                    { "id": "1", "status": "pending", "content": "only" }
                ]})),
                &ctx(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.payload["error"].as_str().unwrap().contains("at least 2"));
    }

    #[tokio::test]
    async fn missing_todos_field_is_invalid_arguments() {
        let tool = TodoWriteTool::default();
        let out = tool.execute(&call(json!({ "merge": false })), &ctx()).await;
        assert!(out.is_error);
        assert!(out.payload["error"]
            .as_str()
            .unwrap()
            .contains("invalid arguments"));
    }
}
