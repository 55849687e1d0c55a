// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::diff::unified_diff;
use crate::tool::{decode_args, Tool, ToolCall, ToolContext, ToolOutput};

/// Delete a file, snapshotting its content and emitting a full-deletion
/// diff.  A missing file is an `{ok:false}` payload, not a failure — the
/// model frequently retries deletions it already performed.
pub struct DeleteFileTool;

#[derive(Debug, Deserialize)]
struct DeleteFileArgs {
    target_file: String,
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file. Returns {ok:true} on success and \
         {ok:false, error:\"File does not exist\"} when the target is absent."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target_file": {
                    "type": "string",
                    "description": "Path of the file to delete"
                }
            },
            "required": ["target_file"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let args: DeleteFileArgs = match decode_args(call) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        debug!(path = %args.target_file, "delete_file tool");

        let content = match tokio::fs::read_to_string(&args.target_file).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ToolOutput::ok(
                    &call.id,
                    json!({ "ok": false, "error": "File does not exist" }),
                );
            }
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };

        {
            let mut session = ctx.session.lock().await;
            let _ = session.record_file_original(&args.target_file, &content);
        }

        if let Err(e) = tokio::fs::remove_file(&args.target_file).await {
            return ToolOutput::err(&call.id, format!("delete error: {e}"));
        }

        let diff = unified_diff(&content, "", &args.target_file).await;
        ToolOutput::ok(&call.id, json!({ "ok": true })).with_diff(diff, None)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
