// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::diff::unified_diff;
use crate::patch::{apply_update, parse_patch, FileOp};
use crate::tool::{decode_args, Tool, ToolCall, ToolContext, ToolOutput};

/// Apply an envelope-delimited patch (`*** Begin Patch` … `*** End Patch`).
///
/// Original file contents are snapshotted into the session on first touch,
/// and a unified diff of all changes travels on the side-effect channel
/// together with the patch text itself.
pub struct ApplyPatchTool;

#[derive(Debug, Deserialize)]
struct ApplyPatchArgs {
    #[serde(rename = "patchCommand")]
    patch_command: String,
}

#[async_trait]
impl Tool for ApplyPatchTool {
    fn name(&self) -> &str {
        "apply_patch"
    }

    fn description(&self) -> &str {
        "Apply a patch to add, update, or delete files.\n\
         Format:\n\
         *** Begin Patch\n\
         *** Add File: path/new.rs\n\
         +content line\n\
         *** Update File: path/existing.rs\n\
         @@ optional context hint\n\
          context line\n\
         -removed line\n\
         +added line\n\
         *** Delete File: path/old.rs\n\
         *** End Patch\n\
         Update hunks are located by context, never line numbers."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "patchCommand": {
                    "type": "string",
                    "description": "Full patch text including the Begin/End markers"
                }
            },
            "required": ["patchCommand"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let args: ApplyPatchArgs = match decode_args(call) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e),
        };

        let patch = match parse_patch(&args.patch_command) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, format!("patch error: {e}")),
        };

        debug!(ops = patch.ops.len(), "apply_patch tool");

        let mut summary: Vec<String> = Vec::new();
        let mut diffs: Vec<String> = Vec::new();

        for op in &patch.ops {
            let path = op.path().to_string();
            match op {
                FileOp::Add { content, .. } => {
                    if let Some(parent) = std::path::Path::new(&path).parent() {
                        if !parent.as_os_str().is_empty() {
                            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                                return ToolOutput::err(
                                    &call.id,
                                    format!("cannot create {}: {e}", parent.display()),
                                );
                            }
                        }
                    }
                    if let Err(e) = tokio::fs::write(&path, content).await {
                        return ToolOutput::err(&call.id, format!("cannot write {path}: {e}"));
                    }
                    if let Some(d) = unified_diff("", content, &path).await {
                        diffs.push(d);
                    }
                    summary.push(format!("A {path}"));
                }
                FileOp::Update { blocks, .. } => {
                    let old = match tokio::fs::read_to_string(&path).await {
                        Ok(c) => c,
                        Err(e) => {
                            return ToolOutput::err(
                                &call.id,
                                format!("cannot update {path}: {e}"),
                            )
                        }
                    };
                    let new = match apply_update(&old, blocks) {
                        Ok(n) => n,
                        Err(e) => {
                            return ToolOutput::err(
                                &call.id,
                                format!("patch failed for {path}: {e}"),
                            )
                        }
                    };
                    {
                        let mut session = ctx.session.lock().await;
                        let _ = session.record_file_original(&path, &old);
                    }
                    if let Err(e) = tokio::fs::write(&path, &new).await {
                        return ToolOutput::err(&call.id, format!("cannot write {path}: {e}"));
                    }
                    if let Some(d) = unified_diff(&old, &new, &path).await {
                        diffs.push(d);
                    }
                    summary.push(format!("M {path}"));
                }
                FileOp::Delete { .. } => {
                    let old = match tokio::fs::read_to_string(&path).await {
                        Ok(c) => c,
                        Err(e) => {
                            return ToolOutput::err(
                                &call.id,
                                format!("cannot delete {path}: {e}"),
                            )
                        }
                    };
                    {
                        let mut session = ctx.session.lock().await;
                        let _ = session.record_file_original(&path, &old);
                    }
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        return ToolOutput::err(&call.id, format!("cannot delete {path}: {e}"));
                    }
                    if let Some(d) = unified_diff(&old, "", &path).await {
                        diffs.push(d);
                    }
                    summary.push(format!("D {path}"));
                }
            }
        }

        let combined_diff = if diffs.is_empty() {
            None
        } else {
            Some(diffs.join("\n"))
        };
        ToolOutput::ok(
            &call.id,
            json!({ "success": true, "output": summary.join("\n") }),
        )
        .with_diff(combined_diff, Some(args.patch_command.clone()))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use tern_session::Session;

    fn call(patch: &str) -> ToolCall {
        ToolCall {
            id: "p1".into(),
            name: "apply_patch".into(),
            args: json!({ "patchCommand": patch }),
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::for_session(Session::new_chat("test"))
    }

    #[tokio::test]
    async fn update_hunk_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "line1\nline2\nline3").unwrap();
        let patch = format!(
            "*** Begin Patch\n*** Update File: {}\n@@\n line1\n-line2\n+LINE2\n line3\n*** End Patch",
            path.display()
        );
        let out = ApplyPatchTool.execute(&call(&patch), &ctx()).await;
        assert!(!out.is_error, "{:?}", out.payload);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line1\nLINE2\nline3");
        assert!(out.payload["output"]
            .as_str()
            .unwrap()
            .starts_with("M "));
    }

    #[tokio::test]
    async fn add_file_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deep/new.txt");
        let patch = format!(
            "*** Begin Patch\n*** Add File: {}\n+hello\n+world\n*** End Patch",
            path.display()
        );
        let out = ApplyPatchTool.execute(&call(&patch), &ctx()).await;
        assert!(!out.is_error, "{:?}", out.payload);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\nworld");
    }

    #[tokio::test]
    async fn delete_file_removes_and_snapshots_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bye.txt");
        std::fs::write(&path, "old content").unwrap();
        let patch = format!(
            "*** Begin Patch\n*** Delete File: {}\n*** End Patch",
            path.display()
        );
        let ctx = ctx();
        let out = ApplyPatchTool.execute(&call(&patch), &ctx).await;
        assert!(!out.is_error);
        assert!(!path.exists());
        let session = ctx.session.lock().await;
        assert_eq!(
            session.data.file_originals[&path.display().to_string()],
            "old content"
        );
    }

    #[tokio::test]
    async fn update_snapshots_original_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "v1\n").unwrap();
        let ctx = ctx();
        let patch1 = format!(
            "*** Begin Patch\n*** Update File: {}\n@@\n-v1\n+v2\n*** End Patch",
            path.display()
        );
        ApplyPatchTool.execute(&call(&patch1), &ctx).await;
        let patch2 = format!(
            "*** Begin Patch\n*** Update File: {}\n@@\n-v2\n+v3\n*** End Patch",
            path.display()
        );
        ApplyPatchTool.execute(&call(&patch2), &ctx).await;
        let session = ctx.session.lock().await;
        assert_eq!(
            session.data.file_originals[&path.display().to_string()],
            "v1\n",
            "only the first-touch content is kept"
        );
    }

    #[tokio::test]
    async fn side_effects_carry_patch_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "a\n").unwrap();
        let patch = format!(
            "*** Begin Patch\n*** Update File: {}\n@@\n-a\n+b\n*** End Patch",
            path.display()
        );
        let out = ApplyPatchTool.execute(&call(&patch), &ctx()).await;
        assert_eq!(out.side_effects.patch_command.as_deref(), Some(patch.as_str()));
        // The payload must not leak side-effect fields to the model.
        assert!(out.payload.get("_diff").is_none());
        assert!(out.payload.get("_patchCommand").is_none());
    }

    #[tokio::test]
    async fn update_against_missing_file_is_error() {
        let patch = "*** Begin Patch\n*** Update File: /no/such/file.txt\n@@\n-a\n+b\n*** End Patch";
        let out = ApplyPatchTool.execute(&call(patch), &ctx()).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn malformed_envelope_is_error() {
        let out = ApplyPatchTool.execute(&call("no markers"), &ctx()).await;
        assert!(out.is_error);
        assert!(out.payload["error"].as_str().unwrap().contains("patch error"));
    }
}
