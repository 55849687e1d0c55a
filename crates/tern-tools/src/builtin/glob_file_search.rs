// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::SystemTime;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::globmatch::glob_match;
use crate::tool::{decode_args, Tool, ToolCall, ToolContext, ToolOutput};

/// Recursive filename search by glob, newest first.
///
/// Paths are matched in normalized POSIX form relative to the search root;
/// a pattern without a leading `**/` is prefixed with one so `*.rs` finds
/// files at any depth.
pub struct GlobFileSearchTool;

#[derive(Debug, Deserialize)]
struct GlobFileSearchArgs {
    glob_pattern: String,
    #[serde(default)]
    target_directory: Option<String>,
}

#[async_trait]
impl Tool for GlobFileSearchTool {
    fn name(&self) -> &str {
        "glob_file_search"
    }

    fn description(&self) -> &str {
        "Search for files whose relative path matches a glob pattern \
         (*, **, ?). Patterns without '**/' are matched at any depth. \
         Results are sorted by modification time, newest first. \
         Dotfiles and dot-directories are excluded."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "glob_pattern": {
                    "type": "string",
                    "description": "Glob to match against relative paths, e.g. '*.rs' or 'src/**/*.toml'"
                },
                "target_directory": {
                    "type": "string",
                    "description": "Root to search from (default: current directory)"
                }
            },
            "required": ["glob_pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
        let args: GlobFileSearchArgs = match decode_args(call) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        let root = args.target_directory.unwrap_or_else(|| ".".to_string());
        let pattern = normalize_pattern(&args.glob_pattern);
        debug!(pattern = %pattern, root = %root, "glob_file_search tool");

        if !std::path::Path::new(&root).is_dir() {
            return ToolOutput::err(&call.id, format!("not a directory: {root}"));
        }

        let mut matches: Vec<(String, SystemTime)> = Vec::new();
        let walker = WalkDir::new(&root).into_iter().filter_entry(|e| {
            // Never descend into dot-directories; skip dotfiles.
            e.depth() == 0
                || !e
                    .file_name()
                    .to_string_lossy()
                    .starts_with('.')
        });
        for entry in walker.flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&root) {
                Ok(r) => r,
                Err(_) => continue,
            };
            let rel_posix = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if glob_match(&pattern, &rel_posix) {
                let mtime = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                matches.push((rel_posix, mtime));
            }
        }

        // Newest first; ties resolve alphabetically for stable output.
        matches.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let paths: Vec<String> = matches.into_iter().map(|(p, _)| p).collect();
        ToolOutput::ok(&call.id, json!(paths.join("\n")))
    }
}

/// Prefix patterns with `**/` unless they already match from the root.
pub(crate) fn normalize_pattern(pattern: &str) -> String {
    if pattern.starts_with("**/") || pattern == "**" {
        pattern.to_string()
    } else {
        format!("**/{pattern}")
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
            id: "g1".into(),
            name: "glob_file_search".into(),
            args,
        }
    }

    #[test]
    fn pattern_auto_prefixed_once() {
        assert_eq!(normalize_pattern("*.rs"), "**/*.rs");
        assert_eq!(normalize_pattern("**/*.rs"), "**/*.rs");
        assert_eq!(normalize_pattern("src/**/*.rs"), "**/src/**/*.rs");
    }

    #[tokio::test]
    async fn finds_files_at_any_depth() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/deep")).unwrap();
        std::fs::write(dir.path().join("top.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/deep/inner.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/readme.md"), "").unwrap();

        let out = GlobFileSearchTool
            .execute(
                &call(json!({
                    "glob_pattern": "*.rs",
                    "target_directory": dir.path().to_string_lossy()
                })),
                &ctx(),
            )
            .await;
        assert!(!out.is_error);
        let listing = out.payload.as_str().unwrap();
        assert!(listing.contains("top.rs"));
        assert!(listing.contains("src/deep/inner.rs"));
        assert!(!listing.contains("readme.md"));
    }

    #[tokio::test]
    async fn dotfiles_and_dot_directories_excluded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/config.rs"), "").unwrap();
        std::fs::write(dir.path().join(".hidden.rs"), "").unwrap();
        std::fs::write(dir.path().join("seen.rs"), "").unwrap();

        let out = GlobFileSearchTool
            .execute(
                &call(json!({
                    "glob_pattern": "*.rs",
                    "target_directory": dir.path().to_string_lossy()
                })),
                &ctx(),
            )
            .await;
        assert_eq!(out.payload, json!("seen.rs"));
    }

    #[tokio::test]
    async fn results_sorted_by_mtime_descending() {
        let dir = tempfile::tempdir().unwrap();
        let older = dir.path().join("older.rs");
        let newer = dir.path().join("newer.rs");
        std::fs::write(&older, "").unwrap();
        std::fs::write(&newer, "").unwrap();
        let old_time = filetime_from_secs(1_600_000_000);
        let new_time = filetime_from_secs(1_700_000_000);
        set_mtime(&older, old_time);
        set_mtime(&newer, new_time);

        let out = GlobFileSearchTool
            .execute(
                &call(json!({
                    "glob_pattern": "*.rs",
                    "target_directory": dir.path().to_string_lossy()
                })),
                &ctx(),
            )
            .await;
        assert_eq!(out.payload, json!("newer.rs\nolder.rs"));
    }

    #[tokio::test]
    async fn missing_root_is_error() {
        let out = GlobFileSearchTool
            .execute(
                &call(json!({ "glob_pattern": "*.rs", "target_directory": "/no/such" })),
                &ctx(),
            )
            .await;
        assert!(out.is_error);
    }

    fn filetime_from_secs(secs: i64) -> std::time::SystemTime {
        std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs as u64)
    }

    fn set_mtime(path: &std::path::Path, t: std::time::SystemTime) {
        let f = std::fs::File::options().write(true).open(path).unwrap();
        f.set_modified(t).unwrap();
    }
}
