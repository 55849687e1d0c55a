// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{decode_args, Tool, ToolCall, ToolContext, ToolOutput};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

pub struct ReadFileTool;

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    target_file: String,
    /// 1-based first line to return.
    #[serde(default)]
    offset: Option<u64>,
    /// Maximum number of lines to return.
    #[serde(default)]
    limit: Option<u64>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file.  Text files are returned line-numbered as L<n>:content \
         (1-indexed, zero-padded); use offset (1-based) and limit to page \
         through large files.  Image files (png/jpg/jpeg/gif/webp) are \
         returned as base64."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target_file": {
                    "type": "string",
                    "description": "Path of the file to read"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-based line number to start from"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return"
                }
            },
            "required": ["target_file"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
        let args: ReadFileArgs = match decode_args(call) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        let path = std::path::Path::new(&args.target_file);
        debug!(path = %args.target_file, "read_file tool");

        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => {
                return ToolOutput::err(
                    &call.id,
                    format!("{} is a directory, not a file", args.target_file),
                );
            }
            Ok(_) => {}
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return match tokio::fs::read(path).await {
                Ok(bytes) => ToolOutput::ok(&call.id, json!(B64.encode(bytes))),
                Err(e) => ToolOutput::err(&call.id, format!("read error: {e}")),
            };
        }

        let text = match tokio::fs::read_to_string(path).await {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };

        let offset = args.offset.unwrap_or(1).max(1) as usize;
        let limit = args.limit.map(|l| l as usize);
        ToolOutput::ok(&call.id, json!(number_lines(&text, offset, limit)))
    }
}

/// Render `text` with `L<n>:` prefixes.
///
/// The pad width is `max(3, digits(total_lines))` so files up to 999 lines
/// align at three digits and longer files widen uniformly.  `offset` is
/// 1-based inclusive; an empty file renders as an empty string.
pub(crate) fn number_lines(text: &str, offset: usize, limit: Option<usize>) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let total = lines.len();
    if total == 0 {
        return String::new();
    }
    let width = digits(total).max(3);
    let start = offset.saturating_sub(1).min(total);
    let end = match limit {
        Some(l) => (start + l).min(total),
        None => total,
    };
    lines[start..end]
        .iter()
        .enumerate()
        .map(|(i, line)| format!("L{:0width$}:{}", start + i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn digits(mut n: usize) -> usize {
    let mut d = 1;
    while n >= 10 {
        n /= 10;
        d += 1;
    }
    d
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use tern_session::Session;

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "r1".into(),
            name: "read_file".into(),
            args,
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::for_session(Session::new_chat("test"))
    }

    fn tmp_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    // ── Line numbering ────────────────────────────────────────────────────────

    #[test]
    fn numbering_pads_to_three_digits_minimum() {
        assert_eq!(number_lines("a\nb", 1, None), "L001:a\nL002:b");
    }

    #[test]
    fn numbering_widens_for_long_files() {
        let text: String = (0..10_000).map(|i| format!("x{i}\n")).collect();
        let out = number_lines(&text, 1, Some(1));
        assert_eq!(out, "L00001:x0");
    }

    #[test]
    fn offset_is_one_based_inclusive() {
        // The spec scenario: 3-line file, offset 2, limit 1 → exactly L002.
        assert_eq!(number_lines("one\ntwo\ntwo", 2, Some(1)), "L002:two");
    }

    #[test]
    fn limit_bounds_line_count() {
        let out = number_lines("a\nb\nc\nd", 2, Some(2));
        assert_eq!(out, "L002:b\nL003:c");
    }

    #[test]
    fn offset_beyond_end_is_empty() {
        assert_eq!(number_lines("a\nb", 10, None), "");
    }

    #[test]
    fn empty_file_renders_empty_string() {
        assert_eq!(number_lines("", 1, None), "");
    }

    #[test]
    fn output_line_count_matches_slicing_contract() {
        // min(N, limit) − max(0, offset−1), clamped to ≥ 0.
        let text = "1\n2\n3\n4\n5";
        for (offset, limit, expected) in [
            (1, Some(5), 5),
            (1, Some(2), 2),
            (3, Some(5), 3),
            (5, Some(1), 1),
            (6, Some(2), 0),
            (1, None, 5),
        ] {
            let out = number_lines(text, offset, limit);
            let count = if out.is_empty() { 0 } else { out.lines().count() };
            assert_eq!(count, expected, "offset={offset} limit={limit:?}");
            assert!(out.lines().all(|l| l.starts_with('L') && l.contains(':')));
        }
    }

    // ── Tool surface ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn reads_text_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = tmp_file(&dir, "t.txt", b"alpha\nbeta\n");
        let out = ReadFileTool
            .execute(&call(json!({ "target_file": path })), &ctx())
            .await;
        assert!(!out.is_error);
        assert_eq!(out.payload, json!("L001:alpha\nL002:beta"));
    }

    #[tokio::test]
    async fn image_extension_returns_base64() {
        let dir = tempfile::tempdir().unwrap();
        let path = tmp_file(&dir, "pic.png", b"\x89PNG\r\n");
        let out = ReadFileTool
            .execute(&call(json!({ "target_file": path })), &ctx())
            .await;
        assert!(!out.is_error);
        let b64 = out.payload.as_str().unwrap();
        assert_eq!(B64.decode(b64).unwrap(), b"\x89PNG\r\n");
    }

    #[tokio::test]
    async fn directory_target_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = ReadFileTool
            .execute(
                &call(json!({ "target_file": dir.path().to_string_lossy() })),
                &ctx(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.payload["error"].as_str().unwrap().contains("directory"));
    }

    #[tokio::test]
    async fn missing_file_is_error() {
        let out = ReadFileTool
            .execute(&call(json!({ "target_file": "/no/such/file.txt" })), &ctx())
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn empty_file_returns_empty_string() {
        let dir = tempfile::tempdir().unwrap();
        let path = tmp_file(&dir, "empty.txt", b"");
        let out = ReadFileTool
            .execute(&call(json!({ "target_file": path })), &ctx())
            .await;
        assert!(!out.is_error);
        assert_eq!(out.payload, json!(""));
    }
}
