// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Pattern search built on the external ripgrep binary.
//!
//! Output is wrapped in a `<workspace_result workspace_path="…">` envelope
//! with a "Found N matching lines" header and matches grouped by file, so
//! the model sees where the search ran without extra tool calls.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::tool::{decode_args, Tool, ToolCall, ToolContext, ToolOutput};

pub struct RgTool;

#[derive(Debug, Deserialize)]
struct RgArgs {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    /// content (default) | files_with_matches | count
    #[serde(default)]
    output_mode: Option<String>,
    #[serde(default, rename = "-i")]
    ignore_case: Option<bool>,
    #[serde(default, rename = "-A")]
    after_context: Option<u32>,
    #[serde(default, rename = "-B")]
    before_context: Option<u32>,
    #[serde(default, rename = "-C")]
    context: Option<u32>,
    #[serde(default, rename = "type")]
    file_type: Option<String>,
    #[serde(default)]
    glob: Option<String>,
    #[serde(default)]
    multiline: Option<bool>,
    #[serde(default)]
    head_limit: Option<usize>,
}

#[async_trait]
impl Tool for RgTool {
    fn name(&self) -> &str {
        "rg"
    }

    fn description(&self) -> &str {
        "Search file contents with ripgrep.\n\
         pattern: full regex. output_mode: content (default, line-numbered), \
         files_with_matches, or count.\n\
         Flags map as in ripgrep: -i, -A, -B, -C, type, glob, multiline. \
         head_limit caps the number of result lines."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regex to search for" },
                "path": { "type": "string", "description": "File or directory to search (default: cwd)" },
                "output_mode": {
                    "type": "string",
                    "enum": ["content", "files_with_matches", "count"],
                    "description": "Result format (default content)"
                },
                "-i": { "type": "boolean", "description": "Case-insensitive search" },
                "-A": { "type": "integer", "description": "Lines of context after each match" },
                "-B": { "type": "integer", "description": "Lines of context before each match" },
                "-C": { "type": "integer", "description": "Lines of context around each match" },
                "type": { "type": "string", "description": "ripgrep file type filter, e.g. 'rust'" },
                "glob": { "type": "string", "description": "Glob filter, e.g. '*.rs'" },
                "multiline": { "type": "boolean", "description": "Allow matches to span lines" },
                "head_limit": { "type": "integer", "description": "Maximum result lines to return" }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
        let args: RgArgs = match decode_args(call) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        let mode = args.output_mode.as_deref().unwrap_or("content");
        debug!(pattern = %args.pattern, mode = %mode, "rg tool");

        if !ripgrep_available().await {
            return ToolOutput::err(
                &call.id,
                "ripgrep (rg) is not installed or not on PATH",
            );
        }

        let mut rg_args: Vec<String> = vec!["--color".into(), "never".into()];
        match mode {
            "files_with_matches" => rg_args.push("-l".into()),
            "count" => rg_args.push("-c".into()),
            _ => {
                rg_args.push("-n".into());
                rg_args.push("--no-heading".into());
            }
        }
        if args.ignore_case == Some(true) {
            rg_args.push("-i".into());
        }
        if let Some(n) = args.after_context {
            rg_args.push(format!("-A{n}"));
        }
        if let Some(n) = args.before_context {
            rg_args.push(format!("-B{n}"));
        }
        if let Some(n) = args.context {
            rg_args.push(format!("-C{n}"));
        }
        if let Some(t) = &args.file_type {
            rg_args.push("--type".into());
            rg_args.push(t.clone());
        }
        if let Some(g) = &args.glob {
            rg_args.push("--glob".into());
            rg_args.push(g.clone());
        }
        if args.multiline == Some(true) {
            rg_args.push("--multiline".into());
        }
        rg_args.push("--".into());
        rg_args.push(args.pattern.clone());
        rg_args.push(args.path.clone().unwrap_or_else(|| ".".to_string()));

        let output = match Command::new("rg")
            .args(&rg_args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
        {
            Ok(o) => o,
            Err(e) => return ToolOutput::err(&call.id, format!("rg spawn error: {e}")),
        };

        // Exit 1 is "no matches"; 2+ is a real failure (bad regex, IO).
        if output.status.code().map_or(true, |c| c > 1) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return ToolOutput::err(&call.id, format!("rg error: {}", stderr.trim()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let workspace = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| ".".to_string());
        let body = match mode {
            "files_with_matches" => format_files(&stdout, args.head_limit),
            "count" => format_counts(&stdout, args.head_limit),
            _ => format_content(&stdout, args.head_limit),
        };
        ToolOutput::ok(
            &call.id,
            json!(format!(
                "<workspace_result workspace_path=\"{workspace}\">\n{body}\n</workspace_result>"
            )),
        )
    }
}

async fn ripgrep_available() -> bool {
    Command::new("rg")
        .arg("--version")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// One parsed content-mode line: match (`path:line:text`) or context
/// (`path-line-text`, emitted for -A/-B/-C).
enum RgLine<'a> {
    Match { file: &'a str, rest: &'a str },
    Context { file: &'a str, rest: &'a str },
    Separator,
}

fn classify_line(line: &str) -> Option<RgLine<'_>> {
    if line == "--" {
        return Some(RgLine::Separator);
    }
    // path:lineno:text  (match)
    if let Some((file, rest)) = split_on_lineno(line, ':') {
        return Some(RgLine::Match { file, rest });
    }
    // path-lineno-text  (context)
    if let Some((file, rest)) = split_on_lineno(line, '-') {
        return Some(RgLine::Context { file, rest });
    }
    None
}

/// Split `path<sep>lineno<sep>text`, requiring the middle field to be a
/// number so Windows-style paths and hyphenated filenames survive.
fn split_on_lineno(line: &str, sep: char) -> Option<(&str, &str)> {
    let mut search_from = 0;
    while let Some(idx) = line[search_from..].find(sep) {
        let idx = search_from + idx;
        let after = &line[idx + 1..];
        if let Some(second) = after.find(sep) {
            if !after[..second].is_empty() && after[..second].bytes().all(|b| b.is_ascii_digit()) {
                return Some((&line[..idx], after));
            }
        }
        search_from = idx + 1;
    }
    None
}

/// Group content-mode output by file with a match-count header.
/// `head_limit` bounds the number of *match* lines shown; the header keeps
/// the true total so truncation is visible.
pub(crate) fn format_content(stdout: &str, head_limit: Option<usize>) -> String {
    let mut total_matches = 0usize;
    let mut shown_matches = 0usize;
    let mut current_file: Option<&str> = None;
    let mut lines_out: Vec<String> = Vec::new();

    for line in stdout.lines() {
        match classify_line(line) {
            Some(RgLine::Match { file, rest }) => {
                total_matches += 1;
                if head_limit.is_some_and(|l| shown_matches >= l) {
                    continue;
                }
                if current_file != Some(file) {
                    if current_file.is_some() {
                        lines_out.push(String::new());
                    }
                    lines_out.push(file.to_string());
                    current_file = Some(file);
                }
                lines_out.push(rest.to_string());
                shown_matches += 1;
            }
            Some(RgLine::Context { file, rest }) => {
                if head_limit.is_some_and(|l| shown_matches >= l) {
                    continue;
                }
                if current_file != Some(file) {
                    if current_file.is_some() {
                        lines_out.push(String::new());
                    }
                    lines_out.push(file.to_string());
                    current_file = Some(file);
                }
                lines_out.push(rest.to_string());
            }
            Some(RgLine::Separator) | None => {}
        }
    }

    let mut out = format!("Found {total_matches} matching lines");
    if !lines_out.is_empty() {
        out.push('\n');
        out.push('\n');
        out.push_str(&lines_out.join("\n"));
    }
    out
}

pub(crate) fn format_files(stdout: &str, head_limit: Option<usize>) -> String {
    let files: Vec<&str> = stdout.lines().filter(|l| !l.is_empty()).collect();
    let total = files.len();
    let shown: Vec<&str> = match head_limit {
        Some(l) => files.into_iter().take(l).collect(),
        None => files,
    };
    let mut out = format!("Found {total} files");
    if !shown.is_empty() {
        out.push('\n');
        out.push('\n');
        out.push_str(&shown.join("\n"));
    }
    out
}

pub(crate) fn format_counts(stdout: &str, head_limit: Option<usize>) -> String {
    let rows: Vec<&str> = stdout.lines().filter(|l| !l.is_empty()).collect();
    let total: usize = rows
        .iter()
        .filter_map(|l| l.rsplit(':').next()?.parse::<usize>().ok())
        .sum();
    let shown: Vec<&str> = match head_limit {
        Some(l) => rows.into_iter().take(l).collect(),
        None => rows,
    };
    let mut out = format!("Found {total} matching lines");
    if !shown.is_empty() {
        out.push('\n');
        out.push('\n');
        out.push_str(&shown.join("\n"));
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
