// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Marker-based file editing.
//!
//! `code_edit` is the new shape of the file with unchanged stretches elided
//! behind marker lines (`// ... existing code ...`, `#` and `<!--` comment
//! styles too).  Splitting on the markers yields ordered segments; each
//! segment is located in the original file and the text between located
//! regions is preserved verbatim.
//!
//! Locating tries, in order: exact substring match, an anchor on the first
//! three non-blank lines, an anchor on any single line, and a structural
//! `prefix =` match for assignment-shaped lines.  A middle segment that
//! cannot be located inherits its bounds from the regions of its neighbors
//! (the common case: a fully rewritten body between untouched header and
//! footer).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::diff::unified_diff;
use crate::tool::{decode_args, Tool, ToolCall, ToolContext, ToolOutput};

/// Anchor length for the first-lines strategy.
const ANCHOR_LINES: usize = 3;

pub struct EditFileTool;

#[derive(Debug, Deserialize)]
struct EditFileArgs {
    target_file: String,
    #[serde(default)]
    #[allow(dead_code)]
    instructions: String,
    code_edit: String,
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by example: code_edit is the new file content with \
         unchanged regions elided behind '// ... existing code ...' marker \
         lines ('#' and '<!--' comments work too). Keep enough surrounding \
         lines for each edited region to be located unambiguously. \
         Creates the file when it does not exist."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target_file": {
                    "type": "string",
                    "description": "Path of the file to edit or create"
                },
                "instructions": {
                    "type": "string",
                    "description": "One sentence describing the edit"
                },
                "code_edit": {
                    "type": "string",
                    "description": "New content with elided regions marked '// ... existing code ...'"
                }
            },
            "required": ["target_file", "instructions", "code_edit"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let args: EditFileArgs = match decode_args(call) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        debug!(path = %args.target_file, "edit_file tool");

        let existing = match tokio::fs::read_to_string(&args.target_file).await {
            Ok(c) => Some(c),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };

        let (new_content, created) = match &existing {
            None => {
                // New file: markers make no sense, drop them.
                let content: Vec<&str> = args
                    .code_edit
                    .lines()
                    .filter(|l| !is_marker_line(l))
                    .collect();
                (content.join("\n"), true)
            }
            Some(original) => match apply_code_edit(original, &args.code_edit) {
                Ok(c) => (c, false),
                Err(e) => return ToolOutput::err(&call.id, e),
            },
        };

        if created {
            if let Some(parent) = std::path::Path::new(&args.target_file).parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = tokio::fs::create_dir_all(parent).await {
                        return ToolOutput::err(
                            &call.id,
                            format!("cannot create {}: {e}", parent.display()),
                        );
                    }
                }
            }
        }

        if let Some(original) = &existing {
            let mut session = ctx.session.lock().await;
            let _ = session.record_file_original(&args.target_file, original);
        }

        if let Err(e) = tokio::fs::write(&args.target_file, &new_content).await {
            return ToolOutput::err(&call.id, format!("write error: {e}"));
        }

        let diff =
            unified_diff(existing.as_deref().unwrap_or(""), &new_content, &args.target_file).await;
        ToolOutput::ok(&call.id, json!({ "success": true, "created": created }))
            .with_diff(diff, None)
    }
}

// ─── Marker handling ──────────────────────────────────────────────────────────

/// A marker line elides existing code: `// ... existing code ...` and the
/// `#` / `<!--` comment forms.
pub(crate) fn is_marker_line(line: &str) -> bool {
    let t = line.trim();
    let body = if let Some(rest) = t.strip_prefix("//") {
        rest
    } else if let Some(rest) = t.strip_prefix("<!--") {
        rest.strip_suffix("-->").unwrap_or(rest)
    } else if let Some(rest) = t.strip_prefix('#') {
        rest
    } else {
        return false;
    };
    let body = body.trim();
    body.starts_with("...") && body.ends_with("...") && body.contains("existing code")
}

#[derive(Debug)]
struct EditPlan {
    /// Whether the edit begins/ends with a marker (existing code elided
    /// before the first / after the last segment).
    leading_marker: bool,
    trailing_marker: bool,
    segments: Vec<Vec<String>>,
}

fn parse_code_edit(code_edit: &str) -> EditPlan {
    let mut segments: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut leading_marker = false;
    let mut trailing_marker = false;
    let mut seen_content = false;

    for line in code_edit.lines() {
        if is_marker_line(line) {
            if !seen_content {
                leading_marker = true;
            } else if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
            trailing_marker = true;
            continue;
        }
        seen_content = true;
        trailing_marker = false;
        current.push(line.to_string());
    }
    if !current.is_empty() {
        segments.push(current);
    }
    EditPlan {
        leading_marker,
        trailing_marker,
        segments,
    }
}

// ─── Segment location ─────────────────────────────────────────────────────────

/// `[start, end)` region of original lines a segment replaces.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Region {
    start: usize,
    end: usize,
}

fn lines_eq(a: &str, b: &str) -> bool {
    a == b || a.trim() == b.trim()
}

/// Strategy 1: the whole segment appears verbatim (context-only segment).
fn locate_exact(orig: &[String], seg: &[String], from: usize) -> Option<Region> {
    if seg.is_empty() || seg.len() > orig.len() {
        return None;
    }
    (from..=orig.len() - seg.len())
        .find(|&i| seg.iter().enumerate().all(|(k, s)| lines_eq(&orig[i + k], s)))
        .map(|i| Region {
            start: i,
            end: i + seg.len(),
        })
}

/// After a start anchor is fixed, close the region on the segment's last
/// non-blank line when it can be found nearby, otherwise assume an
/// equal-length region.
fn close_region(orig: &[String], seg: &[String], start: usize) -> Region {
    let last_line = seg.iter().rev().find(|l| !l.trim().is_empty());
    if let Some(last) = last_line {
        let window_end = (start + seg.len() + 50).min(orig.len());
        for i in (start..window_end).rev() {
            if lines_eq(&orig[i], last) {
                return Region { start, end: i + 1 };
            }
        }
    }
    Region {
        start,
        end: (start + seg.len()).min(orig.len()),
    }
}

/// Strategy 2: anchor on the segment's first three non-blank lines.
fn locate_first_lines(orig: &[String], seg: &[String], from: usize) -> Option<Region> {
    let anchor: Vec<&String> = seg
        .iter()
        .filter(|l| !l.trim().is_empty())
        .take(ANCHOR_LINES)
        .collect();
    if anchor.is_empty() || anchor.len() > orig.len() {
        return None;
    }
    let start = (from..=orig.len() - anchor.len()).find(|&i| {
        anchor
            .iter()
            .enumerate()
            .all(|(k, a)| lines_eq(&orig[i + k], a))
    })?;
    Some(close_region(orig, seg, start))
}

/// Strategy 3: anchor on any single segment line found in the original.
fn locate_any_line(orig: &[String], seg: &[String], from: usize) -> Option<Region> {
    for (seg_idx, line) in seg.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(pos) = (from..orig.len()).find(|&i| lines_eq(&orig[i], line)) {
            let start = pos.saturating_sub(seg_idx).max(from);
            return Some(close_region(orig, seg, start));
        }
    }
    None
}

/// Strategy 4: structural match — align on an assignment's left-hand side
/// so `let limit = 20;` locates `let limit = 10;`.
fn locate_structural(orig: &[String], seg: &[String], from: usize) -> Option<Region> {
    let (seg_idx, prefix) = seg.iter().enumerate().find_map(|(i, l)| {
        let t = l.trim();
        let eq = t.find('=')?;
        let prefix = t[..eq].trim();
        if prefix.is_empty() {
            None
        } else {
            Some((i, prefix.to_string()))
        }
    })?;
    let pos = (from..orig.len()).find(|&i| {
        let t = orig[i].trim();
        matches!(t.find('='), Some(eq) if t[..eq].trim() == prefix)
    })?;
    let start = pos.saturating_sub(seg_idx).max(from);
    Some(close_region(orig, seg, start))
}

fn locate_segment(orig: &[String], seg: &[String], from: usize) -> Option<Region> {
    locate_exact(orig, seg, from)
        .or_else(|| locate_first_lines(orig, seg, from))
        .or_else(|| locate_any_line(orig, seg, from))
        .or_else(|| locate_structural(orig, seg, from))
}

// ─── Assembly ─────────────────────────────────────────────────────────────────

/// Apply a marker-split edit to `original`.
pub(crate) fn apply_code_edit(original: &str, code_edit: &str) -> Result<String, String> {
    let plan = parse_code_edit(code_edit);
    if plan.segments.is_empty() {
        return Err("code_edit contains no content".to_string());
    }

    let orig: Vec<String> = original.lines().map(str::to_string).collect();
    let had_trailing_newline = original.ends_with('\n');

    // Without any markers the edit is the whole new file.
    if plan.segments.len() == 1 && !plan.leading_marker && !plan.trailing_marker {
        let mut out = plan.segments[0].join("\n");
        if had_trailing_newline {
            out.push('\n');
        }
        return Ok(out);
    }

    // Pass 1: locate what can be located, cursor advancing monotonically.
    let mut regions: Vec<Option<Region>> = Vec::with_capacity(plan.segments.len());
    let mut cursor = 0usize;
    for seg in &plan.segments {
        match locate_segment(&orig, seg, cursor) {
            Some(r) => {
                cursor = r.end;
                regions.push(Some(r));
            }
            None => regions.push(None),
        }
    }

    // Pass 2: infer bounds for unlocated segments from their neighbors.
    fn located_after(regions: &[Option<Region>], idx: usize) -> Option<usize> {
        regions[idx + 1..].iter().find_map(|r| r.map(|r| r.start))
    }
    let mut prev_end = 0usize;
    for i in 0..regions.len() {
        if regions[i].is_none() {
            let next_start = located_after(&regions, i);
            let region = if i == 0 && !plan.leading_marker {
                // The edit declares the file starts with this segment:
                // replace a length-matched prefix, never reaching into the
                // next located region.
                let end = plan.segments[i]
                    .len()
                    .min(next_start.unwrap_or(orig.len()))
                    .min(orig.len());
                Region { start: 0, end }
            } else if i == regions.len() - 1 && !plan.trailing_marker {
                // The edit declares the file ends with this segment:
                // replace a length-matched suffix.
                let start = orig
                    .len()
                    .saturating_sub(plan.segments[i].len())
                    .max(prev_end);
                Region {
                    start,
                    end: orig.len(),
                }
            } else {
                // Middle segment: it replaces everything between the
                // adjacent located regions.
                Region {
                    start: prev_end,
                    end: next_start.unwrap_or(prev_end),
                }
            };
            regions[i] = Some(region);
        }
        prev_end = regions[i].unwrap().end;
    }

    // Validate ordering: regions must be monotone and non-overlapping.
    let resolved: Vec<Region> = regions.into_iter().map(|r| r.unwrap()).collect();
    for pair in resolved.windows(2) {
        if pair[1].start < pair[0].end {
            return Err("could not locate code_edit segments in order; \
                        add more surrounding context lines"
                .to_string());
        }
    }

    // Assemble: preserved prefix, then segments with preserved gaps.
    let mut out_lines: Vec<String> = Vec::new();
    out_lines.extend_from_slice(&orig[..resolved[0].start]);
    for (i, seg) in plan.segments.iter().enumerate() {
        out_lines.extend(seg.iter().cloned());
        let gap_start = resolved[i].end;
        let gap_end = match resolved.get(i + 1) {
            Some(next) => next.start,
            None => orig.len(),
        };
        if i + 1 < plan.segments.len() {
            out_lines.extend_from_slice(&orig[gap_start..gap_end]);
        } else if plan.trailing_marker {
            out_lines.extend_from_slice(&orig[gap_start..]);
        }
    }

    let mut out = out_lines.join("\n");
    if had_trailing_newline {
        out.push('\n');
    }
    Ok(out)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
