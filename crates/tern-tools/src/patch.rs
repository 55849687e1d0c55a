// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The envelope-delimited patch format.
//!
//! ```text
//! *** Begin Patch
//! *** Add File: path/to/new.rs
//! +line one
//! +line two
//! *** Update File: path/to/existing.rs
//! @@ optional context hint
//!  context line
//! -removed line
//! +added line
//! *** Delete File: path/to/old.rs
//! *** End Patch
//! ```
//!
//! Update hunks are located by contextual anchoring, never by line numbers:
//! the `@@` hint (first equal line, then first containing line), a
//! contiguous old-sequence match when the hunk carries no context lines, or
//! per-line matching with leading-whitespace tolerance and a bounded forward
//! search.  The parse and apply layers are pure; filesystem access stays in
//! the `apply_patch` tool.

use thiserror::Error;

pub const BEGIN_MARKER: &str = "*** Begin Patch";
pub const END_MARKER: &str = "*** End Patch";
const ADD_PREFIX: &str = "*** Add File: ";
const UPDATE_PREFIX: &str = "*** Update File: ";
const DELETE_PREFIX: &str = "*** Delete File: ";
const EOF_MARKER: &str = "*** End of File";

/// How far ahead a context or removal line may be found before the hunk is
/// declared unanchored.
const SEARCH_WINDOW: usize = 50;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("'{BEGIN_MARKER}' not found at the start of the patch")]
    MissingBegin,
    #[error("'{END_MARKER}' not found at the end of the patch")]
    MissingEnd,
    #[error("Add File {0}: no '+' content lines")]
    EmptyAddFile(String),
    #[error("Add File {0}: content line not prefixed with '+': {1:?}")]
    BadAddLine(String, String),
    #[error("unexpected directive inside patch: {0:?}")]
    UnexpectedDirective(String),
    #[error("context not found: {0:?}")]
    ContextNotFound(String),
    #[error("removal target not found: {0:?}")]
    RemovalNotFound(String),
    #[error("hunk old-sequence not found near cursor")]
    SequenceNotFound,
}

/// One line of an update hunk.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchLine {
    /// Unchanged line (leading space in the patch).
    Context(String),
    /// Line to insert.
    Add(String),
    /// Line to remove.
    Del(String),
    /// A completely blank patch line: context in per-line mode, part of both
    /// sequences in no-context mode.
    Blank,
}

/// One `@@`-introduced hunk.
#[derive(Debug, Clone)]
pub struct UpdateBlock {
    /// Trimmed text after `@@`, empty for a bare `@@`.
    pub hint: String,
    pub lines: Vec<PatchLine>,
}

impl UpdateBlock {
    fn has_context(&self) -> bool {
        self.lines.iter().any(|l| matches!(l, PatchLine::Context(_)))
    }
}

#[derive(Debug, Clone)]
pub enum FileOp {
    Add {
        path: String,
        content: String,
    },
    Update {
        path: String,
        blocks: Vec<UpdateBlock>,
    },
    Delete {
        path: String,
    },
}

impl FileOp {
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. } | Self::Update { path, .. } | Self::Delete { path } => path,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Patch {
    pub ops: Vec<FileOp>,
}

// ─── Parsing ──────────────────────────────────────────────────────────────────

/// Parse the full envelope.  The first line must be `*** Begin Patch` and
/// the last `*** End Patch`.
pub fn parse_patch(input: &str) -> Result<Patch, PatchError> {
    let trimmed = input.trim();
    let mut lines = trimmed.lines().collect::<Vec<_>>();
    if lines.first().map(|l| l.trim_end()) != Some(BEGIN_MARKER) {
        return Err(PatchError::MissingBegin);
    }
    if lines.last().map(|l| l.trim_end()) != Some(END_MARKER) {
        return Err(PatchError::MissingEnd);
    }
    lines = lines[1..lines.len() - 1].to_vec();

    let mut ops: Vec<FileOp> = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if let Some(path) = line.strip_prefix(ADD_PREFIX) {
            let (content, next) = parse_add_content(&lines, i + 1, path.trim())?;
            ops.push(FileOp::Add {
                path: path.trim().to_string(),
                content,
            });
            i = next;
        } else if let Some(path) = line.strip_prefix(UPDATE_PREFIX) {
            let (blocks, next) = parse_update_blocks(&lines, i + 1)?;
            ops.push(FileOp::Update {
                path: path.trim().to_string(),
                blocks,
            });
            i = next;
        } else if let Some(path) = line.strip_prefix(DELETE_PREFIX) {
            ops.push(FileOp::Delete {
                path: path.trim().to_string(),
            });
            i += 1;
        } else if line.trim().is_empty() {
            i += 1;
        } else {
            return Err(PatchError::UnexpectedDirective(line.to_string()));
        }
    }
    Ok(Patch { ops })
}

fn is_directive(line: &str) -> bool {
    line.starts_with("*** ")
}

/// Collect `+`-prefixed content lines for an Add File section.
/// Every non-directive line must carry the `+` prefix; the joined content
/// has no trailing newline.
fn parse_add_content(
    lines: &[&str],
    start: usize,
    path: &str,
) -> Result<(String, usize), PatchError> {
    let mut content: Vec<&str> = Vec::new();
    let mut has_plus_line = false;
    let mut i = start;
    while i < lines.len() && !is_directive(lines[i]) {
        match lines[i].strip_prefix('+') {
            Some(rest) => {
                content.push(rest);
                has_plus_line = true;
            }
            // A bare empty line stands for a blank line in the file.
            None if lines[i].is_empty() => content.push(""),
            None => {
                return Err(PatchError::BadAddLine(
                    path.to_string(),
                    lines[i].to_string(),
                ))
            }
        }
        i += 1;
    }
    if !has_plus_line {
        return Err(PatchError::EmptyAddFile(path.to_string()));
    }
    Ok((content.join("\n"), i))
}

/// Collect `@@` hunks for an Update File section.  A known `*** ` directive
/// terminates the section; an unknown one is a hard failure (nested
/// directives mean a malformed patch).
fn parse_update_blocks(
    lines: &[&str],
    start: usize,
) -> Result<(Vec<UpdateBlock>, usize), PatchError> {
    let mut blocks: Vec<UpdateBlock> = Vec::new();
    let mut current: Option<UpdateBlock> = None;
    let mut i = start;

    while i < lines.len() {
        let line = lines[i];
        if is_directive(line) {
            if line.trim_end() == EOF_MARKER {
                i += 1;
                continue;
            }
            if line.starts_with(ADD_PREFIX)
                || line.starts_with(UPDATE_PREFIX)
                || line.starts_with(DELETE_PREFIX)
            {
                break;
            }
            return Err(PatchError::UnexpectedDirective(line.to_string()));
        }
        if let Some(rest) = line.strip_prefix("@@") {
            if let Some(b) = current.take() {
                blocks.push(b);
            }
            current = Some(UpdateBlock {
                hint: rest.trim().to_string(),
                lines: Vec::new(),
            });
            i += 1;
            continue;
        }
        let block = current.get_or_insert_with(|| UpdateBlock {
            hint: String::new(),
            lines: Vec::new(),
        });
        if line.is_empty() {
            block.lines.push(PatchLine::Blank);
        } else if let Some(rest) = line.strip_prefix('+') {
            block.lines.push(PatchLine::Add(rest.to_string()));
        } else if let Some(rest) = line.strip_prefix('-') {
            block.lines.push(PatchLine::Del(rest.to_string()));
        } else if let Some(rest) = line.strip_prefix(' ') {
            block.lines.push(PatchLine::Context(rest.to_string()));
        } else {
            // Models routinely drop the leading space from context lines.
            block.lines.push(PatchLine::Context(line.to_string()));
        }
        i += 1;
    }
    if let Some(b) = current.take() {
        blocks.push(b);
    }
    Ok((blocks, i))
}

// ─── Application ──────────────────────────────────────────────────────────────

/// Leading-whitespace-tolerant line comparison.
fn line_matches(file_line: &str, patch_line: &str) -> bool {
    file_line == patch_line || file_line.trim_start() == patch_line.trim_start()
}

fn find_line<F: Fn(&str) -> bool>(lines: &[String], from: usize, window: usize, pred: F) -> Option<usize> {
    let end = (from + window).min(lines.len());
    (from..end).find(|&i| pred(&lines[i]))
}

/// Apply all hunks of one Update section to `content`.
///
/// The cursor persists across blocks so consecutive hunks anchor forward
/// through the file in order.
pub fn apply_update(content: &str, blocks: &[UpdateBlock]) -> Result<String, PatchError> {
    let had_trailing_newline = content.ends_with('\n');
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let mut cursor: usize = 0;

    for block in blocks {
        if !block.hint.is_empty() {
            let hint = block.hint.trim();
            let pos = lines
                .iter()
                .position(|l| l.trim() == hint)
                .or_else(|| lines.iter().position(|l| l.contains(hint)))
                .ok_or_else(|| PatchError::ContextNotFound(block.hint.clone()))?;
            cursor = pos;
        }

        if !block.has_context() && block.lines.iter().any(|l| matches!(l, PatchLine::Del(_))) {
            cursor = apply_sequence_block(&mut lines, cursor, block)?;
        } else {
            cursor = apply_per_line_block(&mut lines, cursor, block)?;
        }
    }

    let mut result = lines.join("\n");
    if had_trailing_newline {
        result.push('\n');
    }
    Ok(result)
}

/// No-context mode: the old sequence is all `-` and blank lines in order;
/// it is matched contiguously anywhere from the cursor onward and replaced
/// with the new sequence (`+` and blank lines).
fn apply_sequence_block(
    lines: &mut Vec<String>,
    cursor: usize,
    block: &UpdateBlock,
) -> Result<usize, PatchError> {
    let old_seq: Vec<String> = block
        .lines
        .iter()
        .filter_map(|l| match l {
            PatchLine::Del(s) => Some(s.clone()),
            PatchLine::Blank => Some(String::new()),
            _ => None,
        })
        .collect();
    let new_seq: Vec<String> = block
        .lines
        .iter()
        .filter_map(|l| match l {
            PatchLine::Add(s) => Some(s.clone()),
            PatchLine::Blank => Some(String::new()),
            _ => None,
        })
        .collect();

    if old_seq.is_empty() {
        // Pure insertion at the cursor.
        for (k, l) in new_seq.iter().enumerate() {
            lines.insert(cursor + k, l.clone());
        }
        return Ok(cursor + new_seq.len());
    }

    let last_start = lines.len().saturating_sub(old_seq.len());
    let start = (cursor..=last_start)
        .find(|&i| {
            old_seq
                .iter()
                .enumerate()
                .all(|(k, o)| line_matches(&lines[i + k], o))
        })
        .ok_or(PatchError::SequenceNotFound)?;

    lines.splice(start..start + old_seq.len(), new_seq.iter().cloned());
    Ok(start + new_seq.len())
}

/// Per-line mode: context lines advance the cursor with a bounded forward
/// search, deletions prefer the cursor and fall back to a forward match,
/// insertions land at the cursor.
fn apply_per_line_block(
    lines: &mut Vec<String>,
    mut cursor: usize,
    block: &UpdateBlock,
) -> Result<usize, PatchError> {
    for op in &block.lines {
        match op {
            PatchLine::Context(c) => {
                let pos = find_line(lines, cursor, SEARCH_WINDOW, |l| line_matches(l, c))
                    .ok_or_else(|| PatchError::ContextNotFound(c.clone()))?;
                cursor = pos + 1;
            }
            PatchLine::Blank => {
                // A blank context line; tolerate files where it has drifted.
                if let Some(pos) =
                    find_line(lines, cursor, SEARCH_WINDOW, |l| l.trim().is_empty())
                {
                    cursor = pos + 1;
                }
            }
            PatchLine::Del(d) => {
                if cursor < lines.len() && line_matches(&lines[cursor], d) {
                    lines.remove(cursor);
                } else {
                    let pos = find_line(lines, cursor, SEARCH_WINDOW, |l| line_matches(l, d))
                        .ok_or_else(|| PatchError::RemovalNotFound(d.clone()))?;
                    lines.remove(pos);
                    cursor = pos;
                }
            }
            PatchLine::Add(a) => {
                let at = cursor.min(lines.len());
                lines.insert(at, a.clone());
                cursor = at + 1;
            }
        }
    }
    Ok(cursor)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
