// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Unified-diff rendering via the external `diff` binary.
//!
//! Every failure path returns `None`: a successful edit must never be masked
//! by a cosmetic diff failure (missing binary, tempfile trouble, odd exit
//! code).  Callers simply omit the diff.

use std::io::Write;

use tracing::debug;

/// Render `diff -u old new`, with the header paths normalized to the
/// workspace-relative `rel_path`.  Returns `None` when the contents are
/// identical or the diff could not be produced.
pub async fn unified_diff(old: &str, new: &str, rel_path: &str) -> Option<String> {
    if old == new {
        return None;
    }
    let (old_file, new_file) = match (write_temp(old), write_temp(new)) {
        (Some(a), Some(b)) => (a, b),
        _ => return None,
    };

    let output = tokio::process::Command::new("diff")
        .arg("-u")
        .arg(old_file.path())
        .arg(new_file.path())
        .output()
        .await;

    let output = match output {
        Ok(o) => o,
        Err(e) => {
            debug!(error = %e, "diff binary unavailable; omitting diff");
            return None;
        }
    };
    // Exit status 1 means "files differ"; anything above is trouble.
    if output.status.code().map_or(true, |c| c > 1) {
        return None;
    }
    let raw = String::from_utf8_lossy(&output.stdout);
    if raw.trim().is_empty() {
        return None;
    }
    Some(normalize_headers(&raw, rel_path))
}

fn write_temp(content: &str) -> Option<tempfile::NamedTempFile> {
    let mut f = tempfile::NamedTempFile::new().ok()?;
    f.write_all(content.as_bytes()).ok()?;
    f.flush().ok()?;
    Some(f)
}

/// Replace the tempfile paths in the `---`/`+++` header lines with the
/// workspace-relative path.
pub(crate) fn normalize_headers(diff: &str, rel_path: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for (i, line) in diff.lines().enumerate() {
        if i == 0 && line.starts_with("--- ") {
            out.push(format!("--- {rel_path}"));
        } else if i == 1 && line.starts_with("+++ ") {
            out.push(format!("+++ {rel_path}"));
        } else {
            out.push(line.to_string());
        }
    }
    let mut s = out.join("\n");
    if diff.ends_with('\n') {
        s.push('\n');
    }
    s
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
