// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Server-sent-event line buffering shared by all three dialects.
//!
//! SSE events can be split across TCP packets, and one packet can carry many
//! events.  A persistent line buffer is maintained across chunks; only
//! complete `\n`-terminated lines are surfaced.  Without this, a `data:`
//! line split mid-JSON would be silently dropped and — for parallel tool
//! calls — argument fragments would land in the wrong slot.

use futures::{Stream, StreamExt};

/// Drain all complete `\n`-terminated `data:` payloads from `buf`.
///
/// The trailing incomplete line (no `\n` yet) stays in `buf` so the next TCP
/// chunk can extend it.  `event:` lines, comments, and blank lines are
/// skipped; the `[DONE]` sentinel is surfaced verbatim so each dialect can
/// map it to its own terminal event.
pub fn drain_data_payloads(buf: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(nl) = buf.find('\n') {
        let line = buf[..nl].trim_end_matches('\r').to_string();
        *buf = buf[nl + 1..].to_string();
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if !data.is_empty() {
                payloads.push(data.to_string());
            }
        }
    }
    payloads
}

/// Wrap a reqwest byte stream into a stream of complete SSE data payloads.
pub fn data_payload_stream(
    resp: reqwest::Response,
) -> impl Stream<Item = anyhow::Result<String>> + Send {
    resp.bytes_stream()
        .scan(String::new(), |buf, chunk| {
            let items: Vec<anyhow::Result<String>> = match chunk {
                Ok(bytes) => {
                    buf.push_str(&String::from_utf8_lossy(&bytes));
                    drain_data_payloads(buf).into_iter().map(Ok).collect()
                }
                Err(e) => vec![Err(anyhow::anyhow!(e))],
            };
            std::future::ready(Some(items))
        })
        .flat_map(futures::stream::iter)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
