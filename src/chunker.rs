//! Split long-form text into overlapping chunks by line, targeting a
//! character budget.
//!
//! Chunk identity is deterministic: re-chunking identical content for the
//! same path yields byte-identical ids, which makes re-indexing idempotent.

use crate::hash::{fnv1a_64, sha256_hex};

/// A chunk produced by the chunker. Line numbers are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
    /// SHA-256 of the chunk text.
    pub hash: String,
}

/// Derive the stable chunk id from its addressing tuple.
fn chunk_id(path: &str, start_line: usize, end_line: usize, content_hash: &str) -> String {
    format!(
        "{:016x}",
        fnv1a_64(&format!("{path}:{start_line}:{end_line}:{content_hash}"))
    )
}

/// Split `text` into chunks of approximately `target_chars` characters with
/// up to `overlap_chars` of trailing context carried into the next chunk.
///
/// Lines are never split mid-line; every line of the input is covered by at
/// least one chunk. The next window always starts strictly after the
/// previous one, so chunking terminates even when a single line exceeds the
/// whole target budget.
pub fn chunk_text(
    text: &str,
    path: &str,
    target_chars: usize,
    overlap_chars: usize,
) -> Vec<Chunk> {
    if text.is_empty() || target_chars == 0 {
        return vec![];
    }

    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return vec![];
    }

    // Line cost includes the separator the line carried in the source.
    let line_chars: Vec<usize> = lines.iter().map(|l| l.chars().count() + 1).collect();

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < lines.len() {
        let mut end = start;
        let mut chars = 0;

        // Accumulate lines until the budget is reached. Always take at least
        // one line, even when it alone exceeds the budget.
        while end < lines.len() {
            if chars + line_chars[end] > target_chars && end > start {
                break;
            }
            chars += line_chars[end];
            end += 1;
        }

        let chunk_text: String = lines[start..end].join("\n");
        let hash = sha256_hex(&chunk_text);
        chunks.push(Chunk {
            id: chunk_id(path, start + 1, end, &hash),
            text: chunk_text,
            start_line: start + 1,
            end_line: end,
            hash,
        });

        if end >= lines.len() {
            break;
        }

        // Walk back whole lines that fit within the overlap budget, then
        // clamp so the next window starts strictly after this one.
        let mut overlap_start = end;
        let mut acc = 0;
        while overlap_start > start {
            let cost = line_chars[overlap_start - 1];
            if acc + cost > overlap_chars {
                break;
            }
            acc += cost;
            overlap_start -= 1;
        }
        start = overlap_start.max(start + 1);
    }

    chunks
}
