//! Paragraph-boundary text chunker for company documents.
//!
//! Splits a document body into [`Chunk`]s that respect a `max_tokens`
//! budget, preferring paragraph boundaries (`\n\n`) so retrieved context
//! stays coherent. Each chunk carries a SHA-256 hash of its text for
//! embedding-staleness detection.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate chars-per-token ratio used for budgeting.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks on paragraph boundaries, respecting max_tokens.
/// Returns chunks with contiguous indices starting at 0.
pub fn chunk_text(document_id: &str, text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;

    if text.trim().is_empty() {
        return vec![make_chunk(document_id, 0, "")];
    }

    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut index: i64 = 0;

    let flush = |buf: &mut String, index: &mut i64, chunks: &mut Vec<Chunk>| {
        if !buf.is_empty() {
            chunks.push(make_chunk(document_id, *index, buf));
            *index += 1;
            buf.clear();
        }
    };

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let joined_len = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };

        if joined_len > max_chars {
            flush(&mut buf, &mut index, &mut chunks);
        }

        if para.len() > max_chars {
            // Oversized paragraph: hard-split near the budget, preferring
            // newline or space boundaries.
            let mut rest = para;
            while !rest.is_empty() {
                let cut = split_point(rest, max_chars);
                chunks.push(make_chunk(document_id, index, rest[..cut].trim()));
                index += 1;
                rest = &rest[cut..];
            }
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(para);
        }
    }

    flush(&mut buf, &mut index, &mut chunks);

    if chunks.is_empty() {
        chunks.push(make_chunk(document_id, 0, ""));
    }

    chunks
}

fn split_point(text: &str, max_chars: usize) -> usize {
    if text.len() <= max_chars {
        return text.len();
    }
    let mut limit = max_chars;
    while !text.is_char_boundary(limit) {
        limit -= 1;
    }
    text[..limit]
        .rfind('\n')
        .or_else(|| text[..limit].rfind(' '))
        .map(|pos| pos + 1)
        .unwrap_or(limit)
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_yields_single_chunk() {
        let chunks = chunk_text("d1", "", 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "");
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("d1", "Reset your password from the login page.", 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Reset your password from the login page.");
    }

    #[test]
    fn test_paragraphs_grouped_under_budget() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text("d1", text, 100);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("First"));
        assert!(chunks[0].text.contains("Third"));
    }

    #[test]
    fn test_split_on_paragraph_boundary() {
        // max_tokens=10 → 40 chars; each paragraph ~30 chars, so one each.
        let text = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n\nbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
        let chunks = chunk_text("d1", text, 10);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with('a'));
        assert!(chunks[1].text.starts_with('b'));
    }

    #[test]
    fn test_oversized_paragraph_hard_split() {
        let text = "x".repeat(200);
        let chunks = chunk_text("d1", &text, 10); // 40-char budget
        assert!(chunks.len() >= 5);
        for chunk in &chunks {
            assert!(chunk.text.len() <= 40);
        }
    }

    #[test]
    fn test_indices_contiguous() {
        let text = "one\n\ntwo\n\nthree\n\nfour";
        let chunks = chunk_text("d1", text, 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as i64);
        }
    }

    #[test]
    fn test_hash_tracks_text() {
        let a = chunk_text("d1", "same text", 100);
        let b = chunk_text("d2", "same text", 100);
        assert_eq!(a[0].hash, b[0].hash);

        let c = chunk_text("d1", "different text", 100);
        assert_ne!(a[0].hash, c[0].hash);
    }
}
