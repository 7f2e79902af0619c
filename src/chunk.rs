//! Word-window text chunker.
//!
//! Splits normalized document text into bounded-length segments with a
//! fixed overlap. Boundaries are a pure function of the input text and the
//! window parameters, and each piece gets a deterministic id derived from
//! the document content hash and the piece index — so re-chunking identical
//! content always produces the identical id set.

use crate::models::chunk_id;

/// A chunk boundary produced by [`split_words`], before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPiece {
    pub id: String,
    pub index: i64,
    pub text: String,
}

/// Split `text` into word windows of `chunk_words` words, each window
/// starting `chunk_words - overlap_words` words after the previous one.
///
/// `overlap_words` must be smaller than `chunk_words` (validated at config
/// load). Empty input yields no chunks.
pub fn split_words(
    content_hash: &str,
    text: &str,
    chunk_words: usize,
    overlap_words: usize,
) -> Vec<ChunkPiece> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let step = chunk_words.saturating_sub(overlap_words).max(1);
    let mut pieces = Vec::new();
    let mut start = 0usize;
    let mut index: i64 = 0;

    while start < words.len() {
        let end = (start + chunk_words).min(words.len());
        let segment = words[start..end].join(" ");
        pieces.push(ChunkPiece {
            id: chunk_id(content_hash, index),
            index,
            text: segment,
        });
        index += 1;
        if end == words.len() {
            break;
        }
        start += step;
    }

    pieces
}
