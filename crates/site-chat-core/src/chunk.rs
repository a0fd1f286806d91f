//! Sliding-window text chunker.
//!
//! Splits a page's extracted text into overlapping, fixed-size windows. The
//! unit is the Unicode scalar value (`char`), so a window never splits a code
//! point and sizes are independent of the UTF-8 byte length.
//!
//! # Algorithm
//!
//! With `step = chunk_size - overlap`, window `i` starts at character
//! `i × step` and spans `chunk_size` characters; the last window is truncated
//! to the remaining text. Splitting stops at the first window that reaches
//! the end of the text, so:
//!
//! - text of length `L ≤ chunk_size` yields exactly one chunk (the full text,
//!   including the empty string),
//! - longer text yields `ceil((L - overlap) / step)` chunks.
//!
//! Dropping the first `overlap` characters of every chunk after the first and
//! concatenating the rest reconstructs the original text exactly (see
//! [`reassemble`]).
//!
//! # Example
//!
//! ```rust
//! use site_chat_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("https://example.com/", "abcdefghij", 4, 1).unwrap();
//! let windows: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
//! assert_eq!(windows, vec!["abcd", "defg", "ghij"]);
//! ```

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};

use crate::models::{Chunk, Page};

/// Chunk a crawled [`Page`], tagging every window with the page URL.
pub fn chunk_page(page: &Page, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    chunk_text(&page.url, &page.text, chunk_size, overlap)
}

/// Split `text` into overlapping windows of `chunk_size` characters.
///
/// # Errors
///
/// Returns an error unless `0 ≤ overlap < chunk_size`.
pub fn chunk_text(
    source_url: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    validate(chunk_size, overlap)?;
    let step = chunk_size - overlap;

    // Byte offset of every char boundary, plus the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let n_chars = bounds.len() - 1;

    let mut chunks = Vec::with_capacity(expected_chunk_count(n_chars, chunk_size, overlap));
    let mut start = 0usize;
    let mut index: i64 = 0;
    loop {
        let end = (start + chunk_size).min(n_chars);
        chunks.push(make_chunk(source_url, index, &text[bounds[start]..bounds[end]]));
        if end == n_chars {
            break;
        }
        start += step;
        index += 1;
    }

    Ok(chunks)
}

/// Number of windows [`chunk_text`] produces for text of `len` characters.
pub fn expected_chunk_count(len: usize, chunk_size: usize, overlap: usize) -> usize {
    if len <= chunk_size || chunk_size <= overlap {
        return 1;
    }
    let step = chunk_size - overlap;
    (len - overlap).div_ceil(step)
}

/// Rebuild the original text from chunks in `chunk_index` order by dropping
/// the leading `overlap` characters of every chunk after the first.
pub fn reassemble(chunks: &[Chunk], overlap: usize) -> String {
    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.chunk_index);

    let mut out = String::new();
    for (i, chunk) in ordered.iter().enumerate() {
        if i == 0 {
            out.push_str(&chunk.text);
        } else {
            out.extend(chunk.text.chars().skip(overlap));
        }
    }
    out
}

fn validate(chunk_size: usize, overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        bail!("chunk_size must be > 0");
    }
    if overlap >= chunk_size {
        bail!(
            "overlap ({}) must be smaller than chunk_size ({})",
            overlap,
            chunk_size
        );
    }
    Ok(())
}

/// Deterministic chunk id: the first 32 hex chars of `sha256(url ‖ index)`.
fn chunk_id(source_url: &str, index: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_url.as_bytes());
    hasher.update(index.to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

fn make_chunk(source_url: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: chunk_id(source_url, index),
        source_url: source_url.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
