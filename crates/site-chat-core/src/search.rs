//! Nearest-neighbour ranking shared by every [`VectorStore`](crate::store::VectorStore)
//! backend.
//!
//! Similarity is cosine (see [`cosine_similarity`]) and is never swapped
//! for another metric: scores from different backends are comparable.
//!
//! # Ordering
//!
//! 1. Score every stored vector against the query.
//! 2. Sort by score, descending.
//! 3. Break ties by insertion position, ascending (the sort is stable).
//! 4. Truncate to `k`.

use serde::Serialize;

use crate::embedding::cosine_similarity;
use crate::models::Chunk;

/// A retrieved chunk with its cosine similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}

/// Rank stored vectors against `query` and return the top `k` as
/// `(insertion_position, score)` pairs.
///
/// `vectors` must yield vectors in insertion order; the returned positions
/// index into that sequence.
pub fn rank_top_k<'a, I>(query: &[f32], vectors: I, k: usize) -> Vec<(usize, f32)>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(usize, f32)> = vectors
        .into_iter()
        .enumerate()
        .map(|(pos, v)| (pos, cosine_similarity(query, v)))
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}

/// Source URLs of `results`, deduplicated, in order of first appearance.
pub fn cited_sources(results: &[ScoredChunk]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for r in results {
        if !seen.iter().any(|u| u == &r.chunk.source_url) {
            seen.push(r.chunk.source_url.clone());
        }
    }
    seen
}
