//! Vector store abstraction for Site Chat.
//!
//! A [`VectorStore`] holds the embeddings of every chunk of exactly one
//! session, together with the chunk metadata needed for citations. Stores
//! are append-only until [`destroy`](VectorStore::destroy), after which every
//! operation fails with [`IndexError::NotFound`] instead of returning stale
//! or silently empty results.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::models::Chunk;
use crate::search::ScoredChunk;

/// Errors raised by [`VectorStore`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The index was destroyed or its artifacts are gone.
    #[error("index not found")]
    NotFound,
    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("got {chunks} chunks but {vectors} vectors")]
    LengthMismatch { chunks: usize, vectors: usize },
    #[error("index storage error: {0}")]
    Storage(String),
}

/// Abstract per-session vector index.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](VectorStore::insert) | Append chunks with their embedding vectors |
/// | [`query`](VectorStore::query) | Top-k cosine similarity search |
/// | [`count`](VectorStore::count) | Number of stored vectors |
/// | [`destroy`](VectorStore::destroy) | Release all vectors and on-disk artifacts |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Append `chunks`, pairing each with the vector at the same position.
    ///
    /// Every vector must have the same dimensionality as those already
    /// stored. Vectors are never mutated after insertion.
    async fn insert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), IndexError>;

    /// Return the `k` most similar chunks in descending score order, ties
    /// broken by insertion order.
    async fn query(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError>;

    /// Number of stored vectors.
    async fn count(&self) -> Result<usize, IndexError>;

    /// Release every vector and artifact held by this index.
    ///
    /// Destroying an already destroyed index returns [`IndexError::NotFound`].
    async fn destroy(&self) -> Result<(), IndexError>;
}

/// Check that every vector in `vectors` has `expected` dimensions (or agree
/// with each other when `expected` is `None`), returning the common width.
pub fn check_dims(
    expected: Option<usize>,
    vectors: &[Vec<f32>],
) -> Result<Option<usize>, IndexError> {
    let mut dims = expected;
    for v in vectors {
        match dims {
            Some(d) if d != v.len() => {
                return Err(IndexError::DimensionMismatch {
                    expected: d,
                    actual: v.len(),
                })
            }
            Some(_) => {}
            None => dims = Some(v.len()),
        }
    }
    Ok(dims)
}
