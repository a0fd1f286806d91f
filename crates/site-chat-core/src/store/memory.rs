//! In-memory [`VectorStore`] implementation.
//!
//! Keeps chunks and vectors in a `Vec` behind `std::sync::RwLock`. Query is
//! brute-force cosine similarity over all stored vectors. Used by the
//! `memory` storage backend and throughout the tests.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::models::Chunk;
use crate::search::{rank_top_k, ScoredChunk};

use super::{check_dims, IndexError, VectorStore};

struct Entries {
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
    dims: Option<usize>,
}

/// In-memory vector index. `None` inside the lock marks a destroyed index.
pub struct InMemoryStore {
    inner: RwLock<Option<Entries>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Some(Entries {
                chunks: Vec::new(),
                vectors: Vec::new(),
                dims: None,
            })),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> IndexError {
    IndexError::Storage("in-memory index lock poisoned".to_string())
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn insert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        if chunks.len() != vectors.len() {
            return Err(IndexError::LengthMismatch {
                chunks: chunks.len(),
                vectors: vectors.len(),
            });
        }
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        let entries = guard.as_mut().ok_or(IndexError::NotFound)?;
        entries.dims = check_dims(entries.dims, vectors)?;
        entries.chunks.extend_from_slice(chunks);
        entries.vectors.extend_from_slice(vectors);
        Ok(())
    }

    async fn query(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        let entries = guard.as_ref().ok_or(IndexError::NotFound)?;
        if let Some(d) = entries.dims {
            if d != query_vec.len() {
                return Err(IndexError::DimensionMismatch {
                    expected: d,
                    actual: query_vec.len(),
                });
            }
        }
        let ranked = rank_top_k(query_vec, entries.vectors.iter().map(|v| v.as_slice()), k);
        Ok(ranked
            .into_iter()
            .map(|(pos, score)| ScoredChunk {
                chunk: entries.chunks[pos].clone(),
                score,
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        guard
            .as_ref()
            .map(|e| e.vectors.len())
            .ok_or(IndexError::NotFound)
    }

    async fn destroy(&self) -> Result<(), IndexError> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        match guard.take() {
            Some(_) => Ok(()),
            None => Err(IndexError::NotFound),
        }
    }
}
