//! SQLite-backed per-session [`VectorStore`].
//!
//! Each session owns one directory, `<storage.dir>/<session_id>/`, holding a
//! single `index.sqlite` file. Chunks and their embeddings share one table;
//! vectors are little-endian `f32` BLOBs and similarity is computed in Rust
//! over all rows.
//!
//! Teardown closes the pool, renames the directory to
//! `<session_id>.deleting-<uuid>` and only then removes it. After the rename
//! nothing is reachable under the session id, so a crash mid-delete cannot
//! leave a queryable index behind; [`sweep_storage`] removes the leftovers.
//!
//! A store dropped without being destroyed (an abandoned crawl, a store that
//! never reached the registry) removes its directory synchronously in `Drop`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use site_chat_core::embedding::{blob_to_vec, vec_to_blob};
use site_chat_core::models::Chunk;
use site_chat_core::search::{rank_top_k, ScoredChunk};
use site_chat_core::store::{check_dims, IndexError, VectorStore};
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{db, migrate};

const DB_FILE: &str = "index.sqlite";
const DELETING_MARKER: &str = ".deleting-";

pub struct SqliteStore {
    dir: PathBuf,
    /// `None` once destroyed.
    pool: RwLock<Option<SqlitePool>>,
}

impl SqliteStore {
    /// Create a fresh index for `session_id` under `root`.
    ///
    /// Fails if the session directory already exists.
    pub async fn create(root: &Path, session_id: &str, model: &str) -> Result<Self> {
        let dir = root.join(session_id);
        if dir.exists() {
            bail!("index directory already exists: {}", dir.display());
        }

        let pool = db::connect(&dir.join(DB_FILE)).await?;
        migrate::run_migrations(&pool)
            .await
            .context("Failed to initialize index schema")?;
        sqlx::query("INSERT OR REPLACE INTO meta (key, value) VALUES ('model', ?)")
            .bind(model)
            .execute(&pool)
            .await?;

        debug!(dir = %dir.display(), "index created");
        Ok(Self {
            dir,
            pool: RwLock::new(Some(pool)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn storage(err: impl std::fmt::Display) -> IndexError {
    IndexError::Storage(err.to_string())
}

async fn stored_dims(pool: &SqlitePool) -> Result<Option<usize>, IndexError> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = 'dims'")
        .fetch_optional(pool)
        .await
        .map_err(storage)?;
    match value {
        Some(v) => v
            .parse::<usize>()
            .map(Some)
            .map_err(|_| IndexError::Storage(format!("corrupt dims entry: {}", v))),
        None => Ok(None),
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn insert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        if chunks.len() != vectors.len() {
            return Err(IndexError::LengthMismatch {
                chunks: chunks.len(),
                vectors: vectors.len(),
            });
        }
        let guard = self.pool.read().await;
        let pool = guard.as_ref().ok_or(IndexError::NotFound)?;

        let dims = check_dims(stored_dims(pool).await?, vectors)?;

        let mut tx = pool.begin().await.map_err(storage)?;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, source_url, chunk_index, text, hash, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.source_url)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }
        if let Some(d) = dims {
            sqlx::query("INSERT OR REPLACE INTO meta (key, value) VALUES ('dims', ?)")
                .bind(d.to_string())
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        }
        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    async fn query(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        let guard = self.pool.read().await;
        let pool = guard.as_ref().ok_or(IndexError::NotFound)?;
        if !self.dir.join(DB_FILE).exists() {
            return Err(IndexError::Storage(format!(
                "index file missing from {}",
                self.dir.display()
            )));
        }

        if let Some(d) = stored_dims(pool).await? {
            if d != query_vec.len() {
                return Err(IndexError::DimensionMismatch {
                    expected: d,
                    actual: query_vec.len(),
                });
            }
        }

        let rows = sqlx::query(
            "SELECT id, source_url, chunk_index, text, hash, embedding FROM chunks ORDER BY seq",
        )
        .fetch_all(pool)
        .await
        .map_err(storage)?;

        let mut chunks = Vec::with_capacity(rows.len());
        let mut vectors = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding").map_err(storage)?;
            let vector = blob_to_vec(&blob)
                .ok_or_else(|| IndexError::Storage("corrupt embedding blob".to_string()))?;
            vectors.push(vector);
            chunks.push(Chunk {
                id: row.try_get("id").map_err(storage)?,
                source_url: row.try_get("source_url").map_err(storage)?,
                chunk_index: row.try_get("chunk_index").map_err(storage)?,
                text: row.try_get("text").map_err(storage)?,
                hash: row.try_get("hash").map_err(storage)?,
            });
        }

        let ranked = rank_top_k(query_vec, vectors.iter().map(|v| v.as_slice()), k);
        Ok(ranked
            .into_iter()
            .map(|(pos, score)| ScoredChunk {
                chunk: chunks[pos].clone(),
                score,
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let guard = self.pool.read().await;
        let pool = guard.as_ref().ok_or(IndexError::NotFound)?;
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(pool)
            .await
            .map_err(storage)?;
        Ok(n as usize)
    }

    async fn destroy(&self) -> Result<(), IndexError> {
        let mut guard = self.pool.write().await;
        let pool = guard.take().ok_or(IndexError::NotFound)?;
        pool.close().await;

        if !self.dir.exists() {
            return Ok(());
        }
        let doomed = tombstone_path(&self.dir);
        tokio::fs::rename(&self.dir, &doomed)
            .await
            .map_err(|e| IndexError::Storage(format!("rename {}: {}", self.dir.display(), e)))?;
        if let Err(e) = tokio::fs::remove_dir_all(&doomed).await {
            warn!(dir = %doomed.display(), error = %e, "index removal incomplete; will be swept at startup");
        }
        info!(dir = %self.dir.display(), "index destroyed");
        Ok(())
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if self.pool.get_mut().is_none() || !self.dir.exists() {
            return;
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(dir = %self.dir.display(), "dropped index removed"),
            Err(e) => warn!(dir = %self.dir.display(), error = %e, "failed to remove dropped index"),
        }
    }
}

fn tombstone_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.with_file_name(format!(
        "{}{}{}",
        name,
        DELETING_MARKER,
        uuid::Uuid::new_v4().simple()
    ))
}

/// Remove index directories left by a previous process: half-deleted
/// tombstones and orphaned session directories (sessions do not survive a
/// restart). Only names that are session ids or tombstones of one are touched.
pub async fn sweep_storage(root: &Path) -> Result<usize> {
    if !root.exists() {
        return Ok(0);
    }
    let mut removed = 0usize;
    let mut entries = tokio::fs::read_dir(root)
        .await
        .with_context(|| format!("Failed to read storage dir {}", root.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let session_part = name.split(DELETING_MARKER).next().unwrap_or("");
        if uuid::Uuid::parse_str(session_part).is_err() {
            continue;
        }
        match tokio::fs::remove_dir_all(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(dir = %entry.path().display(), error = %e, "failed to sweep index dir"),
        }
    }

    if removed > 0 {
        info!(removed, root = %root.display(), "swept stale index directories");
    }
    Ok(removed)
}
