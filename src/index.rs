//! Index construction: open a session's store and fill it with embedded chunks.

use site_chat_core::models::Chunk;
use site_chat_core::store::memory::InMemoryStore;
use site_chat_core::store::VectorStore;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::error::{Result, SiteChatError};
use crate::provider::ModelProvider;
use crate::sqlite_store::SqliteStore;

/// Open an empty store for `session_id` on the configured backend.
pub async fn open_store(
    storage: &StorageConfig,
    session_id: &str,
    model: &str,
) -> Result<Box<dyn VectorStore>> {
    match storage.backend.as_str() {
        "memory" => Ok(Box::new(InMemoryStore::new())),
        _ => {
            let store = SqliteStore::create(&storage.dir, session_id, model)
                .await
                .map_err(|e| {
                    SiteChatError::IndexUnavailable(format!(
                        "failed to create index for session {}: {:#}",
                        session_id, e
                    ))
                })?;
            Ok(Box::new(store))
        }
    }
}

/// Embed `chunks` in batches of `batch_size` and insert them into `store`.
///
/// Returns the number of vectors stored. On any failure the store is
/// destroyed, so a partially built index is never left behind.
pub async fn build_index(
    store: &dyn VectorStore,
    chunks: &[Chunk],
    provider: &dyn ModelProvider,
    batch_size: usize,
) -> Result<usize> {
    match fill(store, chunks, provider, batch_size.max(1)).await {
        Ok(n) => {
            info!(vectors = n, model = provider.model_name(), "index built");
            Ok(n)
        }
        Err(e) => {
            if let Err(destroy_err) = store.destroy().await {
                warn!(error = %destroy_err, "failed to destroy partial index");
            }
            Err(e)
        }
    }
}

async fn fill(
    store: &dyn VectorStore,
    chunks: &[Chunk],
    provider: &dyn ModelProvider,
    batch_size: usize,
) -> Result<usize> {
    let mut stored = 0usize;
    for batch in chunks.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = provider
            .embed(&texts)
            .await
            .map_err(|e| SiteChatError::Capability(format!("embedding failed: {:#}", e)))?;
        if vectors.len() != batch.len() {
            return Err(SiteChatError::Capability(format!(
                "embedding returned {} vectors for {} chunks",
                vectors.len(),
                batch.len()
            )));
        }
        store.insert(batch, &vectors).await.map_err(|e| {
            SiteChatError::IndexUnavailable(format!("failed to store vectors: {}", e))
        })?;
        stored += batch.len();
        debug!(stored, total = chunks.len(), "embedded batch");
    }
    Ok(stored)
}
