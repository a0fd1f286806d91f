//! Session registry: the only path to a session's index and history.
//!
//! The registry maps session ids to [`SessionHandle`]s behind a
//! `tokio::sync::RwLock`; the map lock is held only for lookups and
//! insert/remove, never across model or index calls. Each handle owns a
//! `tokio::sync::Mutex<SessionState>`. That mutex is FIFO-fair, so chats on
//! one session run one at a time in arrival order while different sessions
//! proceed in parallel.
//!
//! # Lifecycle
//!
//! ```text
//! create ──► ACTIVE ──delete / idle expiry──► DELETED (terminal)
//! ```
//!
//! Delete removes the id from the map first, then queues on the session
//! lock like any chat, destroys the store and clears the history. Chats
//! already waiting on the lock when delete arrives run to completion first.
//! A chat that fetched the handle but reaches the lock after delete sees
//! `Deleted` and fails with [`SiteChatError::SessionNotFound`]; so does any
//! lookup after the removal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use site_chat_core::models::Turn;
use site_chat_core::store::{IndexError, VectorStore};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{info, warn};

use crate::error::{Result, SiteChatError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Deleted,
}

/// Facts about the crawl that produced a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionMeta {
    pub start_url: String,
    pub pages_crawled: usize,
    pub urls_scraped: Vec<String>,
    pub chunks: usize,
    pub model: String,
}

/// Mutable state of one session, reachable only through its handle's lock.
pub struct SessionState {
    status: SessionStatus,
    store: Box<dyn VectorStore>,
    history: Vec<Turn>,
    meta: SessionMeta,
    created_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    /// Append a completed exchange. History is append-only.
    pub fn append(&mut self, turns: impl IntoIterator<Item = Turn>) {
        self.history.extend(turns);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }
}

pub struct SessionHandle {
    id: String,
    state: Mutex<SessionState>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for exclusive access (FIFO) and fail if the session was deleted
    /// while waiting.
    pub async fn lock_active(&self) -> Result<MutexGuard<'_, SessionState>> {
        let guard = self.state.lock().await;
        if guard.status == SessionStatus::Deleted {
            return Err(SiteChatError::SessionNotFound(self.id.clone()));
        }
        Ok(guard)
    }

    async fn summary(&self) -> SessionSummary {
        let state = self.state.lock().await;
        summarize(&self.id, &state)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub status: SessionStatus,
    pub start_url: String,
    pub pages_crawled: usize,
    pub chunks: usize,
    pub turns: usize,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

fn summarize(id: &str, state: &SessionState) -> SessionSummary {
    SessionSummary {
        session_id: id.to_string(),
        status: state.status,
        start_url: state.meta.start_url.clone(),
        pages_crawled: state.meta.pages_crawled,
        chunks: state.meta.chunks,
        turns: state.history.len(),
        created_at: state.created_at,
        last_active_at: state.last_active_at,
    }
}

/// Reject ids that are not UUIDs before they reach the map or the filesystem.
pub fn validate_session_id(id: &str) -> Result<()> {
    uuid::Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| SiteChatError::Input(format!("invalid session id: '{}'", id)))
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh session id for a store about to be created.
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Register an `ACTIVE` session owning `store`.
    pub async fn create(&self, id: String, meta: SessionMeta, store: Box<dyn VectorStore>) {
        let now = Utc::now();
        let handle = Arc::new(SessionHandle {
            id: id.clone(),
            state: Mutex::new(SessionState {
                status: SessionStatus::Active,
                store,
                history: Vec::new(),
                meta,
                created_at: now,
                last_active_at: now,
            }),
        });
        self.sessions.write().await.insert(id.clone(), handle);
        info!(session_id = %id, "session created");
    }

    pub async fn get(&self, id: &str) -> Result<Arc<SessionHandle>> {
        validate_session_id(id)?;
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SiteChatError::SessionNotFound(id.to_string()))
    }

    /// Tear down a session: unregister, wait for in-flight work, destroy.
    pub async fn delete(&self, id: &str) -> Result<()> {
        validate_session_id(id)?;
        let handle = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| SiteChatError::SessionNotFound(id.to_string()))?;
        let mut state = handle.state.lock().await;
        teardown(id, &mut state).await
    }

    /// Snapshot of the session's conversation history.
    pub async fn history(&self, id: &str) -> Result<Vec<Turn>> {
        let handle = self.get(id).await?;
        let state = handle.lock_active().await?;
        Ok(state.history.clone())
    }

    pub async fn summary(&self, id: &str) -> Result<SessionSummary> {
        let handle = self.get(id).await?;
        let state = handle.lock_active().await?;
        Ok(summarize(id, &state))
    }

    /// Summaries of every active session, oldest first.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let handles: Vec<Arc<SessionHandle>> =
            self.sessions.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(handle.summary().await);
        }
        out.sort_by_key(|s| s.created_at);
        out
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Delete sessions idle for longer than `max_idle`. Sessions busy with a
    /// request are skipped this round.
    pub async fn reap_expired(&self, max_idle: Duration) -> usize {
        let Ok(max_idle) = chrono::Duration::from_std(max_idle) else {
            return 0;
        };
        let cutoff = Utc::now() - max_idle;

        let expired: Vec<Arc<SessionHandle>> = {
            let mut map = self.sessions.write().await;
            let ids: Vec<String> = map
                .iter()
                .filter(|(_, handle)| {
                    handle
                        .state
                        .try_lock()
                        .map(|state| state.last_active_at < cutoff)
                        .unwrap_or(false)
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| map.remove(id)).collect()
        };

        let mut reaped = 0usize;
        for handle in expired {
            let mut state = handle.state.lock().await;
            match teardown(&handle.id, &mut state).await {
                Ok(()) => {
                    info!(session_id = %handle.id, "idle session expired");
                    reaped += 1;
                }
                Err(e) => warn!(session_id = %handle.id, error = %e, "failed to expire session"),
            }
        }
        reaped
    }
}

async fn teardown(id: &str, state: &mut SessionState) -> Result<()> {
    state.status = SessionStatus::Deleted;
    state.history.clear();
    match state.store.destroy().await {
        Ok(()) | Err(IndexError::NotFound) => {
            info!(session_id = %id, "session deleted");
            Ok(())
        }
        Err(e) => Err(SiteChatError::IndexUnavailable(format!(
            "session {} unregistered but its index could not be removed: {}",
            id, e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use site_chat_core::models::Role;
    use site_chat_core::store::memory::InMemoryStore;

    fn meta() -> SessionMeta {
        SessionMeta {
            start_url: "https://a.test/".to_string(),
            pages_crawled: 1,
            urls_scraped: vec!["https://a.test/".to_string()],
            chunks: 0,
            model: "m".to_string(),
        }
    }

    async fn registry_with_session() -> (SessionRegistry, String) {
        let registry = SessionRegistry::new();
        let id = SessionRegistry::new_id();
        registry
            .create(id.clone(), meta(), Box::new(InMemoryStore::new()))
            .await;
        (registry, id)
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let (registry, id) = registry_with_session().await;
        assert_eq!(registry.len().await, 1);
        let handle = registry.get(&id).await.unwrap();
        assert_eq!(handle.id(), id);

        registry.delete(&id).await.unwrap();
        assert!(registry.is_empty().await);
        assert!(matches!(
            registry.get(&id).await,
            Err(SiteChatError::SessionNotFound(_))
        ));
        assert!(matches!(
            registry.delete(&id).await,
            Err(SiteChatError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_handle_sees_deleted() {
        let (registry, id) = registry_with_session().await;
        let handle = registry.get(&id).await.unwrap();
        registry.delete(&id).await.unwrap();
        assert!(matches!(
            handle.lock_active().await,
            Err(SiteChatError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_waiter_queued_before_delete_runs_first() {
        let (registry, id) = registry_with_session().await;
        let registry = Arc::new(registry);
        let handle = registry.get(&id).await.unwrap();
        let held = handle.state.lock().await;

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.lock_active().await.map(|s| s.history().len()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let deleter = {
            let registry = registry.clone();
            let id = id.clone();
            tokio::spawn(async move { registry.delete(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(registry.is_empty().await);
        assert!(!deleter.is_finished());
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), 0);
        deleter.await.unwrap().unwrap();
        assert!(matches!(
            handle.lock_active().await,
            Err(SiteChatError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_id_is_input_error() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.get("../etc").await,
            Err(SiteChatError::Input(_))
        ));
        assert!(matches!(
            registry.delete("").await,
            Err(SiteChatError::Input(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let registry = SessionRegistry::new();
        let id = SessionRegistry::new_id();
        assert!(matches!(
            registry.get(&id).await,
            Err(SiteChatError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_history_is_isolated_per_session() {
        let registry = SessionRegistry::new();
        let a = SessionRegistry::new_id();
        let b = SessionRegistry::new_id();
        registry.create(a.clone(), meta(), Box::new(InMemoryStore::new())).await;
        registry.create(b.clone(), meta(), Box::new(InMemoryStore::new())).await;

        {
            let handle = registry.get(&a).await.unwrap();
            let mut state = handle.lock_active().await.unwrap();
            state.append([Turn::new(Role::User, "hi"), Turn::new(Role::Assistant, "hello")]);
        }

        assert_eq!(registry.history(&a).await.unwrap().len(), 2);
        assert!(registry.history(&b).await.unwrap().is_empty());
        assert_eq!(registry.summary(&a).await.unwrap().turns, 2);
        assert_eq!(registry.list().await.len(), 2);
    }

    #[tokio::test]
    async fn test_reap_expired() {
        let (registry, id) = registry_with_session().await;
        assert_eq!(registry.reap_expired(Duration::from_secs(3600)).await, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.reap_expired(Duration::from_millis(1)).await, 1);
        assert!(matches!(
            registry.get(&id).await,
            Err(SiteChatError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reap_skips_busy_sessions() {
        let (registry, id) = registry_with_session().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let handle = registry.get(&id).await.unwrap();
        let _busy = handle.lock_active().await.unwrap();
        assert_eq!(registry.reap_expired(Duration::from_millis(1)).await, 0);
        assert_eq!(registry.len().await, 1);
    }
}
