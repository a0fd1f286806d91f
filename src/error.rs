//! Error taxonomy surfaced at the crawl / chat / delete boundary.
//!
//! Every variant carries a human-readable message plus a machine-readable
//! [`code`](SiteChatError::code) and an HTTP [`status`](SiteChatError::status)
//! used by the server's JSON error contract.

use axum::http::StatusCode;
use site_chat_core::store::IndexError;

/// Errors returned by the pipeline, session registry, and conversation engine.
#[derive(Debug, thiserror::Error)]
pub enum SiteChatError {
    /// Malformed URL, invalid crawl bounds, invalid session id, empty message.
    #[error("invalid input: {0}")]
    Input(String),
    /// A single page could not be fetched or parsed. Recovered inside the
    /// crawler; only surfaces when a caller fetches one page directly.
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
    /// The crawl finished without fetching a single page.
    #[error("no pages could be crawled from {url} ({attempted} URLs attempted)")]
    CrawlExhausted { url: String, attempted: usize },
    #[error("session not found: {0}")]
    SessionNotFound(String),
    /// The session is active but its index is corrupt or missing.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),
    /// The embedding or generation capability failed or timed out.
    #[error("model capability error: {0}")]
    Capability(String),
    /// The caller abandoned the crawl; nothing was kept.
    #[error("crawl of {0} was cancelled")]
    Cancelled(String),
}

impl SiteChatError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            SiteChatError::Input(_) => "bad_request",
            SiteChatError::Fetch { .. } => "fetch_failed",
            SiteChatError::CrawlExhausted { .. } => "crawl_exhausted",
            SiteChatError::SessionNotFound(_) => "not_found",
            SiteChatError::IndexUnavailable(_) => "index_unavailable",
            SiteChatError::Capability(_) => "capability_error",
            SiteChatError::Cancelled(_) => "cancelled",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            SiteChatError::Input(_) => StatusCode::BAD_REQUEST,
            SiteChatError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            SiteChatError::IndexUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SiteChatError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
            SiteChatError::Fetch { .. }
            | SiteChatError::CrawlExhausted { .. }
            | SiteChatError::Capability(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Map an index error for the session `session_id`.
    ///
    /// A destroyed index means the session is gone; anything else leaves an
    /// active session with an unusable index.
    pub fn from_index(session_id: &str, err: IndexError) -> Self {
        match err {
            IndexError::NotFound => SiteChatError::SessionNotFound(session_id.to_string()),
            other => SiteChatError::IndexUnavailable(format!(
                "session {}: {}; delete and recreate the session",
                session_id, other
            )),
        }
    }
}

pub type Result<T> = std::result::Result<T, SiteChatError>;
