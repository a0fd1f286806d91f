//! The operations exposed to request handlers: start a crawl, chat, delete a
//! session, health. Inputs and outputs are plain serde structs; no internal
//! type crosses this boundary.
//!
//! `start_crawl` runs crawl → chunk → embed → index and only registers a
//! session once the index is complete. A crawl that yields no pages, is
//! cancelled, or fails while indexing leaves no session and no storage.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use site_chat_core::chunk::chunk_page;
use site_chat_core::models::{Chunk, CrawlBudget};
use tracing::{info, warn};

use crate::config::Config;
use crate::conversation;
use crate::crawler::{CancellationFlag, Crawler, HttpFetcher};
use crate::error::{Result, SiteChatError};
use crate::index::{build_index, open_store};
use crate::provider::ModelProvider;
use crate::session::{SessionMeta, SessionRegistry};
use crate::urlnorm::parse_start_url;

/// Shared state for every operation: configuration, the session registry and
/// the model capability.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub provider: Arc<dyn ModelProvider>,
}

impl AppContext {
    pub fn new(config: Config, provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::new()),
            provider,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartCrawlRequest {
    pub url: String,
    /// Defaults to `crawl.default_max_depth`.
    #[serde(default)]
    pub max_depth: Option<i64>,
    /// Defaults to `crawl.default_max_pages`.
    #[serde(default)]
    pub max_pages: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartCrawlResponse {
    pub session_id: String,
    pub url: String,
    pub pages_crawled: usize,
    pub urls_scraped: Vec<String>,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub message: String,
    pub response: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Validate and normalize the crawl bounds of a request.
pub fn crawl_budget(config: &Config, req: &StartCrawlRequest) -> Result<CrawlBudget> {
    let depth = req
        .max_depth
        .unwrap_or(i64::from(config.crawl.default_max_depth));
    let pages = req
        .max_pages
        .unwrap_or(config.crawl.default_max_pages as i64);

    if depth < 0 {
        return Err(SiteChatError::Input(format!(
            "max_depth must be >= 0, got {}",
            depth
        )));
    }
    if pages < 1 {
        return Err(SiteChatError::Input(format!(
            "max_pages must be >= 1, got {}",
            pages
        )));
    }
    if pages as u64 > config.crawl.limit_max_pages as u64 {
        return Err(SiteChatError::Input(format!(
            "max_pages must be <= {}, got {}",
            config.crawl.limit_max_pages, pages
        )));
    }
    let depth = u32::try_from(depth)
        .map_err(|_| SiteChatError::Input(format!("max_depth too large: {}", depth)))?;

    CrawlBudget::new(depth, pages as usize)
        .ok_or_else(|| SiteChatError::Input("max_pages must be >= 1".to_string()))
}

/// Crawl a site and build a new session over its content.
pub async fn start_crawl(
    ctx: &AppContext,
    req: StartCrawlRequest,
    cancel: Option<&CancellationFlag>,
) -> Result<StartCrawlResponse> {
    let start = parse_start_url(&req.url)?;
    let budget = crawl_budget(&ctx.config, &req)?;
    let config = &ctx.config;

    info!(
        url = %start,
        max_depth = budget.max_depth(),
        max_pages = budget.max_pages(),
        "crawl started"
    );

    let fetcher = HttpFetcher::new(&config.crawl).map_err(|e| SiteChatError::Fetch {
        url: start.to_string(),
        reason: format!("{:#}", e),
    })?;
    let report = Crawler::new(fetcher, &config.crawl)
        .crawl(&start, budget, cancel)
        .await?;
    if report.cancelled {
        return Err(SiteChatError::Cancelled(start.to_string()));
    }

    let mut chunks: Vec<Chunk> = Vec::new();
    for page in &report.pages {
        let page_chunks = chunk_page(page, config.chunking.chunk_size, config.chunking.overlap)
            .map_err(|e| SiteChatError::Input(format!("{:#}", e)))?;
        chunks.extend(page_chunks);
    }
    let urls_scraped: Vec<String> = report.pages.iter().map(|p| p.url.clone()).collect();
    info!(
        url = %start,
        pages = report.pages.len(),
        failures = report.failures.len(),
        skipped_by_robots = report.skipped_by_robots,
        chunks = chunks.len(),
        "crawl finished"
    );

    let session_id = SessionRegistry::new_id();
    let provider = ctx.provider.as_ref();
    let store = open_store(&config.storage, &session_id, provider.model_name()).await?;
    build_index(store.as_ref(), &chunks, provider, config.model.batch_size).await?;

    let pages_crawled = report.pages.len();
    let meta = SessionMeta {
        start_url: start.to_string(),
        pages_crawled,
        urls_scraped: urls_scraped.clone(),
        chunks: chunks.len(),
        model: provider.model_name().to_string(),
    };
    ctx.registry.create(session_id.clone(), meta, store).await;

    Ok(StartCrawlResponse {
        session_id,
        url: start.to_string(),
        pages_crawled,
        urls_scraped,
        status: "success".to_string(),
        message: format!("Successfully crawled {} pages", pages_crawled),
    })
}

pub async fn chat(ctx: &AppContext, req: ChatRequest) -> Result<ChatResponse> {
    let handle = ctx.registry.get(&req.session_id).await?;
    let answer = conversation::converse(
        &handle,
        ctx.provider.as_ref(),
        &ctx.config.retrieval,
        &req.message,
    )
    .await
    .inspect_err(|e| warn!(session_id = %req.session_id, error = %e, "chat failed"))?;

    Ok(ChatResponse {
        session_id: req.session_id,
        message: req.message,
        response: answer.response,
        sources: answer.sources,
    })
}

pub async fn delete_session(ctx: &AppContext, session_id: &str) -> Result<DeleteResponse> {
    ctx.registry.delete(session_id).await?;
    Ok(DeleteResponse {
        status: "success".to_string(),
        message: format!("Session {} deleted", session_id),
    })
}

pub fn health() -> HealthResponse {
    HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::DisabledProvider;

    fn ctx() -> AppContext {
        AppContext::new(Config::default(), Arc::new(DisabledProvider))
    }

    fn request(url: &str, depth: Option<i64>, pages: Option<i64>) -> StartCrawlRequest {
        StartCrawlRequest {
            url: url.to_string(),
            max_depth: depth,
            max_pages: pages,
        }
    }

    #[test]
    fn test_budget_defaults() {
        let budget = crawl_budget(&Config::default(), &request("https://a.test", None, None))
            .unwrap();
        assert_eq!(budget.max_depth(), 3);
        assert_eq!(budget.max_pages(), 100);
    }

    #[test]
    fn test_budget_bounds() {
        let config = Config::default();
        assert!(crawl_budget(&config, &request("x", Some(0), Some(1))).is_ok());
        for (depth, pages) in [(-1, 5), (1, 0), (1, -3), (1, 501)] {
            let err = crawl_budget(&config, &request("x", Some(depth), Some(pages))).unwrap_err();
            assert!(matches!(err, SiteChatError::Input(_)), "{} {}", depth, pages);
        }
    }

    #[tokio::test]
    async fn test_malformed_url_is_input_error() {
        let err = start_crawl(&ctx(), request("not a url", None, None), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SiteChatError::Input(_)));
    }

    #[tokio::test]
    async fn test_chat_unknown_session() {
        let err = chat(
            &ctx(),
            ChatRequest {
                session_id: SessionRegistry::new_id(),
                message: "hi".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SiteChatError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_unknown_session() {
        let err = delete_session(&ctx(), &SessionRegistry::new_id())
            .await
            .unwrap_err();
        assert!(matches!(err, SiteChatError::SessionNotFound(_)));
    }

    #[test]
    fn test_health() {
        assert_eq!(health().status, "healthy");
    }
}
