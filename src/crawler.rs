//! Bounded breadth-first frontier crawler.
//!
//! The crawl walks a cyclic link graph with an explicit FIFO frontier and a
//! set of canonical URLs, so cycles are cut by set membership:
//!
//! 1. Pop `(url, depth)`; skip it if its canonical form was already visited.
//! 2. Skip it silently if robots.txt disallows it.
//! 3. Wait out the politeness delay, fetch with a bounded timeout, extract.
//! 4. Record the page; if `depth < max_depth`, enqueue every same-host link
//!    not yet visited or queued at `depth + 1`.
//! 5. Stop when the frontier is empty or `max_pages` pages were fetched.
//!
//! A failed page is logged and recorded in the report; it never aborts the
//! crawl. A crawl that fetched nothing is [`SiteChatError::CrawlExhausted`],
//! or [`SiteChatError::Cancelled`] when the cancellation flag stopped it.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use site_chat_core::models::{CrawlBudget, Page};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::CrawlConfig;
use crate::error::{Result, SiteChatError};
use crate::extract::{self, Extracted};
use crate::robots::RobotsPolicy;
use crate::urlnorm::{canonicalize, same_host};

/// A fetched response body plus the URL it was finally served from.
#[derive(Debug, Clone)]
pub struct FetchedDoc {
    pub final_url: Url,
    pub content_type: Option<String>,
    pub body: String,
}

/// Source of page bodies. [`HttpFetcher`] in production; tests use a map.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url`. Non-success statuses are errors.
    async fn fetch(&self, url: &Url) -> Result<FetchedDoc>;
}

const MAX_REDIRECTS: usize = 5;

/// Follow at most [`MAX_REDIRECTS`] hops and never leave the host of the
/// original request. An off-host hop is not followed; the 3xx response is
/// handed back so the fetcher can report where it pointed.
fn same_host_redirects() -> reqwest::redirect::Policy {
    reqwest::redirect::Policy::custom(|attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        let leaves_host = attempt
            .previous()
            .first()
            .map(|origin| !same_host(origin, attempt.url()))
            .unwrap_or(false);
        if leaves_host {
            attempt.stop()
        } else {
            attempt.follow()
        }
    })
}

/// reqwest-backed fetcher with a request timeout, same-host redirects and
/// the configured user agent.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &CrawlConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(same_host_redirects())
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedDoc> {
        let fail = |reason: String| SiteChatError::Fetch {
            url: url.to_string(),
            reason,
        };

        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        let status = resp.status();
        if status.is_redirection() {
            let target = resp
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|loc| resp.url().join(loc).ok());
            return Err(match target {
                Some(target) => fail(format!("redirected off-site to {}", target)),
                None => fail(format!("HTTP {}", status.as_u16())),
            });
        }
        if !status.is_success() {
            return Err(fail(format!("HTTP {}", status.as_u16())));
        }

        let final_url = resp.url().clone();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.map_err(|e| fail(e.to_string()))?;

        Ok(FetchedDoc {
            final_url,
            content_type,
            body,
        })
    }
}

/// Shared flag a caller sets to abandon an in-progress crawl.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CrawlFailure {
    pub url: String,
    pub reason: String,
}

/// Outcome of a crawl that fetched at least one page.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    /// Pages in fetch (BFS) order; URLs are canonical and unique.
    pub pages: Vec<Page>,
    pub failures: Vec<CrawlFailure>,
    pub skipped_by_robots: usize,
    /// Distinct canonical URLs popped from the frontier.
    pub visited: usize,
    pub cancelled: bool,
}

/// Crawler bound to a fetcher and the politeness settings of one crawl config.
pub struct Crawler<F> {
    fetcher: F,
    delay: Duration,
    fetch_timeout: Duration,
    respect_robots: bool,
    user_agent: String,
}

impl<F: PageFetcher> Crawler<F> {
    pub fn new(fetcher: F, config: &CrawlConfig) -> Self {
        Self {
            fetcher,
            delay: Duration::from_millis(config.politeness_delay_ms),
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
            respect_robots: config.respect_robots,
            user_agent: config.user_agent.clone(),
        }
    }

    /// Override the per-page timeout guard.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub async fn crawl(
        &self,
        start: &Url,
        budget: CrawlBudget,
        cancel: Option<&CancellationFlag>,
    ) -> Result<CrawlReport> {
        let mut frontier: VecDeque<(Url, u32)> = VecDeque::new();
        let mut queued: HashSet<String> = HashSet::new();
        let mut visited: HashSet<String> = HashSet::new();

        queued.insert(canonicalize(start));
        frontier.push_back((start.clone(), 0));

        let mut pages: Vec<Page> = Vec::new();
        let mut failures: Vec<CrawlFailure> = Vec::new();
        let mut skipped_by_robots = 0usize;
        let mut cancelled = false;

        let robots = if self.respect_robots {
            self.load_robots(start).await
        } else {
            RobotsPolicy::allow_all()
        };
        let delay = match robots.crawl_delay() {
            Some(d) if d > self.delay => d,
            _ => self.delay,
        };
        let mut requested = self.respect_robots;

        while let Some((url, depth)) = frontier.pop_front() {
            if cancel.map(CancellationFlag::is_cancelled).unwrap_or(false) {
                info!(url = %start, pages = pages.len(), "crawl cancelled");
                cancelled = true;
                break;
            }
            if pages.len() >= budget.max_pages() {
                break;
            }

            let key = canonicalize(&url);
            if !visited.insert(key.clone()) {
                continue;
            }
            if !robots.is_allowed(&url) {
                debug!(url = %url, "disallowed by robots.txt");
                skipped_by_robots += 1;
                continue;
            }

            if requested {
                tokio::time::sleep(delay).await;
            }
            requested = true;

            let doc = match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(&url)).await
            {
                Ok(Ok(doc)) => doc,
                Ok(Err(e)) => {
                    warn!(url = %url, depth, error = %e, "page fetch failed");
                    failures.push(failure(&key, e.to_string()));
                    continue;
                }
                Err(_) => {
                    warn!(url = %url, depth, "page fetch timed out");
                    failures.push(failure(&key, "timed out".to_string()));
                    continue;
                }
            };

            if !same_host(start, &doc.final_url) {
                warn!(url = %url, target = %doc.final_url, "redirected off-site");
                failures.push(failure(
                    &key,
                    format!("redirected off-site to {}", doc.final_url),
                ));
                continue;
            }
            let page_key = canonicalize(&doc.final_url);
            if page_key != key {
                if !visited.insert(page_key.clone()) {
                    debug!(url = %url, target = %page_key, "redirect to an already visited page");
                    continue;
                }
                if !robots.is_allowed(&doc.final_url) {
                    debug!(url = %url, target = %page_key, "redirect target disallowed by robots.txt");
                    skipped_by_robots += 1;
                    continue;
                }
            }

            let extracted = match extract_doc(&doc) {
                Ok(extracted) => extracted,
                Err(reason) => {
                    warn!(url = %url, depth, reason = %reason, "unparseable content");
                    failures.push(failure(&key, reason));
                    continue;
                }
            };

            if depth < budget.max_depth() {
                let mut discovered = 0usize;
                for link in extracted.links {
                    if !same_host(start, &link) {
                        continue;
                    }
                    let link_key = canonicalize(&link);
                    if visited.contains(&link_key) || !queued.insert(link_key) {
                        continue;
                    }
                    frontier.push_back((link, depth + 1));
                    discovered += 1;
                }
                debug!(url = %page_key, discovered, "links enqueued");
            }

            info!(url = %page_key, depth, chars = extracted.text.len(), "page crawled");
            pages.push(Page {
                url: page_key,
                title: extracted.title,
                text: extracted.text,
                depth,
            });
        }

        if pages.is_empty() {
            if cancelled {
                return Err(SiteChatError::Cancelled(start.to_string()));
            }
            return Err(SiteChatError::CrawlExhausted {
                url: start.to_string(),
                attempted: visited.len(),
            });
        }

        Ok(CrawlReport {
            pages,
            failures,
            skipped_by_robots,
            visited: visited.len(),
            cancelled,
        })
    }

    async fn load_robots(&self, start: &Url) -> RobotsPolicy {
        let Ok(robots_url) = start.join("/robots.txt") else {
            return RobotsPolicy::allow_all();
        };
        match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(&robots_url)).await {
            Ok(Ok(doc)) => RobotsPolicy::parse(&doc.body, &self.user_agent),
            Ok(Err(e)) => {
                debug!(url = %robots_url, error = %e, "no usable robots.txt; allowing all");
                RobotsPolicy::allow_all()
            }
            Err(_) => {
                debug!(url = %robots_url, "robots.txt timed out; allowing all");
                RobotsPolicy::allow_all()
            }
        }
    }
}

fn failure(url: &str, reason: String) -> CrawlFailure {
    CrawlFailure {
        url: url.to_string(),
        reason,
    }
}

fn extract_doc(doc: &FetchedDoc) -> std::result::Result<Extracted, String> {
    let mime = doc
        .content_type
        .as_deref()
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    let extracted = match mime.as_deref() {
        None | Some("text/html") | Some("application/xhtml+xml") => {
            extract::extract_page(&doc.final_url, &doc.body)
        }
        Some("text/plain") => extract::extract_plain(&doc.body),
        Some(other) => return Err(format!("unsupported content type {}", other)),
    };

    if extracted.text.is_empty() {
        return Err("no extractable text".to_string());
    }
    Ok(extracted)
}
