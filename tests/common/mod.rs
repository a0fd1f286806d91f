#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use site_chat::config::Config;
use site_chat::provider::{ModelProvider, Prompt};

pub const DIMS: usize = 128;

/// Start a small same-origin website on a random local port and return its
/// base URL (`http://127.0.0.1:<port>`).
///
/// ```text
/// /            → /docs, /pricing, /broken, /private/secret, external, mailto
/// /docs        → /docs/install, / (cycle)
/// /docs/install
/// /pricing
/// /broken      (500)
/// /private/... (disallowed by robots.txt)
/// ```
pub async fn spawn_site() -> String {
    let app = Router::new()
        .route(
            "/robots.txt",
            get(|| async { "User-agent: *\nDisallow: /private\n" }),
        )
        .route(
            "/",
            get(|| async {
                Html(
                    r#"<html><head><title>Acme Widgets</title></head><body>
                    <nav><a href="/docs">Docs</a> <a href="/pricing">Pricing</a></nav>
                    <main>
                      <h1>Acme Widgets</h1>
                      <p>Acme builds sturdy widgets for factories and home workshops.</p>
                      <p><a href="/broken">Status</a> <a href="/private/secret">Internal</a>
                         <a href="https://example.org/elsewhere">Partner</a>
                         <a href="mailto:sales@acme.test">Email us</a></p>
                    </main></body></html>"#,
                )
            }),
        )
        .route(
            "/docs",
            get(|| async {
                Html(
                    r#"<html><head><title>Docs</title></head><body>
                    <p>Documentation for configuring your widgets.</p>
                    <a href="/docs/install">Install guide</a> <a href="/">Home</a>
                    </body></html>"#,
                )
            }),
        )
        .route(
            "/docs/install",
            get(|| async {
                Html(
                    "<html><body><p>Install widgets by bolting them to a workbench.</p></body></html>",
                )
            }),
        )
        .route(
            "/pricing",
            get(|| async {
                Html(
                    r#"<html><head><title>Pricing</title></head><body>
                    <p>Widgets cost ten dollars each. Bulk pricing is available.</p>
                    <a href="/pricing/">Pricing again</a>
                    </body></html>"#,
                )
            }),
        )
        .route(
            "/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .route(
            "/private/secret",
            get(|| async { Html("<p>Secret roadmap</p>") }),
        );

    serve(app).await
}

/// A site whose every URL is 404.
pub async fn spawn_empty_site() -> String {
    serve(Router::new()).await
}

pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Config pointing storage at `dir`, with no politeness delay.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.dir = dir.join("storage");
    config.crawl.politeness_delay_ms = 0;
    config.crawl.fetch_timeout_secs = 5;
    config.model.batch_size = 4;
    config
}

/// Deterministic provider: hashed bag-of-words embeddings and an echoing
/// generator. Either call can be slowed down; embedding can be made to fail.
#[derive(Default)]
pub struct StubProvider {
    pub generate_calls: AtomicUsize,
    pub generate_delay: Option<Duration>,
    pub embed_delay: Option<Duration>,
    pub fail_embed: AtomicBool,
}

impl StubProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            generate_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn slow_embed(delay: Duration) -> Self {
        Self {
            embed_delay: Some(delay),
            ..Self::default()
        }
    }
}

pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let bucket = word
            .to_lowercase()
            .bytes()
            .fold(5381usize, |h, b| h.wrapping_mul(33) ^ b as usize);
        v[bucket % DIMS] += 1.0;
    }
    v
}

#[async_trait]
impl ModelProvider for StubProvider {
    fn model_name(&self) -> &str {
        "stub-bow"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if self.fail_embed.load(Ordering::SeqCst) {
            anyhow::bail!("embedding service unavailable");
        }
        if let Some(delay) = self.embed_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }

    async fn generate(&self, prompt: &Prompt) -> anyhow::Result<String> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.generate_delay {
            tokio::time::sleep(delay).await;
        }
        let last = prompt
            .messages
            .last()
            .map(|(_, text)| text.as_str())
            .unwrap_or("");
        Ok(format!("answer to: {}", last))
    }
}
