mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::response::{Html, Redirect};
use axum::routing::get;
use axum::Router;
use common::{serve, test_config};
use site_chat::crawler::{Crawler, HttpFetcher};
use site_chat_core::models::CrawlBudget;
use tempfile::TempDir;
use url::Url;

/// A second local server standing in for another host. Counts every request.
async fn spawn_counted_host(hits: Arc<AtomicUsize>) -> String {
    let app = Router::new().route(
        "/x",
        get(move || {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Html("<p>Somebody else's page with plenty of text.</p>")
            }
        }),
    );
    serve(app).await
}

async fn crawl(origin: &str, depth: u32) -> site_chat::crawler::CrawlReport {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let crawler = Crawler::new(HttpFetcher::new(&config.crawl).unwrap(), &config.crawl);
    crawler
        .crawl(
            &Url::parse(origin).unwrap(),
            CrawlBudget::new(depth, 10).unwrap(),
            None,
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_off_host_redirect_is_never_requested() {
    let hits = Arc::new(AtomicUsize::new(0));
    let other = spawn_counted_host(hits.clone()).await;

    let away = format!("{}/x", other);
    let app = Router::new()
        .route(
            "/",
            get(|| async {
                Html(r#"<html><body><p>Home page of the origin site.</p><a href="/away">Away</a></body></html>"#)
            }),
        )
        .route(
            "/away",
            get(move || {
                let away = away.clone();
                async move { Redirect::temporary(&away) }
            }),
        );
    let origin = serve(app).await;

    let report = crawl(&format!("{}/", origin), 1).await;

    assert_eq!(report.pages.len(), 1);
    assert!(report.pages[0].url.starts_with(&origin));
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].url.ends_with("/away"));
    assert!(
        report.failures[0].reason.contains("off-site"),
        "reason: {}",
        report.failures[0].reason
    );
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_same_host_redirect_checks_robots_on_target() {
    let app = Router::new()
        .route(
            "/robots.txt",
            get(|| async { "User-agent: *\nDisallow: /private\n" }),
        )
        .route(
            "/",
            get(|| async {
                Html(r#"<html><body><p>Home page with a moved link.</p><a href="/moved">Moved</a></body></html>"#)
            }),
        )
        .route("/moved", get(|| async { Redirect::permanent("/private/plans") }))
        .route(
            "/private/plans",
            get(|| async { Html("<p>Internal plans that must stay out of the index.</p>") }),
        );
    let origin = serve(app).await;

    let report = crawl(&format!("{}/", origin), 1).await;

    assert_eq!(report.pages.len(), 1);
    assert_eq!(report.skipped_by_robots, 1);
    assert!(report.failures.is_empty());
    assert!(report.pages.iter().all(|p| !p.url.contains("/private")));
}
