//! # Site Chat CLI (`sitechat`)
//!
//! ## Usage
//!
//! ```bash
//! sitechat --config ./config/sitechat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sitechat serve` | Start the HTTP API |
//! | `sitechat crawl <url>` | Run the crawler only and list the pages it finds |
//! | `sitechat chunk <file>` | Show how a text file would be chunked |
//!
//! ## Examples
//!
//! ```bash
//! # Serve with the OpenAI provider
//! OPENAI_API_KEY=sk-... sitechat serve --config ./config/sitechat.toml
//!
//! # Dry-run a crawl (no session, no model calls)
//! sitechat crawl https://example.com --max-depth 1 --max-pages 5
//!
//! # Inspect chunk boundaries
//! sitechat chunk ./page.txt --size 1000 --overlap 200
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `site_chat=info,tower_http=info`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use site_chat::config::{self, Config};
use site_chat::crawler::{CancellationFlag, Crawler, HttpFetcher};
use site_chat::pipeline::{self, StartCrawlRequest};
use site_chat::provider;
use site_chat::server;
use site_chat::urlnorm;
use site_chat_core::chunk::chunk_text;
use site_chat_core::models::Page;

/// Site Chat: crawl a website, index it, and chat with its content.
#[derive(Parser)]
#[command(name = "sitechat", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/sitechat.toml`; built-in defaults are used when
    /// the file does not exist.
    #[arg(long, global = true, default_value = "./config/sitechat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server.
    Serve {
        /// Override `[server].bind`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Crawl a site and print the pages found. Ctrl-C stops the crawl.
    Crawl {
        url: String,
        #[arg(long)]
        max_depth: Option<i64>,
        #[arg(long)]
        max_pages: Option<i64>,
    },

    /// Chunk a local text file and print the window boundaries.
    Chunk {
        file: PathBuf,
        /// Window size in characters (default: `[chunking].chunk_size`).
        #[arg(long)]
        size: Option<usize>,
        /// Overlap in characters (default: `[chunking].overlap`).
        #[arg(long)]
        overlap: Option<usize>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("site_chat=info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::warn!(path = %path.display(), "config file not found; using defaults");
        Ok(Config::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut cfg = load(&cli.config)?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            let provider: Arc<dyn provider::ModelProvider> =
                Arc::from(provider::create_provider(&cfg.model)?);
            server::run_server(cfg, provider).await?;
        }
        Commands::Crawl {
            url,
            max_depth,
            max_pages,
        } => {
            let start = urlnorm::parse_start_url(&url)?;
            let budget = pipeline::crawl_budget(
                &cfg,
                &StartCrawlRequest {
                    url: url.clone(),
                    max_depth,
                    max_pages,
                },
            )?;

            let cancel = CancellationFlag::new();
            let watcher = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    watcher.cancel();
                }
            });

            let fetcher = HttpFetcher::new(&cfg.crawl)?;
            let report = Crawler::new(fetcher, &cfg.crawl)
                .crawl(&start, budget, Some(&cancel))
                .await?;

            for page in &report.pages {
                print_page(page);
            }
            for failure in &report.failures {
                println!("  failed  {}  ({})", failure.url, failure.reason);
            }
            println!(
                "crawl {}: {} pages, {} failures, {} skipped by robots.txt{}",
                start,
                report.pages.len(),
                report.failures.len(),
                report.skipped_by_robots,
                if report.cancelled { " (cancelled)" } else { "" }
            );
        }
        Commands::Chunk {
            file,
            size,
            overlap,
        } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let size = size.unwrap_or(cfg.chunking.chunk_size);
            let overlap = overlap.unwrap_or(cfg.chunking.overlap);
            let source = file.display().to_string();
            let chunks = chunk_text(&source, &text, size, overlap)?;

            let step = size - overlap;
            let total = text.chars().count();
            for chunk in &chunks {
                let start = chunk.chunk_index as usize * step;
                let len = chunk.text.chars().count();
                println!(
                    "  #{:<4} chars {:>7}..{:<7} {}",
                    chunk.chunk_index,
                    start,
                    start + len,
                    &chunk.id[..12]
                );
            }
            println!(
                "{}: {} chars → {} chunks (size {}, overlap {})",
                source,
                total,
                chunks.len(),
                size,
                overlap
            );
        }
    }

    Ok(())
}

fn print_page(page: &Page) {
    println!(
        "  d{}  {}  {}  ({} chars)",
        page.depth,
        page.url,
        page.title.as_deref().unwrap_or("-"),
        page.text.chars().count()
    );
}
