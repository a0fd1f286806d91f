//! HTTP server.
//!
//! Exposes the crawl / chat / delete pipeline as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/` | Service name and endpoint listing |
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/crawl` | Crawl a site and create a chat session |
//! | `POST`   | `/chat` | Ask a question within a session |
//! | `GET`    | `/sessions` | Summaries of active sessions |
//! | `GET`    | `/session/{id}` | Session summary and conversation history |
//! | `DELETE` | `/session/{id}` | Tear down a session and its index |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "session not found: ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `fetch_failed` (502),
//! `crawl_exhausted` (502), `capability_error` (502), `index_unavailable` (500),
//! `cancelled` (503).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front-ends can
//! call the API directly.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use site_chat_core::models::Turn;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::SiteChatError;
use crate::pipeline::{
    self, AppContext, ChatRequest, ChatResponse, DeleteResponse, HealthResponse,
    StartCrawlRequest, StartCrawlResponse,
};
use crate::provider::ModelProvider;
use crate::session::{SessionRegistry, SessionSummary};
use crate::sqlite_store::sweep_storage;

/// Starts the HTTP server on `[server].bind` and serves until Ctrl-C.
///
/// Before accepting requests it sweeps index directories left by a previous
/// process and, when `session.idle_timeout_secs > 0`, spawns the idle-session
/// reaper.
pub async fn run_server(config: Config, provider: Arc<dyn ModelProvider>) -> anyhow::Result<()> {
    if config.storage.backend == "sqlite" {
        sweep_storage(&config.storage.dir).await?;
    }

    let bind_addr = config.server.bind.clone();
    let idle_timeout = config.session.idle_timeout_secs;
    let ctx = AppContext::new(config, provider);

    if idle_timeout > 0 {
        spawn_reaper(ctx.registry.clone(), Duration::from_secs(idle_timeout));
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "site chat server listening");

    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

/// Build the application router over `ctx`.
pub fn router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/crawl", post(handle_crawl))
        .route("/chat", post(handle_chat))
        .route("/sessions", get(handle_list_sessions))
        .route(
            "/session/{id}",
            get(handle_get_session).delete(handle_delete_session),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ctx)
}

/// Periodically delete sessions idle for longer than `timeout`.
pub fn spawn_reaper(
    registry: Arc<SessionRegistry>,
    timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    let period = timeout.min(Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let reaped = registry.reap_expired(timeout).await;
            if reaped > 0 {
                info!(reaped, "expired idle sessions");
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<SiteChatError> for AppError {
    fn from(err: SiteChatError) -> Self {
        if err.status().is_server_error() {
            warn!(code = err.code(), error = %err, "request failed");
        }
        AppError {
            status: err.status(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

/// Constructs a 400 Bad Request error.
fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

// ============ GET / ============

#[derive(Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
    endpoints: Vec<&'static str>,
}

async fn handle_root() -> Json<RootResponse> {
    Json(RootResponse {
        name: "site-chat",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: vec![
            "GET /health",
            "POST /crawl",
            "POST /chat",
            "GET /sessions",
            "GET /session/{id}",
            "DELETE /session/{id}",
        ],
    })
}

// ============ GET /health ============

async fn handle_health() -> Json<HealthResponse> {
    Json(pipeline::health())
}

// ============ POST /crawl ============

async fn handle_crawl(
    State(ctx): State<AppContext>,
    body: Result<Json<StartCrawlRequest>, JsonRejection>,
) -> Result<Json<StartCrawlResponse>, AppError> {
    let Json(req) = body?;
    let resp = pipeline::start_crawl(&ctx, req, None).await?;
    Ok(Json(resp))
}

// ============ POST /chat ============

async fn handle_chat(
    State(ctx): State<AppContext>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(req) = body?;
    let resp = pipeline::chat(&ctx, req).await?;
    Ok(Json(resp))
}

// ============ GET /sessions ============

#[derive(Serialize)]
struct SessionListResponse {
    sessions: Vec<SessionSummary>,
}

async fn handle_list_sessions(State(ctx): State<AppContext>) -> Json<SessionListResponse> {
    Json(SessionListResponse {
        sessions: ctx.registry.list().await,
    })
}

// ============ GET /session/{id} ============

#[derive(Serialize)]
struct SessionDetailResponse {
    #[serde(flatten)]
    summary: SessionSummary,
    history: Vec<Turn>,
}

async fn handle_get_session(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetailResponse>, AppError> {
    let summary = ctx.registry.summary(&id).await?;
    let history = ctx.registry.history(&id).await?;
    Ok(Json(SessionDetailResponse { summary, history }))
}

// ============ DELETE /session/{id} ============

async fn handle_delete_session(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let resp = pipeline::delete_session(&ctx, &id).await?;
    Ok(Json(resp))
}
