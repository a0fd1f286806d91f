//! # Site Chat
//!
//! Crawl a website, index its content per session, and answer questions
//! grounded in that content.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Crawler  │──▶│ Chunker  │──▶│ Embed+Index  │──▶│   Session    │
//! │ BFS+robots│  │ windows  │   │ SQLite / mem │   │   Registry   │
//! └──────────┘   └──────────┘   └──────────────┘   └──────┬───────┘
//!                                                          │
//!                     ┌────────────────────────────────────┤
//!                     ▼                                    ▼
//!              ┌──────────────┐                     ┌──────────────┐
//!              │ Conversation │◀── chat request ────│  HTTP / CLI  │
//!              │    Engine    │                     │              │
//!              └──────────────┘                     └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sitechat serve                                  # start the HTTP API
//! curl -XPOST localhost:8000/crawl -d '{"url":"https://example.com","max_depth":1,"max_pages":5}' \
//!      -H 'content-type: application/json'
//! curl -XPOST localhost:8000/chat -d '{"session_id":"...","message":"What is this site about?"}' \
//!      -H 'content-type: application/json'
//! curl -XDELETE localhost:8000/session/<id>
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy and HTTP mapping |
//! | [`urlnorm`] | URL canonicalization and same-host filter |
//! | [`robots`] | robots.txt exclusion policy |
//! | [`extract`] | HTML / plain-text content extraction |
//! | [`crawler`] | Bounded breadth-first crawler |
//! | [`provider`] | Embedding and generation capability |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Per-session index schema |
//! | [`sqlite_store`] | SQLite-backed vector store |
//! | [`index`] | Store selection and index build |
//! | [`session`] | Session registry and lifecycle |
//! | [`conversation`] | Retrieval-augmented chat turns |
//! | [`pipeline`] | Crawl / chat / delete / health operations |
//! | [`server`] | HTTP server |
//!
//! Data models, chunking, vector math and the in-memory store live in the
//! `site-chat-core` crate.

pub mod config;
pub mod conversation;
pub mod crawler;
pub mod db;
pub mod error;
pub mod extract;
pub mod index;
pub mod migrate;
pub mod pipeline;
pub mod provider;
pub mod robots;
pub mod server;
pub mod session;
pub mod sqlite_store;
pub mod urlnorm;
