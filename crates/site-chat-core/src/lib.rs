//! # Site Chat Core
//!
//! Runtime-free logic for Site Chat: page, chunk and conversation models,
//! the sliding-window chunker, the vector store abstraction, and the
//! nearest-neighbour ranking used by every store backend.
//!
//! This crate contains no tokio, sqlx, network, or filesystem code. The
//! `site-chat` application crate supplies the crawler, the model provider,
//! the SQLite-backed store, and the session layer on top of it.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod search;
pub mod store;
