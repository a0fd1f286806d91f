//! Core data models shared by the crawl → chunk → index → converse pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A page produced once per unique URL visited during a crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Canonical URL of the page.
    pub url: String,
    /// Contents of the `<title>` element, when present.
    pub title: Option<String>,
    /// Extracted plain text.
    pub text: String,
    /// Number of link hops from the start URL.
    pub depth: u32,
}

/// A bounded text window derived from a [`Page`], the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id derived from the source URL and sequence index.
    pub id: String,
    /// URL of the page this window was cut from, used for citations.
    pub source_url: String,
    /// Position of the window within its page, starting at 0.
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry in a session's append-only conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// Hard ceilings for a single crawl.
///
/// `max_depth` counts link hops from the start URL (0 = start page only);
/// `max_pages` counts successfully fetched pages and is always at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlBudget {
    max_depth: u32,
    max_pages: usize,
}

impl CrawlBudget {
    /// Returns `None` when `max_pages` is zero.
    pub fn new(max_depth: u32, max_pages: usize) -> Option<Self> {
        if max_pages == 0 {
            return None;
        }
        Some(Self {
            max_depth,
            max_pages,
        })
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }
}
