//! Retrieval-augmented conversation engine.
//!
//! One chat turn, all under the session's lock:
//!
//! 1. Optionally condense the follow-up into a standalone question using the
//!    recent history (the literal message is what gets stored).
//! 2. Embed the question with the provider that built the index.
//! 3. Query the session's index for the top-k chunks.
//! 4. No hits: answer with [`NO_CONTENT_ANSWER`] and no sources, without
//!    calling the generator.
//! 5. Otherwise assemble a bounded context block, send it with the last
//!    `history_turns` turns and the message to the generator.
//! 6. Append the user turn and the answer, return the answer with the
//!    deduplicated source URLs of the chunks that made it into the context.
//!
//! Any capability or index failure returns before step 6, so a failed turn
//! never touches the history.

use serde::Serialize;
use site_chat_core::models::{Role, Turn};
use site_chat_core::search::{cited_sources, ScoredChunk};
use tracing::{debug, info};

use crate::config::RetrievalConfig;
use crate::error::{Result, SiteChatError};
use crate::provider::{embed_one, ModelProvider, Prompt};
use crate::session::SessionHandle;

/// Fixed reply when retrieval returns nothing.
pub const NO_CONTENT_ANSWER: &str =
    "I couldn't find any relevant content on the crawled site to answer that.";

const ANSWER_INSTRUCTIONS: &str = "You answer questions about a website using only the \
context excerpts below. Each excerpt starts with its number and source URL. If the excerpts \
do not contain the answer, say that you don't know instead of making one up.";

const CONDENSE_INSTRUCTIONS: &str = "Given the conversation so far and a follow-up question, \
rephrase the follow-up question to be a standalone question in its original language. \
Reply with the question only.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatAnswer {
    pub response: String,
    pub sources: Vec<String>,
}

/// Run one chat turn against `session`.
pub async fn converse(
    session: &SessionHandle,
    provider: &dyn ModelProvider,
    settings: &RetrievalConfig,
    message: &str,
) -> Result<ChatAnswer> {
    let message = message.trim();
    if message.is_empty() {
        return Err(SiteChatError::Input("message must not be empty".to_string()));
    }

    let mut state = session.lock_active().await?;
    let window = recent(state.history(), settings.history_turns);

    let question = if settings.condense_question && !window.is_empty() {
        condense(provider, window, message).await?
    } else {
        message.to_string()
    };

    let query_vec = embed_one(provider, &question)
        .await
        .map_err(|e| SiteChatError::Capability(format!("embedding failed: {:#}", e)))?;

    let hits = state
        .store()
        .query(&query_vec, settings.top_k)
        .await
        .map_err(|e| SiteChatError::from_index(session.id(), e))?;

    let answer = if hits.is_empty() {
        debug!(session_id = %session.id(), "no chunks retrieved");
        ChatAnswer {
            response: NO_CONTENT_ANSWER.to_string(),
            sources: Vec::new(),
        }
    } else {
        let (context, used) = build_context(&hits, settings.max_context_chars);

        let mut messages: Vec<(Role, String)> = window
            .iter()
            .map(|turn| (turn.role, turn.text.clone()))
            .collect();
        messages.push((Role::User, message.to_string()));

        let prompt = Prompt {
            system: format!("{}\n\n{}", ANSWER_INSTRUCTIONS, context),
            messages,
        };
        let response = provider
            .generate(&prompt)
            .await
            .map_err(|e| SiteChatError::Capability(format!("generation failed: {:#}", e)))?;

        ChatAnswer {
            response,
            sources: cited_sources(&hits[..used]),
        }
    };

    state.append([
        Turn::new(Role::User, message),
        Turn::new(Role::Assistant, answer.response.clone()),
    ]);
    info!(
        session_id = %session.id(),
        hits = hits.len(),
        sources = answer.sources.len(),
        turns = state.history().len(),
        "chat turn completed"
    );

    Ok(answer)
}

fn recent(history: &[Turn], n: usize) -> &[Turn] {
    &history[history.len().saturating_sub(n)..]
}

async fn condense(provider: &dyn ModelProvider, window: &[Turn], message: &str) -> Result<String> {
    let transcript: String = window
        .iter()
        .map(|turn| format!("{}: {}\n", turn.role.as_str(), turn.text))
        .collect();
    let prompt = Prompt {
        system: CONDENSE_INSTRUCTIONS.to_string(),
        messages: vec![(
            Role::User,
            format!(
                "Conversation:\n{}\nFollow-up question: {}",
                transcript, message
            ),
        )],
    };
    let rewritten = provider
        .generate(&prompt)
        .await
        .map_err(|e| SiteChatError::Capability(format!("question rewrite failed: {:#}", e)))?;
    let rewritten = rewritten.trim();
    debug!(original = message, standalone = rewritten, "condensed question");
    if rewritten.is_empty() {
        Ok(message.to_string())
    } else {
        Ok(rewritten.to_string())
    }
}

/// Render hits as numbered excerpts within `max_chars` characters.
///
/// Returns the context and how many hits it includes. The first hit is
/// always included, truncated if it alone exceeds the budget.
fn build_context(hits: &[ScoredChunk], max_chars: usize) -> (String, usize) {
    let mut context = String::new();
    let mut used_chars = 0usize;
    let mut used = 0usize;

    for (n, hit) in hits.iter().enumerate() {
        let separator = if n == 0 { "" } else { "\n\n" };
        let entry = format!("[{}] {}\n{}", n + 1, hit.chunk.source_url, hit.chunk.text);
        let entry_chars = separator.chars().count() + entry.chars().count();

        if used_chars + entry_chars > max_chars {
            if n == 0 {
                context = entry.chars().take(max_chars.max(1)).collect();
                used = 1;
            }
            break;
        }
        context.push_str(separator);
        context.push_str(&entry);
        used_chars += entry_chars;
        used += 1;
    }

    (context, used)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionMeta, SessionRegistry};
    use async_trait::async_trait;
    use site_chat_core::chunk::chunk_text;
    use site_chat_core::models::Chunk;
    use site_chat_core::store::memory::InMemoryStore;
    use site_chat_core::store::VectorStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    const DIMS: usize = 256;

    /// Bag-of-words hashing embedder; `generate` echoes the last user message.
    #[derive(Default)]
    struct StubProvider {
        prompts: Mutex<Vec<Prompt>>,
        fail_generate: AtomicBool,
    }

    fn bow(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
            v[bucket % DIMS] += 1.0;
        }
        v
    }

    #[async_trait]
    impl ModelProvider for StubProvider {
        fn model_name(&self) -> &str {
            "stub"
        }
        fn dims(&self) -> usize {
            DIMS
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| bow(t)).collect())
        }
        async fn generate(&self, prompt: &Prompt) -> anyhow::Result<String> {
            if self.fail_generate.load(Ordering::SeqCst) {
                anyhow::bail!("upstream timeout");
            }
            self.prompts.lock().unwrap().push(prompt.clone());
            let last = prompt
                .messages
                .last()
                .map(|(_, text)| text.clone())
                .unwrap_or_default();
            Ok(format!("answer to: {}", last))
        }
    }

    fn settings() -> RetrievalConfig {
        RetrievalConfig {
            condense_question: false,
            ..RetrievalConfig::default()
        }
    }

    fn corpus() -> Vec<Chunk> {
        let mut chunks =
            chunk_text("https://a.test/pricing", "pricing plans cost ten dollars", 100, 0).unwrap();
        chunks.extend(
            chunk_text("https://a.test/about", "about our team of engineers", 100, 0).unwrap(),
        );
        chunks.extend(
            chunk_text("https://a.test/pricing/faq", "pricing questions refunds", 100, 0)
                .unwrap(),
        );
        chunks
    }

    async fn session(chunks: &[Chunk]) -> (SessionRegistry, Arc<SessionHandle>, String) {
        let store = InMemoryStore::new();
        let vectors: Vec<Vec<f32>> = chunks.iter().map(|c| bow(&c.text)).collect();
        store.insert(chunks, &vectors).await.unwrap();

        let registry = SessionRegistry::new();
        let id = SessionRegistry::new_id();
        let meta = SessionMeta {
            start_url: "https://a.test/".to_string(),
            pages_crawled: 3,
            urls_scraped: Vec::new(),
            chunks: chunks.len(),
            model: "stub".to_string(),
        };
        registry.create(id.clone(), meta, Box::new(store)).await;
        let handle = registry.get(&id).await.unwrap();
        (registry, handle, id)
    }

    #[tokio::test]
    async fn test_answer_with_sources_and_history() {
        let (registry, handle, id) = session(&corpus()).await;
        let provider = StubProvider::default();

        let answer = converse(&handle, &provider, &settings(), "pricing plans")
            .await
            .unwrap();
        assert_eq!(answer.response, "answer to: pricing plans");
        assert_eq!(answer.sources[0], "https://a.test/pricing");
        let unique: std::collections::HashSet<&String> = answer.sources.iter().collect();
        assert_eq!(unique.len(), answer.sources.len());

        let history = registry.history(&id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].text, "pricing plans");
        assert_eq!(history[1].role, Role::Assistant);

        let prompts = provider.prompts.lock().unwrap();
        assert!(prompts[0].system.contains("[1] https://a.test/pricing"));
    }

    #[tokio::test]
    async fn test_empty_index_returns_fixed_answer() {
        let (registry, handle, id) = session(&[]).await;
        let provider = StubProvider::default();

        let answer = converse(&handle, &provider, &settings(), "anything?")
            .await
            .unwrap();
        assert_eq!(answer.response, NO_CONTENT_ANSWER);
        assert!(answer.sources.is_empty());
        assert!(provider.prompts.lock().unwrap().is_empty());
        assert_eq!(registry.history(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_generation_leaves_history_untouched() {
        let (registry, handle, id) = session(&corpus()).await;
        let provider = StubProvider::default();
        converse(&handle, &provider, &settings(), "pricing").await.unwrap();

        provider.fail_generate.store(true, Ordering::SeqCst);
        let err = converse(&handle, &provider, &settings(), "team")
            .await
            .unwrap_err();
        assert!(matches!(err, SiteChatError::Capability(_)));
        assert_eq!(registry.history(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_condense_uses_history() {
        let (_registry, handle, _id) = session(&corpus()).await;
        let provider = StubProvider::default();
        let settings = RetrievalConfig::default();

        converse(&handle, &provider, &settings, "pricing").await.unwrap();
        assert_eq!(provider.prompts.lock().unwrap().len(), 1);

        converse(&handle, &provider, &settings, "and refunds?")
            .await
            .unwrap();
        let prompts = provider.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 3);
        assert_eq!(prompts[1].system, CONDENSE_INSTRUCTIONS);
        assert!(prompts[1].messages[0].1.contains("user: pricing"));
        // the answer prompt carries the literal message plus prior turns
        assert_eq!(prompts[2].messages.len(), 3);
        assert_eq!(prompts[2].messages[2].1, "and refunds?");
    }

    #[tokio::test]
    async fn test_history_window_is_bounded() {
        let (_registry, handle, _id) = session(&corpus()).await;
        let provider = StubProvider::default();
        let settings = RetrievalConfig {
            history_turns: 2,
            condense_question: false,
            ..RetrievalConfig::default()
        };
        for q in ["pricing", "team", "refunds"] {
            converse(&handle, &provider, &settings, q).await.unwrap();
        }
        let prompts = provider.prompts.lock().unwrap();
        assert_eq!(prompts[2].messages.len(), 3);
        assert_eq!(prompts[2].messages[0].1, "team");
    }

    #[tokio::test]
    async fn test_deleted_session_is_not_found() {
        let (registry, handle, id) = session(&corpus()).await;
        registry.delete(&id).await.unwrap();
        let err = converse(&handle, &StubProvider::default(), &settings(), "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, SiteChatError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let (_registry, handle, _id) = session(&corpus()).await;
        let err = converse(&handle, &StubProvider::default(), &settings(), "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, SiteChatError::Input(_)));
    }

    #[test]
    fn test_build_context_budget() {
        let hits: Vec<ScoredChunk> = corpus()
            .into_iter()
            .map(|chunk| ScoredChunk { chunk, score: 1.0 })
            .collect();

        let (all, used) = build_context(&hits, 10_000);
        assert_eq!(used, 3);
        assert!(all.starts_with("[1] https://a.test/pricing\npricing plans"));
        assert!(all.contains("\n\n[2] https://a.test/about\n"));

        let (one, used) = build_context(&hits, 60);
        assert_eq!(used, 1);
        assert!(one.chars().count() <= 60);

        let (tiny, used) = build_context(&hits, 10);
        assert_eq!(used, 1);
        assert_eq!(tiny, "[1] https:");
    }
}
