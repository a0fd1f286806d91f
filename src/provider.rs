//! Model capability: text embedding and text generation.
//!
//! The pipeline consumes a single [`ModelProvider`] with two operations,
//! `embed(texts) -> vectors` and `generate(prompt) -> text`, so tests can
//! substitute a deterministic stub with no network access.
//!
//! Implementations:
//! - **[`DisabledProvider`]**: every call fails; the default when no provider
//!   is configured.
//! - **[`OpenAIProvider`]**: `POST /embeddings` and `POST /chat/completions`
//!   against an OpenAI-compatible API.
//!
//! # Retry Strategy
//!
//! OpenAI calls use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use site_chat_core::models::Role;
use std::time::Duration;

use crate::config::ModelConfig;

/// Input to [`ModelProvider::generate`]: a system instruction followed by
/// chat messages in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub messages: Vec<(Role, String)>,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Embedding model identifier recorded alongside each index.
    fn model_name(&self) -> &str;
    /// Embedding dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts; one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    async fn generate(&self, prompt: &Prompt) -> Result<String>;
}

/// Embed a single text.
pub async fn embed_one(provider: &dyn ModelProvider, text: &str) -> Result<Vec<f32>> {
    provider
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// Instantiate the provider named by `model.provider`.
pub fn create_provider(config: &ModelConfig) -> Result<Box<dyn ModelProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        other => bail!("Unknown model provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// Provider used when `model.provider = "disabled"`; every call errors.
pub struct DisabledProvider;

#[async_trait]
impl ModelProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Model provider is disabled; set [model] provider = \"openai\"")
    }
    async fn generate(&self, _prompt: &Prompt) -> Result<String> {
        bail!("Model provider is disabled; set [model] provider = \"openai\"")
    }
}

// ============ OpenAI Provider ============

/// OpenAI-compatible embeddings + chat completions.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    embedding_model: String,
    dims: usize,
    chat_model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

impl OpenAIProvider {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build OpenAI HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url: config.url.trim_end_matches('/').to_string(),
            embedding_model: config.embedding_model.clone(),
            dims: config.dims,
            chat_model: config.chat_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    /// POST `body` to `{base_url}/{path}` with retry/backoff.
    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<serde_json::Value> {
        let endpoint = format!("{}/{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .context("Failed to decode OpenAI response");
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(%status, attempt, "OpenAI request failed; retrying");
                        last_err = Some(anyhow::anyhow!(
                            "OpenAI API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "OpenAI request failed; retrying");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("OpenAI request failed after retries")))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ModelProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.embedding_model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = EmbeddingRequest {
            model: &self.embedding_model,
            input: texts,
        };
        let json = self.post_json("embeddings", &body).await?;
        let vectors = parse_embeddings_response(&json)?;
        if vectors.len() != texts.len() {
            bail!(
                "OpenAI returned {} embeddings for {} inputs",
                vectors.len(),
                texts.len()
            );
        }
        Ok(vectors)
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let mut messages = Vec::with_capacity(prompt.messages.len() + 1);
        if !prompt.system.is_empty() {
            messages.push(ChatMessage {
                role: Role::System.as_str(),
                content: &prompt.system,
            });
        }
        for (role, content) in &prompt.messages {
            messages.push(ChatMessage {
                role: role.as_str(),
                content,
            });
        }

        let body = ChatRequest {
            model: &self.chat_model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            messages,
        };
        let json = self.post_json("chat/completions", &body).await?;
        parse_chat_response(json)
    }
}

/// Extract `data[].embedding` arrays, ordered by their `index` field.
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vec)| vec).collect())
}

fn parse_chat_response(json: serde_json::Value) -> Result<String> {
    let parsed: ChatResponse =
        serde_json::from_value(json).context("Invalid OpenAI chat response")?;
    let content = parsed
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .ok_or_else(|| anyhow::anyhow!("OpenAI chat response has no content"))?;
    Ok(content.trim().to_string())
}
