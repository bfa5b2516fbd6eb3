//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`NgramEmbedder`]** — deterministic character n-gram hashing; runs
//!   offline, the default for local and test use.
//! - **[`OpenAiEmbedder`]** — calls the OpenAI embeddings API with batching,
//!   retry, and backoff.
//! - **[`OllamaEmbedder`]** — calls a local Ollama instance's `/api/embed`.
//! - **[`DisabledEmbedder`]** — returns errors; used when embeddings are
//!   not configured.
//!
//! # Retry Strategy
//!
//! The HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// A fixed-dimensionality text embedding backend.
///
/// `embed_batch` returns one vector per input text, in input order, as a
/// single blocking call; any internal batching or parallelism is the
/// provider's own business.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Output vector dimensionality, agreed at collection-creation time.
    fn dims(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Convenience wrapper for single-text use (e.g. a search query).
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("empty embedding response"))
    }
}

/// Instantiate the provider selected by the config.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "ngram" => Ok(Arc::new(NgramEmbedder::new(config.dims))),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Ngram Provider ============

/// Deterministic character-trigram hashing embedder.
///
/// Each trigram of the lowercased text hashes to a bucket; the bucket
/// histogram is L2-normalized. Not semantically meaningful, but stable,
/// offline, and dimension-exact, which is what local pipelines and tests
/// need.
pub struct NgramEmbedder {
    dims: usize,
}

impl NgramEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl Embedder for NgramEmbedder {
    fn model_name(&self) -> &str {
        "char-ngram"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0f32; self.dims];
                let lowered = text.to_lowercase();
                let chars: Vec<char> = lowered.chars().collect();
                for window in chars.windows(3) {
                    let gram: String = window.iter().collect();
                    let digest = Sha256::digest(gram.as_bytes());
                    let bucket =
                        u64::from_le_bytes(digest[..8].try_into().unwrap()) % self.dims as u64;
                    vector[bucket as usize] += 1.0;
                }
                let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > f32::EPSILON {
                    for x in &mut vector {
                        *x /= norm;
                    }
                }
                vector
            })
            .collect())
    }
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings` with the configured model. Requires the
/// `OPENAI_API_KEY` environment variable.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
            model,
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }

    async fn embed_slice(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key =
            std::env::var("OPENAI_API_KEY").map_err(|_| anyhow!("OPENAI_API_KEY not set"))?;
        let body = serde_json::json!({ "model": self.model, "input": texts });

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: serde_json::Value = resp.json().await?;
                        let mut vectors = Vec::with_capacity(texts.len());
                        for item in parsed["data"].as_array().cloned().unwrap_or_default() {
                            let vector: Vec<f32> = item["embedding"]
                                .as_array()
                                .cloned()
                                .unwrap_or_default()
                                .iter()
                                .filter_map(|v| v.as_f64().map(|f| f as f32))
                                .collect();
                            vectors.push(vector);
                        }
                        if vectors.len() != texts.len() {
                            bail!(
                                "embedding count mismatch: sent {}, received {}",
                                texts.len(),
                                vectors.len()
                            );
                        }
                        return Ok(vectors);
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("OpenAI API returned {status}"));
                        continue;
                    }
                    let text = resp.text().await.unwrap_or_default();
                    bail!("OpenAI API returned {status}: {text}");
                }
                Err(e) => {
                    last_err = Some(anyhow!("request failed: {e}"));
                    continue;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("embedding retries exhausted")))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for slice in texts.chunks(self.batch_size) {
            out.extend(self.embed_slice(slice).await?);
        }
        Ok(out)
    }
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    base_url: String,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let base_url = std::env::var("OLLAMA_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:11434".to_string());
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
            model,
            dims: config.dims,
            base_url,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let resp = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Ollama API returned {status}: {text}");
        }
        let parsed: serde_json::Value = resp.json().await?;
        let vectors: Vec<Vec<f32>> = parsed["embeddings"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .map(|v| {
                v.as_array()
                    .cloned()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|x| x.as_f64().map(|f| f as f32))
                    .collect()
            })
            .collect();
        if vectors.len() != texts.len() {
            bail!(
                "embedding count mismatch: sent {}, received {}",
                texts.len(),
                vectors.len()
            );
        }
        Ok(vectors)
    }
}
