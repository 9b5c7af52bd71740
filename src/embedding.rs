//! Embedding provider abstraction and implementations.
//!
//! Providers implement [`Embedder`], which performs exactly one upstream
//! round trip per call. Retrying is layered on top by [`embed_with_retry`]
//! so every provider (and every test fake) shares one attempt budget:
//!
//! - transient failures (HTTP 429, 5xx, network errors) are retried with the
//!   same batch, backing off 1×, 2×, 4×… the configured base delay;
//! - a rejected request ([`RagError::EmbeddingRejected`], HTTP 4xx) fails
//!   immediately;
//! - exhausting the budget yields [`RagError::EmbeddingFatal`].
//!
//! | Config value | Provider |
//! |--------------|----------|
//! | `"disabled"` | [`DisabledEmbedder`] |
//! | `"openai"` | [`OpenAIEmbedder`] |
//! | `"ollama"` | [`OllamaEmbedder`] |
//! | `"local"` | `LocalEmbedder` (feature `local-embeddings`) |

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{rag_error, RagError};

/// A text embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, e.g. `"text-embedding-3-small"`.
    fn model_name(&self) -> &str;

    /// Embed `texts` in one request, returning vectors in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Attempt budget for one batch.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards (capped at 32×).
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        // attempt is 1-based; no delay before the first.
        let exp = attempt.saturating_sub(2).min(5);
        self.base_delay * (1u32 << exp)
    }
}

/// Embed one batch, re-sending it unchanged on transient failure.
pub async fn embed_with_retry(
    embedder: &dyn Embedder,
    texts: &[String],
    policy: RetryPolicy,
) -> Result<Vec<Vec<f32>>> {
    let mut last_err = None;

    for attempt in 1..=policy.max_attempts {
        if attempt > 1 {
            tokio::time::sleep(policy.delay_before(attempt)).await;
        }

        match embedder.embed_batch(texts).await {
            Ok(vectors) if vectors.len() == texts.len() => return Ok(vectors),
            Ok(vectors) => {
                last_err = Some(anyhow::anyhow!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    texts.len()
                ));
            }
            Err(e) => {
                if rag_error(&e).is_some_and(|r| !r.is_retryable()) {
                    return Err(e);
                }
                tracing::warn!(
                    "embedding attempt {}/{} failed: {}",
                    attempt,
                    policy.max_attempts,
                    e
                );
                last_err = Some(e);
            }
        }
    }

    Err(RagError::EmbeddingFatal {
        attempts: policy.max_attempts,
        source: last_err.unwrap_or_else(|| anyhow::anyhow!("no attempts were made")),
    }
    .into())
}

/// Embed a single query text.
pub async fn embed_query(
    embedder: &dyn Embedder,
    text: &str,
    policy: RetryPolicy,
) -> Result<Vec<f32>> {
    let results = embed_with_retry(embedder, &[text.to_string()], policy).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

// ============ Disabled Provider ============

/// Fails every request; used when `embedding.provider = "disabled"`.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::EmbeddingRejected {
            status: 0,
            body: "Embedding provider is disabled. Set [embedding] provider in config.".into(),
        }
        .into())
    }
}

// ============ OpenAI Provider ============

/// Calls `POST {url}/v1/embeddings`, `https://api.openai.com` unless
/// `[embedding].url` says otherwise.
///
/// Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAIEmbedder {
    model: String,
    dims: Option<usize>,
    api_key: String,
    url: String,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;

        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims: config.dims,
            api_key,
            url: config.base_url(),
            client,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        if let Some(dims) = self.dims {
            body["dimensions"] = serde_json::json!(dims);
        }

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let json: serde_json::Value = response.json().await?;
            return parse_openai_response(&json);
        }

        let body_text = response.text().await.unwrap_or_default();
        classify_http_failure("OpenAI", status, body_text)
    }
}

/// Turn a non-success HTTP status into a retryable or a rejected error.
fn classify_http_failure<T>(
    provider: &str,
    status: reqwest::StatusCode,
    body_text: String,
) -> Result<T> {
    // Rate limited or server error: worth re-sending.
    if status.as_u16() == 429 || status.is_server_error() {
        bail!("{} API error {}: {}", provider, status, body_text);
    }
    Err(RagError::EmbeddingRejected {
        status: status.as_u16(),
        body: body_text,
    }
    .into())
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
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

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Calls `POST {url}/api/embed` on a local Ollama instance
/// (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let url = config.base_url();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { model, url, client })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url,
                    e
                )
            })?;

        let status = response.status();
        if status.is_success() {
            let json: serde_json::Value = response.json().await?;
            return parse_ollama_response(&json);
        }

        let body_text = response.text().await.unwrap_or_default();
        classify_http_failure("Ollama", status, body_text)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

// ============ Local Provider (fastembed) ============

/// Runs a sentence-embedding model in-process via fastembed.
///
/// The model is downloaded from Hugging Face on first use and kept loaded
/// for the lifetime of the provider.
#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedder {
    model_name: String,
    batch_size: usize,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "multilingual-e5-small".to_string());
        config_to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let fastembed_model = config_to_fastembed_model(&self.model_name)?;
        let batch_size = self.batch_size;
        let texts = texts.to_vec();
        let slot = Arc::clone(&self.model);

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model)
                        .with_show_download_progress(true),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("local embedding model unavailable"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

/// Instantiate the provider named by `config.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then echoes text lengths.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        seen: std::sync::Mutex<Vec<Vec<String>>>,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                seen: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Embedder for Flaky {
        fn model_name(&self) -> &str {
            "flaky"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.seen.lock().unwrap().push(texts.to_vec());
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                bail!("503 upstream busy");
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    struct Rejecting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Embedder for Rejecting {
        fn model_name(&self) -> &str {
            "rejecting"
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RagError::EmbeddingRejected {
                status: 400,
                body: "input too long".into(),
            }
            .into())
        }
    }

    fn instant(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    fn batch() -> Vec<String> {
        vec!["가".to_string(), "abc".to_string()]
    }

    #[tokio::test]
    async fn succeeds_on_last_attempt_with_same_batch() {
        let flaky = Flaky::new(4);
        let vectors = embed_with_retry(&flaky, &batch(), instant(5)).await.unwrap();

        assert_eq!(vectors, vec![vec![3.0, 1.0], vec![3.0, 1.0]]);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 5);
        let seen = flaky.seen.lock().unwrap();
        assert!(seen.iter().all(|b| *b == batch()));
    }

    #[tokio::test]
    async fn exhausting_budget_is_fatal() {
        let flaky = Flaky::new(5);
        let err = embed_with_retry(&flaky, &batch(), instant(5)).await.unwrap_err();

        assert!(matches!(
            rag_error(&err),
            Some(RagError::EmbeddingFatal { attempts: 5, .. })
        ));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn rejected_request_is_not_retried() {
        let rejecting = Rejecting {
            calls: AtomicU32::new(0),
        };
        let err = embed_with_retry(&rejecting, &batch(), instant(5))
            .await
            .unwrap_err();

        assert!(matches!(
            rag_error(&err),
            Some(RagError::EmbeddingRejected { status: 400, .. })
        ));
        assert_eq!(rejecting.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(p.delay_before(2), Duration::from_millis(100));
        assert_eq!(p.delay_before(3), Duration::from_millis(200));
        assert_eq!(p.delay_before(5), Duration::from_millis(800));
        assert_eq!(p.delay_before(10), Duration::from_millis(3200));
    }

    #[test]
    fn openai_response_is_reordered_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.5, 0.5]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.5, 0.5]]);
    }

    #[test]
    fn ollama_response_requires_embeddings() {
        let err = parse_ollama_response(&serde_json::json!({})).unwrap_err();
        assert!(err.to_string().contains("missing embeddings"));
    }

    #[test]
    fn client_errors_are_rejections() {
        let err = classify_http_failure::<()>(
            "OpenAI",
            reqwest::StatusCode::BAD_REQUEST,
            "bad".into(),
        )
        .unwrap_err();
        assert!(matches!(
            rag_error(&err),
            Some(RagError::EmbeddingRejected { status: 400, .. })
        ));

        let err = classify_http_failure::<()>(
            "OpenAI",
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "slow down".into(),
        )
        .unwrap_err();
        assert!(rag_error(&err).is_none());
    }

    #[tokio::test]
    async fn disabled_provider_fails_without_retry() {
        let err = embed_query(&DisabledEmbedder, "q", instant(5)).await.unwrap_err();
        assert!(matches!(
            rag_error(&err),
            Some(RagError::EmbeddingRejected { .. })
        ));
    }
}
