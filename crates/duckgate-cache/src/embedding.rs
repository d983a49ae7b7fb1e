//! Embedding providers for cache lookups and in-scan deduplication.
//!
//! [`LocalEmbedder`] hashes diff tokens into a fixed-size vector and needs no
//! network. [`EmbeddingClient`] calls an OpenAI-compatible `/embeddings`
//! endpoint.

use async_trait::async_trait;
use duckgate_core::{DuckgateError, EmbeddingConfig, EmbeddingVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Turns diff text into fixed-dimension vectors.
///
/// Implementations must be deterministic: identical input yields an identical
/// vector, and every vector has [`dimensions`](Embedder::dimensions) entries.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length of every returned vector.
    fn dimensions(&self) -> usize;

    /// Embed `texts`, returning one vector per input in the same order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, DuckgateError>;
}

/// Build the embedder selected by `[embedding] provider`.
///
/// # Errors
///
/// Returns [`DuckgateError::Config`] for an unknown provider or a remote
/// provider without an API key.
///
/// # Examples
///
/// ```
/// use duckgate_core::EmbeddingConfig;
/// use duckgate_cache::embedding::{from_config, Embedder};
///
/// let embedder = from_config(&EmbeddingConfig::default()).unwrap();
/// assert_eq!(embedder.dimensions(), 384);
/// ```
pub fn from_config(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>, DuckgateError> {
    match config.provider.as_str() {
        "local" => Ok(Box::new(LocalEmbedder::new(config.dimensions))),
        "openai" => Ok(Box::new(EmbeddingClient::with_config(config)?)),
        other => Err(DuckgateError::Config(format!(
            "unknown embedding provider '{other}' (expected \"local\" or \"openai\")"
        ))),
    }
}

/// Offline embedder based on signed feature hashing.
///
/// Each diff line contributes its identifier-like tokens and adjacent token
/// pairs, tagged with the line's diff marker so an added line and a removed
/// line with the same text land in different buckets. The result is
/// L2-normalized, so near-identical diffs score close to 1.0 under cosine
/// similarity.
///
/// # Examples
///
/// ```
/// use duckgate_cache::embedding::LocalEmbedder;
///
/// let embedder = LocalEmbedder::new(256);
/// let a = embedder.embed_one("+let token = read();\n");
/// let b = embedder.embed_one("+let token = read();\n");
/// assert_eq!(a, b);
/// assert_eq!(a.dimensions(), 256);
/// ```
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dimensions: usize,
}

impl LocalEmbedder {
    /// Create an embedder producing `dimensions`-long vectors (minimum 1).
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Embed one text synchronously.
    pub fn embed_one(&self, text: &str) -> EmbeddingVector {
        let mut values = vec![0f32; self.dimensions];

        for line in text.lines() {
            let (marker, body) = match line.chars().next() {
                Some(c @ ('+' | '-')) => (c, &line[1..]),
                Some(' ') => (' ', &line[1..]),
                _ => (' ', line),
            };
            let tokens = tokenize(body);
            for token in &tokens {
                self.add_feature(&mut values, marker, token, "");
            }
            for pair in tokens.windows(2) {
                self.add_feature(&mut values, marker, pair[0], pair[1]);
            }
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        }
        EmbeddingVector::new(values)
    }

    fn add_feature(&self, values: &mut [f32], marker: char, a: &str, b: &str) {
        let mut hash = FNV_OFFSET;
        hash = fnv1a(hash, &[marker as u8]);
        hash = fnv1a(hash, a.as_bytes());
        if !b.is_empty() {
            hash = fnv1a(hash, &[0x1f]);
            hash = fnv1a(hash, b.as_bytes());
        }
        let bucket = (hash % self.dimensions as u64) as usize;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        values[bucket] += sign;
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, DuckgateError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(mut hash: u64, bytes: &[u8]) -> u64 {
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Split on anything that is not part of an identifier or number; single
/// punctuation characters are kept as tokens of their own.
fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in text.char_indices() {
        if c.is_alphanumeric() || c == '_' {
            start.get_or_insert(i);
            continue;
        }
        if let Some(s) = start.take() {
            tokens.push(&text[s..i]);
        }
        if !c.is_whitespace() {
            tokens.push(&text[i..i + c.len_utf8()]);
        }
    }
    if let Some(s) = start {
        tokens.push(&text[s..]);
    }
    tokens
}

/// Client for an OpenAI-compatible embeddings API.
///
/// # Examples
///
/// ```
/// use duckgate_cache::embedding::{Embedder, EmbeddingClient};
///
/// let client = EmbeddingClient::new("test-key", "text-embedding-3-small", 384);
/// assert_eq!(client.model(), "text-embedding-3-small");
/// assert_eq!(client.dimensions(), 384);
/// ```
pub struct EmbeddingClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl std::fmt::Debug for EmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const BATCH_SIZE: usize = 64;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDataItem>,
}

#[derive(Deserialize)]
struct EmbedDataItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    /// Create a client for the public OpenAI endpoint.
    pub fn new(api_key: &str, model: &str, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.to_string(),
            dimensions,
        }
    }

    /// Create a client from an [`EmbeddingConfig`].
    ///
    /// Falls back to the `OPENAI_API_KEY` env var if no key is configured.
    ///
    /// # Errors
    ///
    /// Returns [`DuckgateError::Config`] if no API key is available.
    pub fn with_config(config: &EmbeddingConfig) -> Result<Self, DuckgateError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                DuckgateError::Config(
                    "embedding API key not found: set embedding.api_key in .duckgate.toml or OPENAI_API_KEY".into(),
                )
            })?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }

    /// Point the client at another OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn embed_chunk(&self, batch: &[String]) -> Result<Vec<EmbeddingVector>, DuckgateError> {
        let request = EmbedRequest {
            model: &self.model,
            input: batch,
            dimensions: self.dimensions,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DuckgateError::Embedding(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".into());
            return Err(DuckgateError::Embedding(format!(
                "embeddings API returned {status}: {body}"
            )));
        }

        let mut parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| DuckgateError::Embedding(format!("failed to parse response: {e}")))?;

        if parsed.data.len() != batch.len() {
            return Err(DuckgateError::Embedding(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|item| item.index.unwrap_or(usize::MAX));

        parsed
            .data
            .into_iter()
            .map(|item| {
                if item.embedding.len() != self.dimensions {
                    return Err(DuckgateError::Embedding(format!(
                        "expected {} dimensions, got {}",
                        self.dimensions,
                        item.embedding.len()
                    )));
                }
                Ok(EmbeddingVector::new(item.embedding))
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, DuckgateError> {
        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(BATCH_SIZE) {
            all.extend(self.embed_chunk(batch).await?);
        }
        debug!(count = all.len(), model = %self.model, "embedded texts");
        Ok(all)
    }
}
