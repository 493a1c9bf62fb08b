//! Embedding providers.
//!
//! [`OpenAiEmbedder`] talks to any OpenAI-compatible `/v1/embeddings` endpoint.
//! [`StubEmbedder`] is a deterministic offline stand-in selected with
//! `CODE_INDEX_EMBEDDING_MODE=stub`, used by tests and smoke runs.

use crate::error::{Result, VectorStoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const EMBEDDING_MODE_ENV: &str = "CODE_INDEX_EMBEDDING_MODE";
pub const STUB_DIMENSION_ENV: &str = "CODE_INDEX_STUB_DIMENSION";
pub const DEFAULT_STUB_DIMENSION: usize = 384;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure reported by an embedding provider, with the HTTP status and response body when
/// there was one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EmbeddingError {
    pub message: String,
    pub status: Option<u16>,
    pub detail: Option<String>,
}

impl EmbeddingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            detail: None,
        }
    }

    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(VectorStoreError::config_invalid(
                "embedding base_url must not be empty",
            ));
        }
        if self.model.trim().is_empty() {
            return Err(VectorStoreError::config_invalid(
                "embedding model must not be empty",
            ));
        }
        Ok(())
    }

    /// `base_url` may or may not already end in `/v1`.
    #[must_use]
    pub fn embeddings_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/embeddings")
        } else {
            format!("{base}/v1/embeddings")
        }
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier recorded in status output.
    fn model_id(&self) -> &str;

    /// One vector per input, in input order. Empty input never reaches the provider.
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed_one(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::new("embedding response was empty"))
    }
}

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    config: EmbeddingConfig,
}

impl OpenAiEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EmbeddingError::new(format!("failed to build HTTP client: {e}")))?;
        Self::with_client(config, client)
    }

    /// Use a preconfigured HTTP client (proxies, timeouts, TLS roots).
    pub fn with_client(config: EmbeddingConfig, client: reqwest::Client) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client,
            url: config.embeddings_url(),
            config,
        })
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.config.model
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        log::debug!("Embedding {} texts with {}", texts.len(), self.config.model);

        let mut request = self.client.post(&self.url).json(&EmbeddingsRequest {
            model: &self.config.model,
            input: texts,
        });
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| EmbeddingError::new("embedding request failed").with_detail(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| EmbeddingError::new("failed to read embedding response").with_detail(e.to_string()))?;
        decode_embeddings(status, &body, texts.len())
    }
}

/// Turn an HTTP status and body into vectors, checking the count against `expected`.
pub fn decode_embeddings(
    status: u16,
    body: &str,
    expected: usize,
) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
    if !(200..300).contains(&status) {
        return Err(EmbeddingError::new("embedding request failed")
            .with_status(status)
            .with_detail(body));
    }
    let mut parsed: EmbeddingsResponse = serde_json::from_str(body).map_err(|e| {
        EmbeddingError::new("embedding response is not valid JSON")
            .with_status(status)
            .with_detail(e.to_string())
    })?;
    if parsed.data.len() != expected {
        return Err(EmbeddingError::new("embedding response length mismatch")
            .with_status(status)
            .with_detail(format!("expected {expected}, got {}", parsed.data.len())));
    }
    if parsed.data.iter().all(|item| item.index.is_some()) {
        parsed.data.sort_by_key(|item| item.index);
    }
    let vectors: Vec<Vec<f32>> = parsed
        .data
        .into_iter()
        .map(|item| {
            item.embedding
                .ok_or_else(|| EmbeddingError::new("embedding response missing vectors").with_status(status))
        })
        .collect::<std::result::Result<_, _>>()?;
    if let Some(first) = vectors.first() {
        let dimension = first.len();
        if let Some(odd) = vectors.iter().find(|v| v.len() != dimension || v.is_empty()) {
            return Err(EmbeddingError::new("embedding response has inconsistent dimensions")
                .with_status(status)
                .with_detail(format!("expected {dimension}, got {}", odd.len())));
        }
    }
    Ok(vectors)
}

/// Deterministic pseudo-embeddings: equal texts map to equal unit vectors.
#[derive(Debug, Clone)]
pub struct StubEmbedder {
    dimension: usize,
    model_id: String,
}

impl StubEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model_id: format!("stub-{dimension}"),
        }
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|text| stub_embed(text, self.dimension))
            .collect())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum EmbeddingMode {
    OpenAi,
    Stub,
}

impl EmbeddingMode {
    fn from_env() -> Result<Self> {
        let raw = env::var(EMBEDDING_MODE_ENV)
            .unwrap_or_else(|_| "openai".to_string())
            .to_ascii_lowercase();
        match raw.as_str() {
            "openai" | "" => Ok(Self::OpenAi),
            "stub" => Ok(Self::Stub),
            other => Err(VectorStoreError::config_invalid(format!(
                "Unsupported {EMBEDDING_MODE_ENV} '{other}' (expected 'openai' or 'stub')"
            ))),
        }
    }
}

/// Build the embedder selected by the environment for `config`.
pub fn embedder_from_env(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match EmbeddingMode::from_env()? {
        EmbeddingMode::OpenAi => Ok(Arc::new(OpenAiEmbedder::new(config.clone())?)),
        EmbeddingMode::Stub => {
            let dimension = match env::var(STUB_DIMENSION_ENV) {
                Ok(raw) => raw.trim().parse::<usize>().ok().filter(|d| *d > 0).ok_or_else(|| {
                    VectorStoreError::config_invalid(format!(
                        "{STUB_DIMENSION_ENV} must be a positive integer, got '{raw}'"
                    ))
                })?,
                Err(_) => DEFAULT_STUB_DIMENSION,
            };
            log::debug!("Using stub embeddings (dimension {dimension})");
            Ok(Arc::new(StubEmbedder::new(dimension)))
        }
    }
}

fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

fn stub_embed(text: &str, dimension: usize) -> Vec<f32> {
    let mut state =
        fnv1a_64(text.as_bytes()) ^ (dimension as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut vec = Vec::with_capacity(dimension);
    for _ in 0..dimension {
        let bits = splitmix64(&mut state);
        let high = (bits >> 32) as u32;
        let unit = f32::from_bits(0x3f80_0000 | (high >> 9)) - 1.0;
        vec.push(unit.mul_add(2.0, -1.0));
    }
    normalize(&mut vec);
    vec
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
