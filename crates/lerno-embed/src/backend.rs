//! Embedding backend trait and the OpenAI-compatible HTTP implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use lerno_core::{defaults, Error, Result};

/// Converts free text into a fixed-length vector.
///
/// Treated as an opaque external capability: callers only rely on the
/// dimension being stable for the lifetime of the backend.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Fixed dimensionality of returned vectors.
    fn dimension(&self) -> usize;
}

/// Configuration for [`HttpEmbeddingBackend`].
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Base URL of an OpenAI-compatible API (no trailing slash).
    pub base_url: String,
    /// Bearer token, if the endpoint requires one.
    pub api_key: Option<String>,
    /// Model name sent with each request.
    pub model: String,
    /// Expected embedding dimension.
    pub dimension: usize,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            model: defaults::EMBED_MODEL.to_string(),
            dimension: defaults::EMBED_DIMENSION,
            timeout: Duration::from_secs(defaults::EMBED_TIMEOUT_SECS),
        }
    }
}

impl HttpBackendConfig {
    /// Read configuration from `EMBED_*` environment variables, falling
    /// back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("EMBED_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        config.api_key = std::env::var("EMBED_API_KEY").ok();
        if let Ok(model) = std::env::var("EMBED_MODEL") {
            config.model = model;
        }
        if let Some(dim) = std::env::var("EMBED_DIMENSION")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            config.dimension = dim;
        }
        config
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embedding backend over an OpenAI-compatible `/v1/embeddings` endpoint.
pub struct HttpEmbeddingBackend {
    client: reqwest::Client,
    config: HttpBackendConfig,
}

impl HttpEmbeddingBackend {
    /// Create a backend with the given configuration.
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    #[instrument(skip(self, text), fields(subsystem = "embed", op = "embed"))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let url = format!("{}/v1/embeddings", self.config.base_url);

        let mut request = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.config.model,
            input: vec![text],
        });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "embedding endpoint returned {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response.json().await?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::Embedding("embedding response contained no data".into()))?;

        if embedding.len() != self.config.dimension {
            return Err(Error::Embedding(format!(
                "expected dimension {}, got {}",
                self.config.dimension,
                embedding.len()
            )));
        }

        debug!(
            subsystem = "embed",
            component = "http",
            op = "embed",
            model = %self.config.model,
            duration_ms = start.elapsed().as_millis() as u64,
            "Embedding computed"
        );
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = HttpBackendConfig::default();
        assert_eq!(config.model, defaults::EMBED_MODEL);
        assert_eq!(config.dimension, defaults::EMBED_DIMENSION);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_embedding_request_serialization() {
        let request = EmbeddingRequest {
            model: "text-embedding-3-small",
            input: vec!["hello"],
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("text-embedding-3-small"));
        assert!(json.contains("hello"));
    }

    #[test]
    fn test_embedding_response_deserialization() {
        let json = r#"{"data": [{"embedding": [0.1, 0.2, 0.3], "index": 0}]}"#;
        let response: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.data.len(), 1);
        assert_eq!(response.data[0].embedding, vec![0.1, 0.2, 0.3]);
    }
}
