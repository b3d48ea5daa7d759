//! Embedding provider client.
//!
//! Maps question texts to fixed-length vectors for clustering. Vectors are
//! f32 (they are geometry, not money) and cached by the opportunity state
//! so a rescan only pays for unseen markets.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from the embedding provider.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {got} vectors for {want} inputs")]
    CountMismatch { want: usize, got: usize },

    #[error("provider not configured (missing API key)")]
    NotConfigured,
}

/// Configuration for the embedding provider.
#[derive(Debug, Clone)]
pub struct EmbedConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl EmbedConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Embedding provider: texts in, one vector per text out, order preserved.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbedDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// HTTP implementation over an OpenAI-compatible embeddings endpoint.
pub struct HttpEmbeddingClient {
    config: EmbedConfig,
    http: Client,
}

impl HttpEmbeddingClient {
    pub fn new(config: EmbedConfig) -> Result<Self, EmbedError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if !self.config.is_configured() {
            return Err(EmbedError::NotConfigured);
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbedRequest {
            model: &self.config.model,
            input: texts,
        };

        let response: EmbedResponse = self
            .http
            .post(format!("{}/embeddings", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.data.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                want: texts.len(),
                got: response.data.len(),
            });
        }

        // Data rows carry their input index; restore input order.
        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        debug!("Embedded {} texts", data.len());
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}
