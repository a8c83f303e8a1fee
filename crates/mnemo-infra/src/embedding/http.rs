//! HTTP embeddings client.
//!
//! Speaks the OpenAI-style `POST {base_url}{path}` contract with a body of
//! `{model, input, dimensions}` and reads the first vector from `data`.

use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use mnemo_core::memory::embedder::Embedder;
use mnemo_types::config::EmbeddingConfig;
use mnemo_types::error::EmbeddingError;

/// Error bodies longer than this are truncated in `EmbeddingError::Status`.
const MAX_ERROR_BODY_CHARS: usize = 1000;

pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
    dimensions: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    /// Build a client from configuration.
    ///
    /// Fails with `NotConfigured` when the key or model is missing.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        if config.api_key.trim().is_empty() {
            return Err(EmbeddingError::NotConfigured("api key is empty".to_string()));
        }
        if config.model.trim().is_empty() {
            return Err(EmbeddingError::NotConfigured("model is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| EmbeddingError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint(&config.base_url, &config.path),
            api_key: SecretString::from(config.api_key.clone()),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn endpoint(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("text is empty".to_string()));
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
            dimensions: self.dimensions,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::Transport(format!("request timed out: {e}"))
                } else {
                    EmbeddingError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), "embedding request rejected");
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Response(format!("failed to decode response: {e}")))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Response("response contains no data".to_string()))?
            .embedding;
        if vector.is_empty() {
            return Err(EmbeddingError::Response("embedding vector is empty".to_string()));
        }
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }
}
