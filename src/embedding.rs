//! Embedding backends.
//!
//! - **[`OpenAiEmbedder`]**: calls `POST /v1/embeddings`, one text per request.
//! - **[`DisabledEmbedder`]**: always fails; used when embeddings are not
//!   configured or no API key is present. Ingestion then stores documents
//!   without chunks and chat replies are never grounded.
//!
//! Use [`create_embedder`] to pick one from configuration.

use async_trait::async_trait;
use tracing::warn;

use concierge_core::embedding::Embedder;
use concierge_core::error::{Error, Result};

use crate::config::EmbeddingConfig;
use crate::openai::{OpenAiClient, OpenAiError};

// ============ Disabled Embedder ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::EmbeddingFailed(
            "embedding provider is disabled".to_string(),
        ))
    }
}

// ============ OpenAI Embedder ============

pub struct OpenAiEmbedder {
    client: OpenAiClient,
    model: String,
    dims: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let client = OpenAiClient::new(
            api_key,
            &config.base_url,
            config.timeout_secs,
            config.max_retries,
        )
        .map_err(|e| Error::EmbeddingFailed(e.to_string()))?;
        Ok(Self {
            client,
            model: config.model.clone(),
            dims: config.dims,
        })
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

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });
        let json = self
            .client
            .post_json("embeddings", &body)
            .await
            .map_err(|e| Error::EmbeddingFailed(e.to_string()))?;
        let vector = parse_embedding_response(&json)
            .map_err(|e| Error::EmbeddingFailed(e.to_string()))?;

        if vector.len() != self.dims {
            return Err(Error::EmbeddingFailed(format!(
                "expected {} dimensions from {}, got {}",
                self.dims,
                self.model,
                vector.len()
            )));
        }
        Ok(vector)
    }
}

/// Extract `data[0].embedding` from an embeddings response.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>, OpenAiError> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| OpenAiError::InvalidResponse("missing data[0].embedding".to_string()))?;

    embedding
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| OpenAiError::InvalidResponse("non-numeric embedding value".into()))
        })
        .collect()
}

/// Build the configured embedder. A missing API key degrades to
/// [`DisabledEmbedder`] with a warning instead of failing startup.
pub fn create_embedder(config: &EmbeddingConfig, api_key: Option<String>) -> Box<dyn Embedder> {
    if !config.is_enabled() {
        return Box::new(DisabledEmbedder);
    }
    let Some(api_key) = api_key else {
        warn!("OPENAI_API_KEY not set; embeddings disabled");
        return Box::new(DisabledEmbedder);
    };
    match OpenAiEmbedder::new(config, api_key) {
        Ok(embedder) => Box::new(embedder),
        Err(e) => {
            warn!(error = %e, "could not build OpenAI embedder; embeddings disabled");
            Box::new(DisabledEmbedder)
        }
    }
}
