//! Minimal OpenAI REST client shared by the embedding and chat backends.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! With `max_retries = 0` exactly one request is made.

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum OpenAiError {
    #[error("OpenAI API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("OpenAI request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid OpenAI response: {0}")]
    InvalidResponse(String),
}

impl OpenAiError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, OpenAiError::Status { status: 429, .. })
    }

    fn is_retryable(&self) -> bool {
        match self {
            OpenAiError::Status { status, .. } => *status == 429 || *status >= 500,
            OpenAiError::Transport(_) => true,
            OpenAiError::InvalidResponse(_) => false,
        }
    }
}

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    max_retries: u32,
}

impl OpenAiClient {
    pub fn new(
        api_key: String,
        base_url: &str,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self, OpenAiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries,
        })
    }

    /// POST `body` to `<base_url>/<path>` and return the decoded JSON.
    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, OpenAiError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, ?delay, "retrying OpenAI request");
                tokio::time::sleep(delay).await;
            }

            match self.send_once(&url, body).await {
                Ok(json) => return Ok(json),
                Err(e) if e.is_retryable() => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            OpenAiError::InvalidResponse("request failed after retries".to_string())
        }))
    }

    async fn send_once(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, OpenAiError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let body = response.text().await.unwrap_or_default();
        Err(OpenAiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
