//! OpenAI-compatible backend implementation.
//!
//! Talks to any `/chat/completions` endpoint speaking the OpenAI streaming
//! protocol. The default endpoint is Groq's.

use crate::config::{ApiKey, SessionConfig};
use crate::error::ChatError;
use crate::llm::{sse, CompletionClient, CompletionRequest, FragmentStream};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

/// Streaming client for an OpenAI-compatible chat API.
pub struct OpenAIBackend {
    endpoint: String,
    api_key: ApiKey,
    client: Client,
}

impl OpenAIBackend {
    /// Create a backend for the configured endpoint.
    ///
    /// No request timeout is set: replies stream for as long as the model
    /// keeps talking.
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("chat-cli/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            endpoint: chat_completions_url(&config.base_url),
            api_key: config.api_key.clone(),
            client,
        })
    }

    async fn open(&self, request: &CompletionRequest<'_>) -> Result<FragmentStream> {
        debug!(
            model = request.model,
            messages = request.messages.len(),
            "sending completion request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .json(request)
            .send()
            .await
            .context("Failed to connect to completion API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "API request failed with status {}: {}",
                status,
                error_message(&body)
            ));
        }

        info!(status = %response.status(), "completion stream opened");
        Ok(sse::text_fragments(response.bytes_stream()))
    }
}

#[async_trait]
impl CompletionClient for OpenAIBackend {
    async fn create_stream(
        &self,
        request: &CompletionRequest<'_>,
    ) -> Result<FragmentStream, ChatError> {
        self.open(request).await.map_err(ChatError::StreamCreation)
    }
}

fn chat_completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

/// Pull the human-readable message out of an API error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| {
            let body = body.trim();
            if body.is_empty() {
                "Unknown error".to_string()
            } else {
                body.to_string()
            }
        })
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}
