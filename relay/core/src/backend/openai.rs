//! OpenAI-Compatible Provider
//!
//! Streams chat completions from any server implementing the OpenAI API.
//!
//! # Endpoints
//!
//! - `POST {base_url}/chat/completions` - streaming completion (`"stream": true`)
//! - `GET {base_url}/models` - used as a health probe
//!
//! The response body is forwarded chunk by chunk without interpretation.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;

use super::traits::{CompletionProvider, CompletionRequest, ProviderChunk};
use crate::config::ProviderConfig;
use crate::error::RelayError;
use crate::session::Message;

/// Timeout for the health probe
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl<'a> From<&'a CompletionRequest> for ChatCompletionBody<'a> {
    fn from(request: &'a CompletionRequest) -> Self {
        Self {
            model: &request.model,
            messages: &request.messages,
            stream: true,
            temperature: request.temperature,
        }
    }
}

/// OpenAI-compatible provider client
#[derive(Clone)]
pub struct OpenAiProvider {
    /// Base URL without trailing slash
    base_url: String,
    /// Bearer token
    api_key: Option<String>,
    /// Capacity of the chunk channel handed to callers
    channel_capacity: usize,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OpenAiProvider {
    /// Create a provider for a base URL
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ProviderStreamError` if the HTTP client cannot be
    /// built.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, RelayError> {
        Self::from_config(&ProviderConfig {
            base_url: base_url.into(),
            api_key,
            ..ProviderConfig::default()
        })
    }

    /// Create from `ProviderConfig`
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ProviderStreamError` if the HTTP client cannot be
    /// built.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, RelayError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .build()
            .map_err(|e| {
                RelayError::ProviderStreamError(format!("failed to create HTTP client: {e}"))
            })?;

        if config.api_key.is_none() {
            tracing::warn!(
                base_url = %config.base_url,
                "No API key configured; requests are sent unauthenticated"
            );
        }

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            channel_capacity: config.channel_capacity.max(1),
            http_client,
        })
    }

    /// Get the base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get chat completions endpoint URL
    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Get models endpoint URL
    fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "OpenAI"
    }

    async fn health_check(&self) -> bool {
        self.authorized(self.http_client.get(self.models_url()))
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
            .is_ok_and(|response| response.status().is_success())
    }

    async fn open_streaming_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<mpsc::Receiver<ProviderChunk>, RelayError> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);

        let response = self
            .authorized(self.http_client.post(self.completions_url()))
            .json(&ChatCompletionBody::from(request))
            .send()
            .await
            .map_err(|e| RelayError::ProviderStreamError(format!("request failed: {e}")))?;

        // Check for HTTP errors
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::ProviderStreamError(format!(
                "provider returned {status}: {body}"
            )));
        }

        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Completion stream opened"
        );

        let mut stream = response.bytes_stream();

        // Spawn task to forward the body
        tokio::spawn(async move {
            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(bytes) => ProviderChunk::Data(bytes.to_vec()),
                    Err(e) => {
                        let _ = tx.send(ProviderChunk::Error(e.to_string())).await;
                        return;
                    }
                };
                if tx.send(chunk).await.is_err() {
                    // Receiver dropped, stop streaming
                    tracing::debug!("Completion receiver dropped; abandoning stream");
                    return;
                }
            }
        });

        Ok(rx)
    }
}
