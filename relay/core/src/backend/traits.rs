//! Completion Provider Traits
//!
//! The seam between a conversation and whatever serves completions. A
//! provider only moves bytes: it opens one streaming request and forwards the
//! raw response chunks. Decoding those chunks is the session's job (see
//! [`crate::streaming::StreamDecoder`]), so every provider speaking the same
//! wire format shares one decoder.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::session::Message;

/// Raw output of a provider stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderChunk {
    /// A network chunk; may hold partial or several frames
    Data(Vec<u8>),
    /// The transport failed mid-stream
    Error(String),
}

/// A streaming chat completion request
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    /// Model to use (provider-specific identifier)
    pub model: String,
    /// Full ordered conversation history, system message first
    pub messages: Vec<Message>,
    /// Sampling temperature; provider default when `None`
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// Create a new request for a model and history
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
        }
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Completion provider trait
///
/// Implement this trait to relay from a different provider.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Get the provider name (e.g., "OpenAI")
    fn name(&self) -> &str;

    /// Check if the provider is reachable
    async fn health_check(&self) -> bool;

    /// Open a streaming completion
    ///
    /// Returns a channel receiver that yields response chunks in arrival
    /// order. The channel closes when the response body ends.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ProviderStreamError` if the request cannot be
    /// sent or the provider rejects it.
    async fn open_streaming_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<mpsc::Receiver<ProviderChunk>, RelayError>;
}
