//! Completion Provider Integration
//!
//! Abstracted access to streaming chat completion providers through a common
//! trait.
//!
//! # Available Providers
//!
//! - **OpenAI**: any OpenAI-compatible `/chat/completions` endpoint
//!
//! # Usage
//!
//! ```ignore
//! use relay_core::backend::{CompletionProvider, CompletionRequest, OpenAiProvider};
//!
//! let provider = OpenAiProvider::from_config(&config.provider)?;
//! let request = CompletionRequest::new("gpt-3.5-turbo", history);
//! let rx = provider.open_streaming_completion(&request).await?;
//! ```

mod openai;
mod traits;

pub use openai::OpenAiProvider;
pub use traits::{CompletionProvider, CompletionRequest, ProviderChunk};
