//! Relay Core - Per-Session LLM Conversation Relay
//!
//! This crate holds everything needed to relay a streaming LLM conversation
//! to any number of live viewers, one complete sentence at a time. It is
//! transport-agnostic: the `relay-daemon` crate exposes it over HTTP/SSE, but
//! any caller that can hand over a session id and a message can drive it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Transports                               │
//! │     POST /message (submitter)           GET /connect (viewers)    │
//! └──────────────┬───────────────────────────────────┬───────────────┘
//!                │ submit_user_message               │ attach_viewer
//! ┌──────────────┼───────────────────────────────────┼───────────────┐
//! │              ▼            RELAY CORE             │               │
//! │  ┌────────────────────┐                          │               │
//! │  │  SessionRegistry   │  id ──► ConversationSession              │
//! │  └─────────┬──────────┘                          │               │
//! │            ▼                                     ▼               │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │                  ConversationSession                      │   │
//! │  │  ┌──────────┐  ┌───────────────┐  ┌───────────────────┐  │   │
//! │  │  │ History  │  │ StreamDecoder │  │  ViewerRegistry   │  │   │
//! │  │  │          │  │ + Segmenter   │──►  broadcast()      │  │   │
//! │  │  └──────────┘  └───────▲───────┘  └───────────────────┘  │   │
//! │  └────────────────────────┼──────────────────────────────────┘   │
//! │                           │ raw chunks                           │
//! │                 ┌─────────┴──────────┐                           │
//! │                 │ CompletionProvider │ (OpenAI-compatible)       │
//! │                 └────────────────────┘                           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`SessionRegistry`]: Creates sessions on first reference
//! - [`ConversationSession`]: History, submissions and viewers of one session
//! - [`StreamDecoder`]: Provider bytes to content deltas and end-of-stream
//! - [`SentenceSegmenter`]: Accumulated text to complete sentences
//! - [`ViewerRegistry`]: Fan-out of sentences to attached viewers
//! - [`CompletionProvider`]: The provider seam ([`OpenAiProvider`] implements it)
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use relay_core::{load_config, OpenAiProvider, SessionRegistry, SessionSettings};
//!
//! let (config, _source) = load_config(None)?;
//! let provider = Arc::new(OpenAiProvider::from_config(&config.provider)?);
//! let registry = SessionRegistry::new(provider, SessionSettings::from_config(&config));
//!
//! let session = registry.get_or_create("abc")?;
//! let mut viewer = session.attach_viewer();
//! session.submit_user_message("How are you?").await?;
//! while let Some(frame) = viewer.try_recv() {
//!     println!("{frame}");
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: Completion provider abstraction (OpenAI-compatible)
//! - [`config`]: Layered configuration (defaults, TOML, environment)
//! - [`conversation`]: Per-session submission pipeline
//! - [`error`]: Relay error kinds
//! - [`messages`]: Session identifiers and message roles
//! - [`session`]: Conversation history data
//! - [`session_registry`]: Session lookup and creation
//! - [`streaming`]: Stream decoding and sentence segmentation
//! - [`viewer_registry`]: Viewer attachment and broadcast

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod conversation;
pub mod error;
pub mod messages;
pub mod session;
pub mod session_registry;
pub mod streaming;
pub mod viewer_registry;

// Re-exports for convenience
pub use backend::{CompletionProvider, CompletionRequest, OpenAiProvider, ProviderChunk};
pub use conversation::{Completion, ConversationSession, SessionSettings};
pub use error::RelayError;
pub use messages::{MessageRole, SessionId};
pub use session::{Message, Session, SessionMetadata, SessionState};
pub use session_registry::SessionRegistry;

// Streaming exports
pub use streaming::{split_sentences, Segmentation, SentenceSegmenter, StreamDecoder, StreamEvent};

// Viewer registry exports
pub use viewer_registry::{
    BroadcastResult, ViewerHandle, ViewerId, ViewerRegistry, ViewerSubscription,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, ProviderConfig, RelayConfig, SessionConfig,
};
