//! Conversation Session
//!
//! Drives one session's conversation: appends the user message, streams the
//! completion through the decoder and segmenter, broadcasts each completed
//! sentence to the session's viewers and commits the assistant reply.
//!
//! # Submission Flow
//!
//! ```text
//! submit_user_message("hi")
//!   │ acquire submit lock (FIFO)
//!   ├─► history += {user, "hi"}
//!   ├─► provider.open_streaming_completion(history)
//!   │     for each chunk:
//!   │       StreamDecoder ─► ContentDelta ─► pending text
//!   │                                         └─► segmenter.feed ─► broadcast
//!   │     [DONE]:
//!   │       segmenter.finish ─► broadcast trailing fragment
//!   └─► history += {assistant, pending text}
//! ```
//!
//! # Locking
//!
//! Two locks with different jobs:
//!
//! - `submit_lock` (`tokio::sync::Mutex`, fair) is held for a whole
//!   submission. Overlapping submissions queue in arrival order.
//! - `state` (`parking_lot::Mutex`) guards history and pending text for
//!   short synchronous sections only, never across an `.await`, so readers
//!   see a consistent snapshot even mid-stream.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{CompletionProvider, CompletionRequest, ProviderChunk};
use crate::config::{
    RelayConfig, DEFAULT_MODEL, DEFAULT_SYSTEM_PROMPT, DEFAULT_VIEWER_CHANNEL_CAPACITY,
};
use crate::error::RelayError;
use crate::messages::SessionId;
use crate::session::{Message, Session, SessionMetadata};
use crate::streaming::{SentenceSegmenter, StreamDecoder, StreamEvent};
use crate::viewer_registry::{ViewerRegistry, ViewerSubscription};

/// Settings shared by every session of a registry
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSettings {
    /// Model sent with every completion request
    pub model: String,
    /// Sampling temperature; provider default when `None`
    pub temperature: Option<f32>,
    /// System prompt that opens each new history
    pub system_prompt: String,
    /// Capacity of each viewer's frame channel
    pub viewer_channel_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            viewer_channel_capacity: DEFAULT_VIEWER_CHANNEL_CAPACITY,
        }
    }
}

impl SessionSettings {
    /// Take session settings from the relay configuration
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            model: config.provider.model.clone(),
            temperature: config.provider.temperature,
            system_prompt: config.session.system_prompt.clone(),
            viewer_channel_capacity: config.session.viewer_channel_capacity,
        }
    }
}

/// Outcome of a successful submission
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    /// Assistant message committed to history
    pub content: String,
    /// Number of sentences broadcast to viewers
    pub sentences: usize,
}

/// Cancels the pending response unless the submission committed it
///
/// Covers early returns and a submission future dropped mid-stream.
struct PendingResponse<'a> {
    state: &'a Mutex<Session>,
    committed: bool,
}

impl Drop for PendingResponse<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.state.lock().cancel_streaming();
        }
    }
}

/// One conversation and the viewers watching it
pub struct ConversationSession {
    id: SessionId,
    state: Mutex<Session>,
    submit_lock: tokio::sync::Mutex<()>,
    viewers: ViewerRegistry,
    provider: Arc<dyn CompletionProvider>,
    settings: Arc<SessionSettings>,
}

impl ConversationSession {
    /// Create a session whose history holds only the system prompt
    #[must_use]
    pub fn new(
        id: SessionId,
        provider: Arc<dyn CompletionProvider>,
        settings: Arc<SessionSettings>,
    ) -> Self {
        let session = Session::with_system_prompt(id.clone(), settings.system_prompt.clone());
        Self {
            viewers: ViewerRegistry::new(id.clone()),
            id,
            state: Mutex::new(session),
            submit_lock: tokio::sync::Mutex::new(()),
            provider,
            settings,
        }
    }

    /// Session ID
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Snapshot of the conversation history
    #[must_use]
    pub fn history(&self) -> Vec<Message> {
        self.state.lock().all_messages().to_vec()
    }

    /// Snapshot of the in-progress assistant text (empty when idle)
    #[must_use]
    pub fn pending_text(&self) -> String {
        self.state.lock().pending_text().to_string()
    }

    /// Snapshot of the session metadata
    #[must_use]
    pub fn metadata(&self) -> SessionMetadata {
        self.state.lock().metadata.clone()
    }

    /// Viewers attached to this session
    #[must_use]
    pub fn viewers(&self) -> &ViewerRegistry {
        &self.viewers
    }

    /// Attach a new viewer
    ///
    /// The viewer receives sentences completed after this call; dropping the
    /// subscription detaches it.
    #[must_use]
    pub fn attach_viewer(&self) -> ViewerSubscription {
        self.viewers.subscribe(self.settings.viewer_channel_capacity)
    }

    /// Whether a submission is running or queued
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.submit_lock.try_lock().is_err()
    }

    /// Replace the history with a single system message
    ///
    /// # Errors
    ///
    /// Returns `RelayError::SessionBusy` while a submission is in flight.
    pub fn set_system_prompt(&self, prompt: impl Into<String>) -> Result<(), RelayError> {
        let Ok(_guard) = self.submit_lock.try_lock() else {
            return Err(RelayError::SessionBusy(self.id.to_string()));
        };
        self.state.lock().reset_with_system_prompt(prompt);
        tracing::info!(session_id = %self.id, "System prompt replaced; history reset");
        Ok(())
    }

    /// Submit a user message and stream the reply to all viewers
    ///
    /// Resolves once the provider stream has terminated and the assistant
    /// message is in history. Calls on the same session run one at a time in
    /// arrival order.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::MalformedStreamFrame` or
    /// `RelayError::ProviderStreamError` if the stream fails. The user
    /// message stays in history and no assistant message is committed.
    pub async fn submit_user_message(
        &self,
        text: impl Into<String>,
    ) -> Result<Completion, RelayError> {
        let text = text.into();
        let _turn = self.submit_lock.lock().await;

        let request = {
            let mut session = self.state.lock();
            session.add_user_message(text);
            session.start_assistant_response();
            CompletionRequest::new(self.settings.model.clone(), session.all_messages().to_vec())
                .with_temperature(self.settings.temperature)
        };
        let mut pending = PendingResponse {
            state: &self.state,
            committed: false,
        };

        // Viewers that hung up while idle never saw a failed write
        self.viewers.cleanup_disconnected();

        tracing::info!(
            session_id = %self.id,
            messages = request.messages.len(),
            viewers = self.viewers.count(),
            provider = self.provider.name(),
            "Submitting user message"
        );

        match self.stream_completion(&request).await {
            Ok(completion) => {
                pending.committed = true;
                tracing::info!(
                    session_id = %self.id,
                    chars = completion.content.len(),
                    sentences = completion.sentences,
                    "Assistant response committed"
                );
                Ok(completion)
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Submission aborted");
                Err(e)
            }
        }
    }

    async fn stream_completion(&self, request: &CompletionRequest) -> Result<Completion, RelayError> {
        let mut rx = self.provider.open_streaming_completion(request).await?;
        let mut decoder = StreamDecoder::new();
        let mut segmenter = SentenceSegmenter::new();

        while let Some(chunk) = rx.recv().await {
            match chunk {
                ProviderChunk::Data(bytes) => decoder.push(&bytes),
                ProviderChunk::Error(e) => return Err(RelayError::ProviderStreamError(e)),
            }
            if self.apply_events(&mut decoder, &mut segmenter)? {
                return Ok(self.commit(&mut segmenter));
            }
        }

        decoder.finish();
        if self.apply_events(&mut decoder, &mut segmenter)? {
            return Ok(self.commit(&mut segmenter));
        }

        Err(RelayError::ProviderStreamError(
            "stream closed before terminal signal".into(),
        ))
    }

    /// Apply every decodable event; `true` once the terminal signal arrived
    fn apply_events(
        &self,
        decoder: &mut StreamDecoder,
        segmenter: &mut SentenceSegmenter,
    ) -> Result<bool, RelayError> {
        while let Some(event) = decoder.next_event()? {
            match event {
                StreamEvent::ContentDelta(delta) => {
                    let sentences = {
                        let mut session = self.state.lock();
                        session
                            .append_streaming(&delta)
                            .map(|text| segmenter.feed(text))
                            .unwrap_or_default()
                    };
                    self.viewers.broadcast(&sentences);
                }
                StreamEvent::End => return Ok(true),
            }
        }
        Ok(false)
    }

    /// Flush the trailing fragment and commit the assistant message
    fn commit(&self, segmenter: &mut SentenceSegmenter) -> Completion {
        let tail = segmenter.finish(&self.pending_text());
        self.viewers.broadcast(&tail);

        let content = self
            .state
            .lock()
            .complete_streaming()
            .map(|message| message.content.clone())
            .unwrap_or_default();

        Completion {
            content,
            sentences: segmenter.emitted(),
        }
    }
}

impl std::fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSession")
            .field("id", &self.id)
            .field("provider", &self.provider.name())
            .field("viewers", &self.viewers.count())
            .finish_non_exhaustive()
    }
}
