//! Session State
//!
//! Conversation history and the in-progress assistant message for one session.
//! This is plain data: locking and stream handling live in
//! [`crate::conversation`].
//!
//! # Invariants
//!
//! - The first message, if any, is the system message
//! - History is append-only; only [`Session::reset_with_system_prompt`] replaces it
//! - The pending assistant text exists only while a response is streaming

use serde::{Deserialize, Serialize};

use crate::messages::{MessageRole, SessionId};

/// A message in the conversation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: MessageRole,
    /// Message content
    pub content: String,
}

impl Message {
    /// Create a new message
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Session state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No completion in flight
    Idle,
    /// A completion stream is being applied
    Streaming,
}

/// Session metadata
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// When the session was created (Unix timestamp ms)
    pub created_at: u64,
    /// When the session was last active (Unix timestamp ms)
    pub last_active_at: u64,
    /// Assistant responses committed to history
    pub responses: u32,
}

impl SessionMetadata {
    /// Create new metadata
    #[must_use]
    pub fn new() -> Self {
        let now = now_ms();
        Self {
            created_at: now,
            last_active_at: now,
            responses: 0,
        }
    }

    /// Update last active timestamp
    pub fn touch(&mut self) {
        self.last_active_at = now_ms();
    }
}

impl Default for SessionMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// History and pending response of one conversation
#[derive(Clone, Debug)]
pub struct Session {
    /// Session ID
    pub id: SessionId,
    /// Session state
    pub state: SessionState,
    /// Session metadata
    pub metadata: SessionMetadata,
    /// Conversation history
    messages: Vec<Message>,
    /// Assistant text accumulated from the active stream
    pending: Option<String>,
}

impl Session {
    /// Create an empty session
    #[must_use]
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            state: SessionState::Idle,
            metadata: SessionMetadata::new(),
            messages: Vec::new(),
            pending: None,
        }
    }

    /// Create a session whose history starts with a system message
    #[must_use]
    pub fn with_system_prompt(id: SessionId, prompt: impl Into<String>) -> Self {
        let mut session = Self::new(id);
        session.messages.push(Message::system(prompt));
        session
    }

    /// Add a user message
    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
        self.metadata.touch();
    }

    /// Start a streaming assistant response
    pub fn start_assistant_response(&mut self) {
        self.pending = Some(String::new());
        self.state = SessionState::Streaming;
    }

    /// Append a delta to the streaming response
    ///
    /// Returns the whole pending text so far, or `None` if nothing is streaming.
    pub fn append_streaming(&mut self, text: &str) -> Option<&str> {
        let pending = self.pending.as_mut()?;
        pending.push_str(text);
        Some(pending.as_str())
    }

    /// Commit the streaming response to history
    ///
    /// Returns the committed message, or `None` if nothing was streaming.
    pub fn complete_streaming(&mut self) -> Option<&Message> {
        let content = self.pending.take()?;
        self.messages.push(Message::assistant(content));
        self.state = SessionState::Idle;
        self.metadata.responses += 1;
        self.metadata.touch();
        self.messages.last()
    }

    /// Drop the streaming response without committing it
    pub fn cancel_streaming(&mut self) {
        if self.pending.take().is_some() {
            tracing::debug!(session_id = %self.id, "Discarded uncommitted assistant response");
        }
        self.state = SessionState::Idle;
    }

    /// Check if currently streaming
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.pending.is_some()
    }

    /// Pending assistant text (empty when idle)
    #[must_use]
    pub fn pending_text(&self) -> &str {
        self.pending.as_deref().unwrap_or("")
    }

    /// Replace history with a single system message
    pub fn reset_with_system_prompt(&mut self, prompt: impl Into<String>) {
        self.messages.clear();
        self.messages.push(Message::system(prompt));
        self.metadata.touch();
    }

    /// Get all messages
    #[must_use]
    pub fn all_messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get current message count
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

/// Get current timestamp in milliseconds
fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
