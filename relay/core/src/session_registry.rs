//! Session Registry
//!
//! Maps caller-chosen session identifiers to live conversations. A session is
//! created the first time its id is referenced and lives for the rest of the
//! process; there is no eviction.

use std::sync::Arc;

use dashmap::DashMap;

use crate::backend::CompletionProvider;
use crate::conversation::{ConversationSession, SessionSettings};
use crate::error::RelayError;
use crate::messages::SessionId;

/// Registry of all sessions
///
/// Thread-safe; lookups and creation for different ids never contend on a
/// global lock.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<ConversationSession>>,
    provider: Arc<dyn CompletionProvider>,
    settings: Arc<SessionSettings>,
}

impl SessionRegistry {
    /// Create an empty registry whose sessions share a provider
    #[must_use]
    pub fn new(provider: Arc<dyn CompletionProvider>, settings: SessionSettings) -> Self {
        Self {
            sessions: DashMap::new(),
            provider,
            settings: Arc::new(settings),
        }
    }

    /// Get or create the session for an id
    ///
    /// Concurrent calls with the same new id create exactly one session.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::MissingSessionIdentifier` if the id is empty.
    pub fn get_or_create(&self, session_id: &str) -> Result<Arc<ConversationSession>, RelayError> {
        let id = SessionId::parse(session_id)?;
        if let Some(session) = self.sessions.get(session_id) {
            return Ok(Arc::clone(session.value()));
        }

        let session = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| {
                tracing::info!(session_id = %id, "Session created");
                Arc::new(ConversationSession::new(
                    id,
                    Arc::clone(&self.provider),
                    Arc::clone(&self.settings),
                ))
            })
            .clone();
        Ok(session)
    }

    /// Get an existing session without creating it
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Arc<ConversationSession>> {
        self.sessions.get(session_id).map(|s| Arc::clone(s.value()))
    }

    /// Number of sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session exists yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// IDs of all sessions
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// The provider shared by all sessions
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn CompletionProvider> {
        &self.provider
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}
