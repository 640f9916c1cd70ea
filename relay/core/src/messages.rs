//! Relay Messages
//!
//! Identifier and role types shared by the session, provider and transport
//! layers. Session identifiers are opaque strings chosen by the caller; the
//! relay never generates them.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Who sent a message
///
/// Serialised in lowercase because that is what completion providers expect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Defines assistant behavior; first in history
    System,
    /// User input
    User,
    /// Model output
    Assistant,
}

impl MessageRole {
    /// Wire name of the role
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session identifier
///
/// Opaque and caller-supplied. Construction through [`SessionId::parse`]
/// guarantees the id is non-empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Validate a raw session identifier
    ///
    /// # Errors
    ///
    /// Returns `RelayError::MissingSessionIdentifier` if the id is empty or
    /// only whitespace.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        if raw.trim().is_empty() {
            return Err(RelayError::MissingSessionIdentifier);
        }
        Ok(Self(raw.to_string()))
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}
