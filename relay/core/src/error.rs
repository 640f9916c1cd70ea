//! Relay Errors
//!
//! Error kinds surfaced by the relay core. Decode and provider failures abort
//! only the submission that hit them; viewer failures never leave the
//! registry (they are logged and the viewer is detached).

use thiserror::Error;

use crate::viewer_registry::ViewerId;

/// Errors produced by the relay core
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    /// The caller supplied no session identifier
    #[error("missing session identifier")]
    MissingSessionIdentifier,

    /// A provider frame could not be decoded
    #[error("malformed stream frame ({reason}): {frame}")]
    MalformedStreamFrame {
        /// The offending frame payload (truncated for logging)
        frame: String,
        /// Why decoding failed
        reason: String,
    },

    /// The provider stream itself reported a failure
    #[error("provider stream error: {0}")]
    ProviderStreamError(String),

    /// Writing a frame to a viewer failed
    #[error("write to viewer {viewer} failed: {reason}")]
    ViewerWriteFailure {
        /// The viewer that could not be written to
        viewer: ViewerId,
        /// Why the write failed
        reason: String,
    },

    /// The session has a completion in flight and cannot be reset
    #[error("session {0} has a completion in flight")]
    SessionBusy(String),
}

/// Longest frame excerpt kept in a `MalformedStreamFrame` error
const MAX_FRAME_EXCERPT: usize = 200;

impl RelayError {
    /// Build a `MalformedStreamFrame` error, truncating long frames
    pub fn malformed(frame: &str, reason: impl Into<String>) -> Self {
        let frame = if frame.len() > MAX_FRAME_EXCERPT {
            let mut end = MAX_FRAME_EXCERPT;
            while !frame.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &frame[..end])
        } else {
            frame.to_string()
        };

        Self::MalformedStreamFrame {
            frame,
            reason: reason.into(),
        }
    }
}
