//! Completion Stream Processing
//!
//! Turns provider bytes into the sentences viewers receive.
//!
//! # Pipeline
//!
//! ```text
//! provider bytes ──► StreamDecoder ──► ContentDelta ──► pending text
//!                                                           │
//!                                                           ▼
//!             viewers ◄── broadcast ◄── SentenceSegmenter::feed()
//! ```
//!
//! Both stages are synchronous and hold no locks; the
//! [`ConversationSession`](crate::conversation::ConversationSession) drives
//! them while it owns the submission.

mod decoder;
mod segmenter;

pub use decoder::{StreamDecoder, StreamEvent, DONE_SENTINEL, MAX_FRAME_SIZE};
pub use segmenter::{split_sentences, Segmentation, SentenceSegmenter};
