//! Sentence Segmentation
//!
//! Splits accumulated assistant text into complete sentences. A sentence
//! boundary is a run of whitespace that directly follows `.`, `!` or `?`.
//! Everything after the last boundary is the trailing fragment and is held
//! back until more text arrives or the stream ends.
//!
//! ```text
//! "I'm fine. Thanks! How a"
//!  └───┬────┘└──┬───┘└─┬──┘
//!   sentence  sentence remainder
//! ```

/// Characters that can end a sentence
const TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Result of splitting a text
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Segmentation<'a> {
    /// Complete sentences, trimmed, never empty
    pub sentences: Vec<&'a str>,
    /// Text after the last boundary, untrimmed
    pub remainder: &'a str,
    /// Byte offset where the remainder starts
    pub consumed: usize,
}

/// Split `text` into complete sentences and a trailing fragment
///
/// Deterministic: the same input always yields the same output.
#[must_use]
pub fn split_sentences(text: &str) -> Segmentation<'_> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let at_boundary = c.is_whitespace() && prev.is_some_and(|p| TERMINATORS.contains(&p));
        prev = Some(c);
        if !at_boundary {
            continue;
        }

        let sentence = text[start..i].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }

        // Swallow the rest of the whitespace run
        let mut end = i + c.len_utf8();
        while let Some(&(j, w)) = chars.peek() {
            if !w.is_whitespace() {
                break;
            }
            end = j + w.len_utf8();
            prev = Some(w);
            chars.next();
        }
        start = end;
    }

    Segmentation {
        sentences,
        remainder: &text[start..],
        consumed: start,
    }
}

/// Incremental segmenter for one assistant response
///
/// Fed the *whole* accumulated text after every delta, it returns only the
/// sentences that became complete since the previous call, so each sentence
/// is emitted exactly once.
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    /// Byte offset of the first unemitted character
    consumed: usize,
    /// Sentences emitted so far
    emitted: usize,
}

impl SentenceSegmenter {
    /// Create a segmenter for a fresh response
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return sentences completed since the last call
    ///
    /// `accumulated` must extend the text passed previously.
    pub fn feed(&mut self, accumulated: &str) -> Vec<String> {
        let Some(tail) = accumulated.get(self.consumed..) else {
            tracing::warn!(
                consumed = self.consumed,
                len = accumulated.len(),
                "Accumulated text shrank; restarting segmentation"
            );
            self.reset();
            return self.feed(accumulated);
        };

        let segmentation = split_sentences(tail);
        self.consumed += segmentation.consumed;
        self.emitted += segmentation.sentences.len();
        segmentation
            .sentences
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Flush at end of stream
    ///
    /// Returns any newly completed sentences followed by the trimmed
    /// trailing fragment, if non-empty.
    pub fn finish(&mut self, accumulated: &str) -> Vec<String> {
        let mut sentences = self.feed(accumulated);
        let remainder = accumulated.get(self.consumed..).unwrap_or("").trim();
        if !remainder.is_empty() {
            sentences.push(remainder.to_string());
            self.emitted += 1;
        }
        self.consumed = accumulated.len();
        sentences
    }

    /// Forget all progress
    pub fn reset(&mut self) {
        self.consumed = 0;
        self.emitted = 0;
    }

    /// Number of sentences emitted so far
    #[must_use]
    pub fn emitted(&self) -> usize {
        self.emitted
    }
}
