//! Completion Stream Decoder
//!
//! Turns the raw byte chunks of a streaming chat completion into content
//! deltas and a terminal signal.
//!
//! # Wire Format
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}\n
//! \n
//! data: {"choices":[{"delta":{"content":"lo."}}]}\n
//! \n
//! data: [DONE]\n
//! ```
//!
//! Frames are newline-delimited. A network chunk may hold any number of
//! frames, including a partial one; bytes are buffered until the newline
//! arrives, so a frame (or a multi-byte character) split across chunks is
//! decoded once, intact.

use serde::Deserialize;

use crate::error::RelayError;

/// Payload that marks the end of a completion stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// Prefix carried by every payload frame
const DATA_PREFIX: &str = "data:";

/// SSE fields that carry no payload
const IGNORED_FIELDS: [&str; 3] = ["event:", "id:", "retry:"];

/// Maximum buffered frame size (1 MB)
///
/// A provider that never sends a newline must not grow the buffer forever.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Minimum buffer capacity for decoder
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Events decoded from a completion stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// An incremental fragment of assistant output
    ContentDelta(String),
    /// The provider's terminal signal
    End,
}

/// Outcome of decoding one frame
enum Frame {
    /// Blank line, comment, or a payload without content
    Skip,
    /// A content delta
    Delta(String),
    /// The terminal sentinel
    Done,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Decode a single frame (one line, without its newline)
fn decode_frame(line: &str) -> Result<Frame, RelayError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return Ok(Frame::Skip);
    }
    if IGNORED_FIELDS.iter().any(|field| line.starts_with(field)) {
        return Ok(Frame::Skip);
    }

    let payload = line.strip_prefix(DATA_PREFIX).map_or(line, str::trim);
    if payload.is_empty() {
        return Ok(Frame::Skip);
    }
    if payload == DONE_SENTINEL {
        return Ok(Frame::Done);
    }

    let chunk: CompletionChunk = serde_json::from_str(payload)
        .map_err(|e| RelayError::malformed(payload, e.to_string()))?;

    if let Some(error) = chunk.error {
        let message = error
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string);
        return Err(RelayError::ProviderStreamError(message));
    }

    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|content| !content.is_empty());

    Ok(content.map_or(Frame::Skip, Frame::Delta))
}

/// Incremental decoder for one completion stream
///
/// Feed it chunks with [`push`](Self::push), then drain events with
/// [`next_event`](Self::next_event) until it returns `Ok(None)`. Call
/// [`finish`](Self::finish) when the provider stream ends so a trailing frame
/// without a newline is still decoded.
#[derive(Debug)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    /// Position where we've consumed up to
    read_pos: usize,
    /// No more input will arrive
    eof: bool,
    /// The terminal sentinel has been decoded
    finished: bool,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    /// Create a new decoder
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
            eof: false,
            finished: false,
        }
    }

    /// Append a network chunk to the buffer
    ///
    /// Input after the terminal sentinel is dropped.
    pub fn push(&mut self, data: &[u8]) {
        if self.finished {
            return;
        }
        // Compact buffer if we've consumed a lot
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Mark the input as exhausted
    ///
    /// Any buffered bytes without a trailing newline become the final frame.
    pub fn finish(&mut self) {
        self.eof = true;
    }

    /// Whether the terminal sentinel has been decoded
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Get the number of undecoded bytes in the buffer
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Try to decode the next event
    ///
    /// Returns:
    /// - `Ok(Some(event))` for a content delta or the terminal signal
    /// - `Ok(None)` if more data is needed (or the stream already ended)
    /// - `Err(RelayError::MalformedStreamFrame)` if a payload is not valid JSON
    /// - `Err(RelayError::ProviderStreamError)` if the provider sent an error object
    pub fn next_event(&mut self) -> Result<Option<StreamEvent>, RelayError> {
        while !self.finished {
            let Some((start, end)) = self.next_line()? else {
                return Ok(None);
            };

            let line = std::str::from_utf8(&self.buffer[start..end]).map_err(|e| {
                RelayError::malformed(
                    &String::from_utf8_lossy(&self.buffer[start..end]),
                    e.to_string(),
                )
            })?;

            match decode_frame(line)? {
                Frame::Skip => {}
                Frame::Delta(text) => return Ok(Some(StreamEvent::ContentDelta(text))),
                Frame::Done => {
                    self.finished = true;
                    self.clear();
                    return Ok(Some(StreamEvent::End));
                }
            }
        }
        Ok(None)
    }

    /// Push one chunk and decode every complete frame it made available
    ///
    /// Frames are processed in arrival order before returning.
    pub fn decode_chunk(&mut self, data: &[u8]) -> Result<Vec<StreamEvent>, RelayError> {
        self.push(data);
        let mut events = Vec::new();
        while let Some(event) = self.next_event()? {
            events.push(event);
        }
        Ok(events)
    }

    /// Locate the next complete line and advance past it
    ///
    /// Returns the byte range of the line, excluding the newline.
    fn next_line(&mut self) -> Result<Option<(usize, usize)>, RelayError> {
        let pending = &self.buffer[self.read_pos..];

        if let Some(offset) = pending.iter().position(|&b| b == b'\n') {
            let start = self.read_pos;
            let end = start + offset;
            self.read_pos = end + 1;
            return Ok(Some((start, end)));
        }

        if pending.len() > MAX_FRAME_SIZE {
            return Err(RelayError::malformed(
                &String::from_utf8_lossy(&pending[..64]),
                format!("frame exceeds maximum size of {MAX_FRAME_SIZE} bytes"),
            ));
        }

        if self.eof && !pending.is_empty() {
            let start = self.read_pos;
            let end = self.buffer.len();
            self.read_pos = end;
            return Ok(Some((start, end)));
        }

        Ok(None)
    }

    /// Clear the buffer
    fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn delta_frame(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    fn delta(text: &str) -> StreamEvent {
        StreamEvent::ContentDelta(text.to_string())
    }

    #[test]
    fn test_decode_single_delta() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.decode_chunk(delta_frame("Hello").as_bytes()).unwrap();
        assert_eq!(events, vec![delta("Hello")]);
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let chunk = format!(
            "{}{}data: [DONE]\n\n",
            delta_frame("Hello "),
            delta_frame("world.")
        );

        let mut decoder = StreamDecoder::new();
        let events = decoder.decode_chunk(chunk.as_bytes()).unwrap();

        assert_eq!(
            events,
            vec![delta("Hello "), delta("world."), StreamEvent::End]
        );
        assert!(decoder.is_finished());
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let frame = delta_frame("split");
        let (first, second) = frame.as_bytes().split_at(17);

        let mut decoder = StreamDecoder::new();
        assert!(decoder.decode_chunk(first).unwrap().is_empty());
        assert_eq!(decoder.decode_chunk(second).unwrap(), vec![delta("split")]);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let frame = delta_frame("café");
        let bytes = frame.as_bytes();
        // Split inside the two-byte 'é'
        let split = frame.find('é').unwrap() + 1;

        let mut decoder = StreamDecoder::new();
        assert!(decoder.decode_chunk(&bytes[..split]).unwrap().is_empty());
        assert_eq!(
            decoder.decode_chunk(&bytes[split..]).unwrap(),
            vec![delta("café")]
        );
    }

    #[test]
    fn test_blank_and_comment_lines_are_skipped() {
        let chunk = format!("\n   \n: keep-alive\nevent: message\n{}", delta_frame("x"));
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.decode_chunk(chunk.as_bytes()).unwrap(), vec![delta("x")]);
    }

    #[test]
    fn test_role_only_and_empty_deltas_yield_nothing() {
        let chunk = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{}, \"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":null}}]}\n\n",
        );
        let mut decoder = StreamDecoder::new();
        assert!(decoder.decode_chunk(chunk.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_prefix_without_space() {
        let mut decoder = StreamDecoder::new();
        let events = decoder
            .decode_chunk(b"data:{\"choices\":[{\"delta\":{\"content\":\"tight\"}}]}\n")
            .unwrap();
        assert_eq!(events, vec![delta("tight")]);
    }

    #[test]
    fn test_bare_payload_without_prefix() {
        let mut decoder = StreamDecoder::new();
        let events = decoder
            .decode_chunk(b"{\"choices\":[{\"delta\":{\"content\":\"bare\"}}]}\n[DONE]\n")
            .unwrap();
        assert_eq!(events, vec![delta("bare"), StreamEvent::End]);
    }

    #[test]
    fn test_input_after_done_is_ignored() {
        let chunk = format!("data: [DONE]\n\n{}data: not json\n", delta_frame("late"));
        let mut decoder = StreamDecoder::new();
        assert_eq!(
            decoder.decode_chunk(chunk.as_bytes()).unwrap(),
            vec![StreamEvent::End]
        );
        assert!(decoder.decode_chunk(delta_frame("later").as_bytes()).unwrap().is_empty());
        assert_eq!(decoder.available(), 0);
    }

    #[test]
    fn test_malformed_payload() {
        let mut decoder = StreamDecoder::new();
        let result = decoder.decode_chunk(b"data: {not json}\n\n");
        assert!(matches!(
            result,
            Err(RelayError::MalformedStreamFrame { ref frame, .. }) if frame == "{not json}"
        ));
    }

    #[test]
    fn test_wrongly_typed_payload_is_malformed() {
        let mut decoder = StreamDecoder::new();
        let result = decoder.decode_chunk(b"data: {\"choices\": \"nope\"}\n");
        assert!(matches!(result, Err(RelayError::MalformedStreamFrame { .. })));
    }

    #[test]
    fn test_frames_before_malformed_one_are_still_returned_by_next_event() {
        let chunk = format!("{}data: oops\n", delta_frame("first"));
        let mut decoder = StreamDecoder::new();
        decoder.push(chunk.as_bytes());

        assert_eq!(decoder.next_event().unwrap(), Some(delta("first")));
        assert!(decoder.next_event().is_err());
    }

    #[test]
    fn test_provider_error_object() {
        let mut decoder = StreamDecoder::new();
        let result = decoder.decode_chunk(
            b"data: {\"error\":{\"message\":\"Rate limit reached\",\"type\":\"requests\"}}\n",
        );
        assert_eq!(
            result,
            Err(RelayError::ProviderStreamError("Rate limit reached".into()))
        );
    }

    #[test]
    fn test_trailing_frame_decoded_on_finish() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.decode_chunk(b"data: [DONE]").unwrap().is_empty());

        decoder.finish();
        assert_eq!(decoder.next_event().unwrap(), Some(StreamEvent::End));
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut decoder = StreamDecoder::new();
        let events = decoder
            .decode_chunk(b"data: {\"choices\":[{\"delta\":{\"content\":\"win\"}}]}\r\n\r\ndata: [DONE]\r\n")
            .unwrap();
        assert_eq!(events, vec![delta("win"), StreamEvent::End]);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut decoder = StreamDecoder::new();
        decoder.push(&vec![b'a'; MAX_FRAME_SIZE + 1]);
        assert!(matches!(
            decoder.next_event(),
            Err(RelayError::MalformedStreamFrame { .. })
        ));
    }

    #[test]
    fn test_buffer_compaction_keeps_partial_frame() {
        let mut decoder = StreamDecoder::new();
        let filler = delta_frame(&"y".repeat(100));
        for _ in 0..100 {
            decoder.decode_chunk(filler.as_bytes()).unwrap();
        }

        let frame = delta_frame("tail");
        let (first, second) = frame.as_bytes().split_at(10);
        decoder.decode_chunk(first).unwrap();
        assert_eq!(decoder.decode_chunk(second).unwrap(), vec![delta("tail")]);
    }
}
