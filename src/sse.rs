//! Incremental decoding of the chat event stream.
//!
//! The backend replies to `POST /conversations/{id}/chat` with
//! `data: <json>` lines, one logical record per line, terminated by the
//! `data: [DONE]` sentinel. Chunk boundaries are arbitrary: a chunk may end
//! in the middle of a line or in the middle of a multi-byte character, so
//! lines are framed on raw bytes first and only complete lines are decoded
//! to text.

use bytes::BytesMut;
use tracing::debug;

use crate::protocol::StreamEvent;

/// Reassembles arriving byte chunks into complete lines.
///
/// Keeps the undecoded tail between calls. A partial line left in the buffer
/// when the stream ends is not a valid event and is simply dropped with the
/// decoder.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: BytesMut,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every line completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(idx) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(idx + 1);
            let mut line = &line[..idx];
            if line.ends_with(b"\r") {
                line = &line[..line.len() - 1];
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
        }
        lines
    }
}

/// Classifies one line of the stream.
///
/// Non-`data:` lines (blanks, comments, other SSE fields) produce nothing.
/// The recognized payload fields are not mutually exclusive; a single record
/// can yield a content delta, a title update and an error at once, in that
/// order. Payloads that do not parse as a JSON object are discarded rather
/// than surfaced; the server occasionally emits partial frames and the
/// stream as a whole is still usable.
pub fn parse_event_line(line: &str) -> Vec<StreamEvent> {
    let Some(data) = line.strip_prefix("data: ") else {
        return Vec::new();
    };

    if data == "[DONE]" {
        return vec![StreamEvent::Done];
    }

    let Ok(frame) = serde_json::from_str::<EventFrame>(data) else {
        debug!(payload = data, "discarding unparseable stream frame");
        return Vec::new();
    };

    let mut events = Vec::new();
    if let Some(content) = frame.content {
        if !content.is_empty() {
            events.push(StreamEvent::ContentDelta(content));
        }
    }
    if is_truthy(&frame.title_update) {
        events.push(StreamEvent::TitleUpdate);
    }
    if let Some(error) = frame.error {
        if !error.is_empty() {
            events.push(StreamEvent::ErrorMessage(error));
        }
    }
    events
}

#[derive(serde::Deserialize)]
struct EventFrame {
    #[serde(default)]
    content: Option<String>,
    /// The server sends the new title here, but only as a change signal;
    /// the client re-fetches the conversation list instead of trusting it.
    #[serde(default)]
    title_update: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => true,
    }
}
