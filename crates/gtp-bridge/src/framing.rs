//! GTP response framing
//!
//! A GTP reply is one or more physical lines terminated by a blank line.
//! Replies begin with `=` (success) or `?` (failure); anything else is a
//! protocol violation. Engines may also be driven in a JSON transport mode
//! where stdout is a single JSON document carrying every response at once.

use serde_json::Value;

/// One classified logical reply from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text after the `=` marker, trimmed, internal terminator removed.
    Success(String),
    /// Text after the `?` marker.
    Failure(String),
    /// The raw frame, when the leading byte was neither `=` nor `?`.
    Violation(String),
}

impl Frame {
    fn classify(raw: &str) -> Frame {
        let trimmed = raw.trim();
        match trimmed.chars().next() {
            Some('=') => Frame::Success(trimmed[1..].trim().to_string()),
            Some('?') => Frame::Failure(trimmed[1..].trim().to_string()),
            _ => Frame::Violation(trimmed.to_string()),
        }
    }
}

/// Accumulates stdout bytes and yields complete frames.
///
/// In JSON mode the whole buffer is re-parsed on every arrival until it
/// forms a valid document; the document is either an array of response
/// strings or an object with a `gtp_responses` array, each entry classified
/// like a plain frame.
pub struct FrameBuffer {
    buf: String,
    json: bool,
}

impl FrameBuffer {
    pub fn new(json: bool) -> Self {
        FrameBuffer {
            buf: String::new(),
            json,
        }
    }

    /// Feed a chunk of stdout. Returns every frame completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<Frame> {
        self.buf.push_str(chunk);
        if self.json {
            return self.drain_json();
        }

        // Normalize over the whole buffer so a CRLF split across reads
        // still terminates a frame.
        let normalized = self.buf.replace("\r\n", "\n");

        // A reply set is complete once the buffer ends on a blank line.
        if !normalized.ends_with("\n\n") {
            return Vec::new();
        }
        self.buf.clear();
        normalized
            .split("\n\n")
            .filter(|frame| !frame.trim().is_empty())
            .map(Frame::classify)
            .collect()
    }

    fn drain_json(&mut self) -> Vec<Frame> {
        let value: Value = match serde_json::from_str(&self.buf) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };
        self.buf.clear();

        let responses = match &value {
            Value::Array(items) => items.clone(),
            Value::Object(map) => map
                .get("gtp_responses")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        responses
            .iter()
            .filter_map(Value::as_str)
            .map(Frame::classify)
            .collect()
    }
}
