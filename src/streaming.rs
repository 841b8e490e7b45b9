use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Server-sent events from the Anthropic Messages streaming endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart(MessageStartEvent),
    ContentBlockStart(ContentBlockStartEvent),
    ContentBlockDelta(ContentBlockDeltaEvent),
    ContentBlockStop(ContentBlockStopEvent),
    MessageDelta(MessageDeltaEvent),
    MessageStop,
    Ping,
    Error(ErrorEvent),
    /// Unknown event type
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageStartEvent {
    pub message: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockStartEvent {
    pub index: Option<usize>,
    #[serde(flatten)]
    pub extra: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockDeltaEvent {
    pub index: Option<usize>,
    pub delta: Option<Delta>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum Delta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockStopEvent {
    pub index: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeltaEvent {
    pub delta: Option<Value>,
    pub usage: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEvent {
    pub error: ApiError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

impl StreamEvent {
    /// Generated text carried by this event, if any
    pub fn text(&self) -> Option<&str> {
        match self {
            StreamEvent::ContentBlockDelta(ContentBlockDeltaEvent {
                delta: Some(Delta::TextDelta { text }),
                ..
            }) => Some(text),
            _ => None,
        }
    }
}

/// Parse the payload of a single `data:` line
pub fn parse_event(data: &str) -> serde_json::Result<StreamEvent> {
    serde_json::from_str(data)
}

/// Splits a raw byte stream into SSE events.
///
/// Chunks may end anywhere, including inside a multi-byte character, so bytes
/// are buffered until a full line is available.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = Self::parse_line(line.trim_end()) {
                events.push(event);
            }
        }
        events
    }

    /// Anything left once the byte stream has ended
    pub fn finish(&mut self) -> Option<StreamEvent> {
        let rest = std::mem::take(&mut self.buf);
        let line = String::from_utf8_lossy(&rest);
        Self::parse_line(line.trim_end())
    }

    fn parse_line(line: &str) -> Option<StreamEvent> {
        // `event:` lines duplicate the `type` field of the data payload
        let data = line.strip_prefix("data:")?.trim_start();
        if data.is_empty() || data == "[DONE]" {
            return None;
        }

        match parse_event(data) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!(error = %e, line = data, "failed to parse stream event");
                None
            }
        }
    }
}
