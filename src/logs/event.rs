//! Outbound SSE payloads.

use axum::response::sse::Event;
use serde::Serialize;

use super::demux::Origin;

pub const HEARTBEAT_COMMENT: &str = "keep-alive";

/// JSON body of one `data:` frame. Exactly one of the three shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LogEvent {
    Log {
        container: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stream: Option<Origin>,
        message: String,
    },
    Info {
        info: String,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        container: Option<String>,
        error: String,
    },
}

impl LogEvent {
    /// Builds a log event from a raw chunk, keeping at most the last `max_bytes` bytes.
    pub fn log(container: &str, origin: Origin, chunk: &[u8], max_bytes: usize) -> Self {
        let chunk = truncate_tail(chunk, max_bytes);
        LogEvent::Log {
            container: container.to_string(),
            stream: Some(origin),
            message: String::from_utf8_lossy(chunk).into_owned(),
        }
    }

    pub fn info(info: impl Into<String>) -> Self {
        LogEvent::Info { info: info.into() }
    }

    pub fn error(container: Option<&str>, error: impl std::fmt::Display) -> Self {
        LogEvent::Error {
            container: container.map(str::to_string),
            error: error.to_string(),
        }
    }
}

/// Keeps the newest `max_bytes` bytes of an oversized chunk.
pub fn truncate_tail(chunk: &[u8], max_bytes: usize) -> &[u8] {
    if chunk.len() > max_bytes {
        &chunk[chunk.len() - max_bytes..]
    } else {
        chunk
    }
}

/// Everything a session writes to the response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Event(LogEvent),
    Heartbeat,
}

impl StreamFrame {
    pub fn into_sse(self) -> Event {
        match self {
            StreamFrame::Event(event) => match serde_json::to_string(&event) {
                Ok(json) => Event::default().data(json),
                Err(e) => {
                    log::error!("Failed to serialize log event: {}", e);
                    Event::default().comment("unserializable event")
                }
            },
            StreamFrame::Heartbeat => Event::default().comment(HEARTBEAT_COMMENT),
        }
    }
}
