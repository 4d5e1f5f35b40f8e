//! Server-sent events from Realtime Database streaming reads
//!
//! A streaming GET (`Accept: text/event-stream`) yields `put` and `patch`
//! events carrying `{"path": ..., "data": ...}`, plus `keep-alive`,
//! `cancel` and `auth_revoked` control events. [`SseParser`] splits the raw
//! byte stream into events and [`ServerEvent`] gives them meaning.

use crate::error::{StoreError, StoreErrorCode};
use crate::store::write_at;
use serde::Deserialize;
use serde_json::Value;

/// One raw event: its name and joined data lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name, `message` when the server sent none
    pub event: String,
    /// Data lines joined with `\n`
    pub data: String,
}

/// Incremental `text/event-stream` parser
///
/// Chunks may split lines and even UTF-8 sequences; incomplete input is kept
/// until the next [`push`](Self::push).
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Create an empty parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every event it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

#[derive(Deserialize)]
struct Payload {
    path: String,
    #[serde(default)]
    data: Value,
}

/// Meaning of a streaming event
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Replace the value at `path` (relative to the streamed location)
    Put {
        /// Relative path
        path: String,
        /// New value, null deletes
        data: Value,
    },
    /// Merge children into the value at `path`
    Patch {
        /// Relative path
        path: String,
        /// Children to merge
        data: Value,
    },
    /// Connection heartbeat
    KeepAlive,
    /// Security rules no longer allow reading the location
    Cancel(String),
    /// The auth token expired or was revoked
    AuthRevoked,
}

impl ServerEvent {
    /// Interpret a raw event
    pub fn parse(event: &SseEvent) -> Result<Self, StoreError> {
        match event.event.as_str() {
            "put" | "patch" => {
                let payload: Payload = serde_json::from_str(&event.data).map_err(|e| {
                    StoreError::new(StoreErrorCode::Unknown(0), format!("Malformed {} event: {}", event.event, e))
                })?;
                if event.event == "put" {
                    Ok(Self::Put {
                        path: payload.path,
                        data: payload.data,
                    })
                } else {
                    Ok(Self::Patch {
                        path: payload.path,
                        data: payload.data,
                    })
                }
            }
            "cancel" => Ok(Self::Cancel(event.data.trim_matches('"').to_string())),
            "auth_revoked" => Ok(Self::AuthRevoked),
            _ => Ok(Self::KeepAlive),
        }
    }

    /// Fold a data event into the cached value; returns false for control events
    pub fn apply_to(&self, cache: &mut Value) -> bool {
        match self {
            Self::Put { path, data } => {
                write_at(cache, path, data.clone());
                true
            }
            Self::Patch { path, data } => {
                if let Value::Object(children) = data {
                    for (child, value) in children {
                        write_at(cache, &format!("{}/{}", path, child), value.clone());
                    }
                }
                true
            }
            Self::KeepAlive | Self::Cancel(_) | Self::AuthRevoked => false,
        }
    }

    /// Store error for events that end the stream
    pub fn terminal_error(&self) -> Option<StoreError> {
        match self {
            Self::Cancel(reason) => {
                let message = if reason.is_empty() || reason == "null" {
                    "Permission denied".to_string()
                } else {
                    reason.clone()
                };
                Some(StoreError::new(StoreErrorCode::PermissionDenied, message))
            }
            Self::AuthRevoked => Some(StoreError::new(StoreErrorCode::ExpiredToken, "Auth token revoked")),
            _ => None,
        }
    }
}
