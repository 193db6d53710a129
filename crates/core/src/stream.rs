//! Out-of-band progress streaming: events and the transport seam.
//!
//! Events published for one stream id are delivered in publish order.
//! Nothing in the synchronous response path depends on delivery.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// How long a created stream stays connectable.
pub const STREAM_EXPIRY_MINUTES: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEventKind {
    /// Human-readable status update ("Thinking about what you said")
    Progress,
    /// A slice of the answer text as it is generated
    Interim,
    Error,
    Info,
}

/// One event on a progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub kind: StreamEventKind,
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl StreamEvent {
    pub fn new(kind: StreamEventKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            assistant_id: None,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn progress(payload: impl Into<String>) -> Self {
        Self::new(StreamEventKind::Progress, payload)
    }

    pub fn interim(delta: impl Into<String>) -> Self {
        Self::new(StreamEventKind::Interim, delta)
    }

    pub fn for_assistant(mut self, assistant_id: Option<&str>) -> Self {
        self.assistant_id = assistant_id.map(str::to_string);
        self
    }

    /// The JSON body delivered to stream subscribers.
    ///
    /// Interim events carry their text under `delta`; everything else under `message`.
    pub fn to_wire(&self) -> serde_json::Value {
        let text_key = match self.kind {
            StreamEventKind::Interim => "delta",
            _ => "message",
        };
        let mut body = serde_json::Map::new();
        body.insert(text_key.into(), self.payload.clone().into());
        body.insert("timestamp".into(), self.timestamp.into());
        body.insert("type".into(), serde_json::to_value(self.kind).unwrap_or_default());
        if let Some(id) = &self.assistant_id {
            body.insert("assistant-id".into(), id.clone().into());
        }
        serde_json::Value::Object(body)
    }
}

/// A newly created stream a client can connect to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamHandle {
    #[serde(rename = "stream-id")]
    pub stream_id: String,
    #[serde(rename = "stream-url")]
    pub stream_url: String,
    #[serde(rename = "expires-at")]
    pub expires_at: DateTime<Utc>,
}

impl StreamHandle {
    pub fn expiry_from(now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::minutes(STREAM_EXPIRY_MINUTES)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The pub/sub channel behind a stream.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Create a channel and a client URL valid for [`STREAM_EXPIRY_MINUTES`].
    async fn create_channel(&self) -> Result<StreamHandle, StreamError>;

    async fn send(&self, stream_id: &str, event: &StreamEvent) -> Result<(), StreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interim_wire_uses_delta() {
        let wire = StreamEvent::interim("Hel").to_wire();
        assert_eq!(wire["delta"], "Hel");
        assert_eq!(wire["type"], "interim");
        assert!(wire.get("message").is_none());
    }

    #[test]
    fn progress_wire_carries_assistant() {
        let wire = StreamEvent::progress("Thinking about what you said")
            .for_assistant(Some("sales"))
            .to_wire();
        assert_eq!(wire["message"], "Thinking about what you said");
        assert_eq!(wire["type"], "progress");
        assert_eq!(wire["assistant-id"], "sales");
        assert!(wire["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn handle_expires_after_ninety_minutes() {
        let now = Utc::now();
        let handle = StreamHandle {
            stream_id: "s".into(),
            stream_url: "local://s".into(),
            expires_at: StreamHandle::expiry_from(now),
        };
        assert_eq!((handle.expires_at - now).num_minutes(), 90);
        assert!(!handle.is_expired_at(now + Duration::minutes(89)));
        assert!(handle.is_expired_at(now + Duration::minutes(90)));
    }
}
