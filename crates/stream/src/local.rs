//! In-process stream transport.
//!
//! Each stream is a broadcast channel; the gateway exposes it to clients as
//! server-sent events. Events sent while nobody is subscribed are dropped,
//! matching pub/sub group semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use chatrelay_core::{StreamError, StreamEvent, StreamHandle, StreamTransport};

const CHANNEL_CAPACITY: usize = 256;

struct LocalChannel {
    tx: broadcast::Sender<Value>,
    expires_at: DateTime<Utc>,
}

pub struct LocalTransport {
    base_url: String,
    channels: RwLock<HashMap<String, LocalChannel>>,
}

impl LocalTransport {
    /// `base_url` is the prefix clients append the stream id to, e.g.
    /// `http://localhost:7071/api/streams`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            channels: RwLock::new(HashMap::new()),
        }
    }

    fn url_for(&self, stream_id: &str) -> String {
        format!("{}/{stream_id}", self.base_url.trim_end_matches('/'))
    }

    fn create_at(&self, now: DateTime<Utc>) -> Result<StreamHandle, StreamError> {
        let stream_id = Uuid::new_v4().simple().to_string();
        let expires_at = StreamHandle::expiry_from(now);
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);

        let mut channels = self
            .channels
            .write()
            .map_err(|_| StreamError::Unavailable("local channel table poisoned".into()))?;
        let before = channels.len();
        channels.retain(|_, c| c.expires_at > now);
        if channels.len() < before {
            debug!(pruned = before - channels.len(), "Expired local streams removed");
        }
        channels.insert(stream_id.clone(), LocalChannel { tx, expires_at });

        Ok(StreamHandle {
            stream_url: self.url_for(&stream_id),
            stream_id,
            expires_at,
        })
    }

    fn sender(&self, stream_id: &str, now: DateTime<Utc>) -> Result<broadcast::Sender<Value>, StreamError> {
        let channels = self
            .channels
            .read()
            .map_err(|_| StreamError::Unavailable("local channel table poisoned".into()))?;
        match channels.get(stream_id) {
            Some(c) if c.expires_at <= now => Err(StreamError::Expired(stream_id.to_string())),
            Some(c) => Ok(c.tx.clone()),
            None => Err(StreamError::Unavailable(format!("unknown stream {stream_id}"))),
        }
    }

    /// Attach a subscriber to a live stream.
    pub fn subscribe(&self, stream_id: &str) -> Result<broadcast::Receiver<Value>, StreamError> {
        self.sender(stream_id, Utc::now()).map(|tx| tx.subscribe())
    }

    #[cfg(test)]
    fn send_at(&self, stream_id: &str, event: &StreamEvent, now: DateTime<Utc>) -> Result<(), StreamError> {
        let tx = self.sender(stream_id, now)?;
        let _ = tx.send(event.to_wire());
        Ok(())
    }
}

#[async_trait]
impl StreamTransport for LocalTransport {
    fn name(&self) -> &str {
        "local"
    }

    async fn create_channel(&self) -> Result<StreamHandle, StreamError> {
        self.create_at(Utc::now())
    }

    async fn send(&self, stream_id: &str, event: &StreamEvent) -> Result<(), StreamError> {
        let tx = self.sender(stream_id, Utc::now())?;
        // No subscribers is not an error
        let _ = tx.send(event.to_wire());
        Ok(())
    }
}
