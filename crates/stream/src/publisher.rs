//! Stream publisher and per-turn sinks.
//!
//! A sink never blocks the turn: events go onto an unbounded channel that a
//! single background task drains into the transport, so delivery order per
//! stream id is publish order. Transport failures are logged and dropped.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use chatrelay_core::{StreamError, StreamEvent, StreamHandle, StreamTransport};

pub struct StreamPublisher {
    transport: Arc<dyn StreamTransport>,
}

impl StreamPublisher {
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        Self { transport }
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Create a stream a client can connect to for the next 90 minutes.
    pub async fn create_stream(&self) -> Result<StreamHandle, StreamError> {
        let handle = self.transport.create_channel().await?;
        info!(
            stream_id = %handle.stream_id,
            transport = self.transport.name(),
            expires_at = %handle.expires_at,
            "Stream created"
        );
        Ok(handle)
    }

    /// A sink for `stream_id`; `None` gives a sink that drops everything.
    pub fn sink(&self, stream_id: Option<&str>) -> StreamSink {
        let Some(stream_id) = stream_id.filter(|s| !s.is_empty()) else {
            return StreamSink::disabled();
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<StreamEvent>();
        let transport = self.transport.clone();
        let id = stream_id.to_string();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = transport.send(&id, &event).await {
                    warn!(stream_id = %id, error = %e, kind = ?event.kind, "Stream event dropped");
                }
            }
            debug!(stream_id = %id, "Stream sink drained");
        });

        StreamSink {
            inner: Some(Arc::new(SinkInner {
                stream_id: stream_id.to_string(),
                tx,
            })),
        }
    }
}

struct SinkInner {
    stream_id: String,
    tx: mpsc::UnboundedSender<StreamEvent>,
}

/// Where a turn publishes its progress. Cheap to clone; clones share one
/// ordered channel.
#[derive(Clone, Default)]
pub struct StreamSink {
    inner: Option<Arc<SinkInner>>,
}

impl StreamSink {
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.inner.as_ref().map(|i| i.stream_id.as_str())
    }

    pub fn publish(&self, event: StreamEvent) {
        if let Some(inner) = &self.inner {
            // Only fails once the drain task is gone, i.e. the runtime is shutting down.
            let _ = inner.tx.send(event);
        }
    }

    pub fn progress(&self, message: impl Into<String>, assistant_id: Option<&str>) {
        if self.is_enabled() {
            self.publish(StreamEvent::progress(message).for_assistant(assistant_id));
        }
    }

    pub fn interim(&self, delta: impl Into<String>, assistant_id: Option<&str>) {
        if self.is_enabled() {
            self.publish(StreamEvent::interim(delta).for_assistant(assistant_id));
        }
    }

    pub fn error(&self, message: impl Into<String>) {
        if self.is_enabled() {
            self.publish(StreamEvent::new(chatrelay_core::StreamEventKind::Error, message));
        }
    }
}
