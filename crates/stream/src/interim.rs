//! Throttled interim-text publishing.

use tokio::time::{Duration, Instant};

use crate::publisher::StreamSink;

/// Default minimum gap between interim flushes.
pub const INTERIM_INTERVAL: Duration = Duration::from_millis(400);

/// Batches answer deltas so subscribers get at most one interim event per
/// interval. Nothing is lost: [`InterimBuffer::flush`] sends whatever is
/// pending, and the concatenation of everything flushed equals everything
/// pushed.
pub struct InterimBuffer {
    sink: StreamSink,
    assistant_id: Option<String>,
    interval: Duration,
    pending: String,
    last_flush: Option<Instant>,
}

impl InterimBuffer {
    pub fn new(sink: StreamSink, assistant_id: Option<&str>, interval: Duration) -> Self {
        Self {
            sink,
            assistant_id: assistant_id.map(str::to_string),
            interval,
            pending: String::new(),
            last_flush: None,
        }
    }

    pub fn push(&mut self, delta: &str) {
        if !self.sink.is_enabled() || delta.is_empty() {
            return;
        }
        self.pending.push_str(delta);
        if self.last_flush.is_none_or(|at| at.elapsed() >= self.interval) {
            self.flush();
        }
    }

    pub fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.pending);
        self.sink.interim(text, self.assistant_id.as_deref());
        self.last_flush = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalTransport;
    use crate::publisher::StreamPublisher;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn deltas_are_batched_then_flushed() {
        let transport = Arc::new(LocalTransport::new("local://"));
        let publisher = StreamPublisher::new(transport.clone());
        let handle = publisher.create_stream().await.unwrap();
        let mut rx = transport.subscribe(&handle.stream_id).unwrap();

        let mut buffer = InterimBuffer::new(publisher.sink(Some(&handle.stream_id)), Some("sales"), INTERIM_INTERVAL);
        buffer.push("The ");     // first delta goes out immediately
        buffer.push("answer ");  // within the interval: held
        buffer.push("is ");
        tokio::time::advance(Duration::from_millis(500)).await;
        buffer.push("42");       // interval elapsed: flushes "answer is 42"
        buffer.push(".");
        buffer.flush();

        let mut events = Vec::new();
        for _ in 0..3 {
            events.push(rx.recv().await.unwrap());
        }
        let deltas: Vec<&str> = events.iter().map(|e| e["delta"].as_str().unwrap()).collect();
        assert_eq!(deltas, vec!["The ", "answer is 42", "."]);
        assert!(events.iter().all(|e| e["assistant-id"] == "sales"));
    }

    #[test]
    fn disabled_sink_holds_nothing() {
        let mut buffer = InterimBuffer::new(StreamSink::disabled(), None, INTERIM_INTERVAL);
        buffer.push("text");
        assert!(buffer.pending.is_empty());
    }
}
