//! Single-retry wrapper for model backends.
//!
//! A transient failure (5xx, rate limit, timeout, dropped connection) gets
//! exactly one more attempt after a short backoff. Anything else, and any
//! failure of the second attempt, is returned to the caller unchanged.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use chatrelay_core::provider::*;
use chatrelay_core::BackendError;

/// Wraps a backend and retries retryable failures once.
pub struct RetryingBackend {
    inner: Arc<dyn ModelBackend>,
    backoff: Duration,
}

impl RetryingBackend {
    pub fn new(inner: Arc<dyn ModelBackend>, backoff: Duration) -> Self {
        Self { inner, backoff }
    }

    /// Rate limits ask for their own wait; honour it when it is longer
    /// than the configured backoff, but never past the request timeout.
    fn delay_for(&self, err: &BackendError, timeout_secs: u64) -> Duration {
        match err {
            BackendError::RateLimited { retry_after_secs } => {
                let asked = Duration::from_secs(*retry_after_secs).min(Duration::from_secs(timeout_secs));
                asked.max(self.backoff)
            }
            _ => self.backoff,
        }
    }
}

#[async_trait]
impl ModelBackend for RetryingBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        match self.inner.complete(request.clone()).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_retryable() => {
                let delay = self.delay_for(&e, request.timeout_secs);
                warn!(backend = %self.inner.name(), error = %e, delay_ms = delay.as_millis() as u64, "Backend failed, retrying once");
                tokio::time::sleep(delay).await;
                let result = self.inner.complete(request).await;
                if result.is_ok() {
                    info!(backend = %self.inner.name(), "Backend retry succeeded");
                }
                result
            }
            Err(e) => Err(e),
        }
    }

    /// Only opening the stream is retried; once deltas have been delivered a
    /// failure surfaces through the receiver.
    async fn stream(&self, request: BackendRequest) -> Result<ChunkReceiver, BackendError> {
        match self.inner.stream(request.clone()).await {
            Ok(rx) => Ok(rx),
            Err(e) if e.is_retryable() => {
                let delay = self.delay_for(&e, request.timeout_secs);
                warn!(backend = %self.inner.name(), error = %e, delay_ms = delay.as_millis() as u64, "Stream open failed, retrying once");
                tokio::time::sleep(delay).await;
                self.inner.stream(request).await
            }
            Err(e) => Err(e),
        }
    }

    async fn health_check(&self) -> Result<bool, BackendError> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::Message;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Plays back a scripted list of outcomes and counts calls.
    struct ScriptedBackend {
        outcomes: Mutex<VecDeque<Result<String, BackendError>>>,
        call_count: Mutex<usize>,
    }

    impl ScriptedBackend {
        fn new(outcomes: Vec<Result<String, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                call_count: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
            *self.call_count.lock().unwrap() += 1;
            let next = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::Network("script exhausted".into())));
            next.map(|text| BackendResponse {
                message: Message::assistant(text),
                citations: vec![],
                intent: None,
                usage: None,
                model: request.model,
            })
        }
    }

    fn request() -> BackendRequest {
        BackendRequest {
            model: "gpt-4".into(),
            messages: vec![Message::user("hello")],
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: None,
            tools: vec![],
            tool_choice: ToolChoice::Auto,
            data_sources: None,
            assistant: None,
            timeout_secs: 90,
        }
    }

    #[tokio::test]
    async fn success_is_not_retried() {
        let inner = ScriptedBackend::new(vec![Ok("hi".into())]);
        let backend = RetryingBackend::new(inner.clone(), Duration::from_millis(1));
        assert_eq!(backend.complete(request()).await.unwrap().message.content, "hi");
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn server_error_retried_once() {
        let inner = ScriptedBackend::new(vec![
            Err(BackendError::ApiError {
                status_code: 503,
                message: "busy".into(),
            }),
            Ok("second time".into()),
        ]);
        let backend = RetryingBackend::new(inner.clone(), Duration::from_millis(1));
        assert_eq!(backend.complete(request()).await.unwrap().message.content, "second time");
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn second_failure_is_returned() {
        let inner = ScriptedBackend::new(vec![
            Err(BackendError::Network("reset".into())),
            Err(BackendError::Timeout("slow".into())),
            Ok("never reached".into()),
        ]);
        let backend = RetryingBackend::new(inner.clone(), Duration::from_millis(1));
        match backend.complete(request()).await.unwrap_err() {
            BackendError::Timeout(_) => {}
            other => panic!("Expected Timeout, got: {other:?}"),
        }
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn auth_failure_not_retried() {
        let inner = ScriptedBackend::new(vec![Err(BackendError::AuthenticationFailed("bad key".into()))]);
        let backend = RetryingBackend::new(inner.clone(), Duration::from_millis(1));
        assert!(backend.complete(request()).await.is_err());
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_for_retry_after() {
        let inner = ScriptedBackend::new(vec![
            Err(BackendError::RateLimited { retry_after_secs: 5 }),
            Ok("ok".into()),
        ]);
        let backend = RetryingBackend::new(inner.clone(), Duration::from_millis(10));
        let started = tokio::time::Instant::now();
        backend.complete(request()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn stream_open_uses_default_wrapper() {
        let inner = ScriptedBackend::new(vec![Err(BackendError::Network("reset".into())), Ok("streamed".into())]);
        let backend = RetryingBackend::new(inner.clone(), Duration::from_millis(1));
        let mut rx = backend.stream(request()).await.unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("streamed"));
        assert_eq!(inner.calls(), 2);
    }
}
