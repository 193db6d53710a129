//! Backend router: builds and caches a backend per distinct connection.
//!
//! Named configs may point at different endpoints or keys, so the
//! orchestrator asks for a backend per set of effective turn settings.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chatrelay_config::TurnSettings;
use chatrelay_core::{BackendError, ModelBackend};
use tracing::debug;

use crate::azure_openai::AzureOpenAiBackend;
use crate::retry::RetryingBackend;

/// Produces the backend that serves a given set of turn settings.
pub trait BackendFactory: Send + Sync {
    fn backend(&self, settings: &TurnSettings) -> Result<Arc<dyn ModelBackend>, BackendError>;
}

/// Always hands out the same backend. Used for tests and single-endpoint setups.
pub struct FixedBackend(pub Arc<dyn ModelBackend>);

impl BackendFactory for FixedBackend {
    fn backend(&self, _settings: &TurnSettings) -> Result<Arc<dyn ModelBackend>, BackendError> {
        Ok(self.0.clone())
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct ConnectionKey {
    endpoint: String,
    version: String,
    data_source_version: String,
    key: String,
}

/// Routes settings to Azure OpenAI backends, one per connection, each
/// wrapped in a single-retry layer.
pub struct BackendRouter {
    client: reqwest::Client,
    retry_backoff: Duration,
    backends: RwLock<HashMap<ConnectionKey, Arc<dyn ModelBackend>>>,
}

impl BackendRouter {
    pub fn new(retry_backoff: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| BackendError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            retry_backoff,
            backends: RwLock::new(HashMap::new()),
        })
    }

    /// Number of distinct connections built so far.
    pub fn len(&self) -> usize {
        self.backends.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BackendFactory for BackendRouter {
    fn backend(&self, settings: &TurnSettings) -> Result<Arc<dyn ModelBackend>, BackendError> {
        let key = ConnectionKey {
            endpoint: settings.endpoint.clone(),
            version: settings.version.clone(),
            data_source_version: settings.data_source_api_version.clone(),
            key: settings.key.clone().unwrap_or_default(),
        };
        if let Ok(cache) = self.backends.read()
            && let Some(backend) = cache.get(&key)
        {
            return Ok(backend.clone());
        }

        let azure = AzureOpenAiBackend::from_settings(self.client.clone(), settings)?;
        let backend: Arc<dyn ModelBackend> = Arc::new(RetryingBackend::new(Arc::new(azure), self.retry_backoff));
        debug!(endpoint = %settings.endpoint, "Backend created");
        if let Ok(mut cache) = self.backends.write() {
            cache.insert(key, backend.clone());
        }
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_config::{NamedConfig, ProcessDefaults};

    fn settings(endpoint: &str) -> TurnSettings {
        let mut s = NamedConfig::builtin().settings(&ProcessDefaults::default());
        s.key = Some("k".into());
        s.endpoint = endpoint.into();
        s
    }

    #[test]
    fn backends_are_cached_per_connection() {
        let router = BackendRouter::new(Duration::from_millis(1)).unwrap();
        let a1 = router.backend(&settings("https://a")).unwrap();
        let a2 = router.backend(&settings("https://a")).unwrap();
        router.backend(&settings("https://b")).unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
        assert_eq!(router.len(), 2);
        assert_eq!(a1.name(), "azure-openai");
    }

    #[test]
    fn missing_key_is_not_configured() {
        let router = BackendRouter::new(Duration::from_millis(1)).unwrap();
        let mut s = settings("https://a");
        s.key = None;
        assert!(matches!(router.backend(&s), Err(BackendError::NotConfigured(_))));
        assert!(router.is_empty());
    }
}
