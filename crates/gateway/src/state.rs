//! Service wiring: turns an [`AppConfig`] into a ready orchestrator.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use chatrelay_agent::{AssistantOrchestrator, OrchestratorSettings};
use chatrelay_config::{AppConfig, ConfigResolver, EnvLookup, ProcessDefaults};
use chatrelay_core::{ConfigStore, StoreCapability, StreamTransport};
use chatrelay_providers::BackendRouter;
use chatrelay_store::{
    CosmosDocumentStore, CosmosRest, CosmosStoreCapability, DocumentConfigStore, DocumentContextStore,
    DocumentStore, DocumentStoreCapability, FileDocumentStore, InMemoryDocumentStore,
};
use chatrelay_stream::{LocalTransport, StreamPublisher, WebPubSubTransport};
use chatrelay_tools::{AzureSearchClient, ToolRegistry};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Arc<AssistantOrchestrator>,
    /// Set when streams are served in-process at `/api/streams/{id}`
    pub local_streams: Option<Arc<LocalTransport>>,
}

impl GatewayState {
    pub fn new(orchestrator: Arc<AssistantOrchestrator>, local_streams: Option<Arc<LocalTransport>>) -> Self {
        Self {
            orchestrator,
            local_streams,
        }
    }

    /// Build every collaborator from `config`, reading process defaults
    /// (`AZURE_OAI_*`, `SEARCH_*`, `COSMOS_*`) through `env`.
    pub fn from_config(config: &AppConfig, env: EnvLookup) -> Result<Self, Box<dyn std::error::Error>> {
        let http = reqwest::Client::builder().build()?;
        let defaults = Arc::new(ProcessDefaults::from_env(&env));

        let documents: Arc<dyn DocumentStore> = match config.store.backend.as_str() {
            "memory" => Arc::new(InMemoryDocumentStore::new()),
            "cosmos" => {
                let account = defaults
                    .store
                    .clone()
                    .ok_or("store.backend = \"cosmos\" needs COSMOS_DATABASE_ID, COSMOS_ACCOUNT_HOST and COSMOS_KEY")?;
                Arc::new(CosmosDocumentStore::new(CosmosRest::new(http.clone()), account))
            }
            _ => Arc::new(FileDocumentStore::new(&config.store.data_dir)),
        };
        let store_tools: Arc<dyn StoreCapability> = if config.store.backend == "cosmos" {
            Arc::new(CosmosStoreCapability::new(CosmosRest::new(http.clone())))
        } else {
            Arc::new(DocumentStoreCapability::new(documents.clone()))
        };

        let config_store: Arc<dyn ConfigStore> = Arc::new(DocumentConfigStore::new(documents.clone()));
        let resolver = Arc::new(
            ConfigResolver::standard(
                defaults,
                env,
                config.resolver.config_dirs.clone(),
                Some((config_store, config.resolver.store_container.clone())),
            )
            .with_ttl(Duration::from_secs(config.resolver.cache_ttl_secs)),
        );

        let limits = &config.orchestrator;
        let backends = Arc::new(BackendRouter::new(Duration::from_millis(limits.retry_backoff_ms))?);
        let registry = Arc::new(
            ToolRegistry::new(resolver.clone(), Arc::new(AzureSearchClient::new(http.clone())), store_tools)
                .with_call_timeout(Duration::from_secs(limits.tool_timeout_secs)),
        );
        let contexts = Arc::new(DocumentContextStore::new(documents));

        let (transport, local_streams): (Arc<dyn StreamTransport>, Option<Arc<LocalTransport>>) = match config.stream.transport.as_str() {
            "web-pubsub" => {
                let endpoint = config.stream.pubsub_endpoint.as_deref().ok_or("PUBSUB_ENDPOINT is not set")?;
                let key = config.stream.pubsub_access_key.as_deref().ok_or("PUBSUB_ACCESS_KEY is not set")?;
                let pubsub = WebPubSubTransport::new(http.clone(), endpoint, key, &config.stream.pubsub_hub);
                (Arc::new(pubsub) as Arc<dyn StreamTransport>, None)
            }
            _ => {
                let base_url = format!("http://{}:{}/api/streams", config.gateway.host, config.gateway.port);
                let local = Arc::new(LocalTransport::new(base_url));
                (local.clone() as Arc<dyn StreamTransport>, Some(local))
            }
        };

        info!(
            store = %config.store.backend,
            stream = %config.stream.transport,
            config_dirs = config.resolver.config_dirs.len(),
            "Services wired"
        );

        let orchestrator = AssistantOrchestrator::new(
            resolver,
            backends,
            registry,
            contexts,
            Arc::new(StreamPublisher::new(transport)),
        )
        .with_settings(OrchestratorSettings {
            request_timeout: Duration::from_secs(limits.request_timeout_secs),
            interpreter_reserve: Duration::from_secs(limits.interpreter_reserve_secs),
            interim_interval: Duration::from_millis(limits.interim_interval_ms),
        });

        Ok(Self::new(Arc::new(orchestrator), local_streams))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_config::env_from_pairs;

    #[tokio::test]
    async fn local_transport_by_default() {
        let mut config = AppConfig::default();
        config.store.backend = "memory".into();
        let state = GatewayState::from_config(&config, env_from_pairs(&[])).unwrap();
        assert!(state.local_streams.is_some());
        assert_eq!(state.orchestrator.publisher().transport_name(), "local");

        let handle = state.orchestrator.publisher().create_stream().await.unwrap();
        assert!(handle.stream_url.starts_with("http://127.0.0.1:7071/api/streams/"));
    }

    #[test]
    fn web_pubsub_when_configured() {
        let mut config = AppConfig::default();
        config.store.backend = "memory".into();
        config.stream.transport = "web-pubsub".into();
        config.stream.pubsub_endpoint = Some("https://chat.webpubsub.azure.com".into());
        config.stream.pubsub_access_key = Some("a2V5".into());
        let state = GatewayState::from_config(&config, env_from_pairs(&[])).unwrap();
        assert!(state.local_streams.is_none());
        assert_eq!(state.orchestrator.publisher().transport_name(), "web-pubsub");
    }

    #[test]
    fn cosmos_backend_needs_an_account() {
        let mut config = AppConfig::default();
        config.store.backend = "cosmos".into();
        assert!(GatewayState::from_config(&config, env_from_pairs(&[])).is_err());

        let env = env_from_pairs(&[
            ("COSMOS_DATABASE_ID", "chat"),
            ("COSMOS_ACCOUNT_HOST", "https://acct.documents.azure.com"),
            ("COSMOS_KEY", "a2V5"),
        ]);
        assert!(GatewayState::from_config(&config, env).is_ok());
    }
}
