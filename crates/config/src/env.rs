//! Process environment access and process-wide defaults.
//!
//! Environment reads go through an injectable [`EnvLookup`] so resolution can
//! be exercised without mutating the real process environment.

use std::collections::HashMap;
use std::sync::Arc;

use chatrelay_core::{SearchConfig, StoreConfig, VectorFieldSpec};

/// Reads one environment variable.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Lookup backed by the real process environment.
pub fn process_env() -> EnvLookup {
    Arc::new(|key| std::env::var(key).ok())
}

/// Lookup backed by a fixed set of pairs.
pub fn env_from_pairs(pairs: &[(&str, &str)]) -> EnvLookup {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Arc::new(move |key| map.get(key).cloned())
}

pub const DEFAULT_REGION: &str = "australiaeast-01";
pub const DEFAULT_API_VERSION: &str = "2024-02-15-preview";
pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a smart assistant who is here to answer user questions as best you can.";

/// Fallback values for any field a named config leaves unset.
///
/// Populated once at startup and never mutated afterwards.
#[derive(Clone)]
pub struct ProcessDefaults {
    pub key: Option<String>,
    pub endpoint: Option<String>,
    pub region: String,
    pub version: String,
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_steps: u32,
    pub max_history: usize,
    pub data_source_config: Option<String>,
    pub data_source_api_version: Option<String>,
    /// Root search index used when a tool binding names no source
    pub search: Option<SearchConfig>,
    /// Root document store used when a tool binding names no source
    pub store: Option<StoreConfig>,
}

impl Default for ProcessDefaults {
    fn default() -> Self {
        Self {
            key: None,
            endpoint: None,
            region: DEFAULT_REGION.into(),
            version: DEFAULT_API_VERSION.into(),
            model: DEFAULT_MODEL.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: 1200,
            timeout_secs: 90,
            max_steps: 5,
            max_history: 20,
            data_source_config: None,
            data_source_api_version: None,
            search: None,
            store: None,
        }
    }
}

impl std::fmt::Debug for ProcessDefaults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessDefaults")
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("version", &self.version)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_steps", &self.max_steps)
            .field("max_history", &self.max_history)
            .field("data_source_config", &self.data_source_config)
            .field("search", &self.search)
            .field("store", &self.store)
            .finish()
    }
}

impl ProcessDefaults {
    /// Read defaults from the environment. Unparseable numbers keep the built-in value.
    pub fn from_env(env: &EnvLookup) -> Self {
        let mut defaults = Self::default();
        let get = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        defaults.key = get("AZURE_OAI_API_KEY");
        defaults.endpoint = get("AZURE_OAI_ENDPOINT");
        if let Some(region) = get("AZURE_OAI_REGION") {
            defaults.region = region;
        }
        if let Some(version) = get("AZURE_OAI_VERSION") {
            defaults.version = version;
        }
        if let Some(model) = get("AZURE_OAI_MODEL_DEPLOYMENT") {
            defaults.model = model;
        }
        if let Some(prompt) = get("AZURE_OAI_SYSTEM_PROMPT") {
            defaults.system_prompt = prompt;
        }
        if let Some(t) = get("AZURE_OAI_MODEL_TEMPERATURE").and_then(|v| v.parse().ok()) {
            defaults.temperature = t;
        }
        if let Some(t) = get("AZURE_OAI_MODEL_TIMEOUT").and_then(|v| v.parse().ok()) {
            defaults.timeout_secs = t;
        }
        defaults.data_source_config = get("OAI_DATA_SOURCES_CONFIG_NAME");
        defaults.data_source_api_version = get("AZURE_OAI_DATA_SOURCES_API_VERSION");

        if let (Some(endpoint), Some(index), Some(query_key)) = (
            get("AZURE_SEARCH_SERVICE_ENDPOINT"),
            get("AZURE_SEARCH_INDEX_NAME"),
            get("AZURE_SEARCH_QUERY_API_KEY"),
        ) {
            defaults.search = Some(SearchConfig {
                endpoint,
                index,
                query_key,
                embedding_model: Some(
                    get("AZURE_SEARCH_EMBEDDING_LOOKUP_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
                ),
                semantic_config: get("AZURE_SEARCH_SEMANTIC_CONFIG"),
                vector_fields: get("AZURE_SEARCH_VECTOR_FIELDS")
                    .map(|spec| parse_vector_fields(&spec))
                    .unwrap_or_default(),
            });
        }

        if let Some(database) = get("COSMOS_DATABASE_ID") {
            defaults.store = Some(StoreConfig {
                host: get("COSMOS_ACCOUNT_HOST").unwrap_or_default(),
                key: get("COSMOS_KEY").unwrap_or_default(),
                database,
                container: get("COSMOS_CONTAINER_ID").unwrap_or_else(|| "items".into()),
            });
        }

        defaults
    }
}

/// Parse `field:dim:knn,field:dim:knn`. Missing dim/knn take the defaults.
pub fn parse_vector_fields(spec: &str) -> Vec<VectorFieldSpec> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|entry| {
            let mut parts = entry.split(':').map(str::trim);
            let field = parts.next().filter(|f| !f.is_empty())?.to_string();
            let dim = parts
                .next()
                .and_then(|d| d.parse().ok())
                .unwrap_or(VectorFieldSpec::DEFAULT_DIM);
            let k_nearest = parts
                .next()
                .and_then(|k| k.parse().ok())
                .unwrap_or(VectorFieldSpec::DEFAULT_K_NEAREST);
            Some(VectorFieldSpec { field, dim, k_nearest })
        })
        .collect()
}
