//! External capability interfaces consumed by the tool registry.
//!
//! Search and document-store operations are narrow collaborators: the
//! registry resolves a source configuration, then hands it to one of these
//! traits together with the validated arguments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, ToolError};

/// One vector field to query alongside the text query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorFieldSpec {
    pub field: String,
    pub dim: u32,
    pub k_nearest: u32,
}

impl VectorFieldSpec {
    pub const DEFAULT_DIM: u32 = 1024;
    pub const DEFAULT_K_NEAREST: u32 = 3;
}

/// A resolved search index source.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub endpoint: String,
    pub index: String,
    pub query_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_config: Option<String>,
    #[serde(default)]
    pub vector_fields: Vec<VectorFieldSpec>,
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("endpoint", &self.endpoint)
            .field("index", &self.index)
            .field("query_key", &"[REDACTED]")
            .field("semantic_config", &self.semantic_config)
            .field("vector_fields", &self.vector_fields)
            .finish()
    }
}

/// A resolved document store container.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub host: String,
    pub key: String,
    pub database: String,
    pub container: String,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("key", &"[REDACTED]")
            .field("database", &self.database)
            .field("container", &self.container)
            .finish()
    }
}

/// Arguments for a full search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub complex_query: bool,
    #[serde(default = "default_true")]
    pub do_vector_search: bool,
    #[serde(default)]
    pub match_all: bool,
    #[serde(default = "default_results")]
    pub number_of_results: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facets: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub use_semantic_ranking: bool,
}

fn default_true() -> bool {
    true
}

fn default_results() -> u32 {
    10
}

impl SearchQuery {
    pub fn simple(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            complex_query: false,
            do_vector_search: true,
            match_all: false,
            number_of_results: default_results(),
            facets: None,
            use_semantic_ranking: true,
        }
    }
}

/// Documents returned by a search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    pub results: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facets: Option<serde_json::Value>,
}

/// Search index operations.
#[async_trait]
pub trait SearchCapability: Send + Sync {
    async fn search(&self, source: &SearchConfig, query: SearchQuery) -> Result<SearchResults, ToolError>;

    /// Exact match on one field; returns at most one document.
    async fn lookup_by_field(
        &self,
        source: &SearchConfig,
        field_name: &str,
        field_val: &str,
    ) -> Result<SearchResults, ToolError> {
        let mut query = SearchQuery::simple(format!("{field_name}:\"{field_val}\""));
        query.complex_query = true;
        query.match_all = true;
        query.number_of_results = 1;
        query.do_vector_search = false;
        query.use_semantic_ranking = false;
        self.search(source, query).await
    }

    async fn get_by_id(&self, source: &SearchConfig, id: &str) -> Result<Option<serde_json::Value>, ToolError>;
}

/// Document store operations, scoped by a store config's container.
#[async_trait]
pub trait StoreCapability: Send + Sync {
    async fn get_item(
        &self,
        source: &StoreConfig,
        item_id: &str,
        partition_key: &str,
    ) -> Result<Option<serde_json::Value>, ToolError>;

    async fn get_partition_items(
        &self,
        source: &StoreConfig,
        partition_key: &str,
    ) -> Result<Vec<serde_json::Value>, ToolError>;

    async fn upsert_item(&self, source: &StoreConfig, item: serde_json::Value) -> Result<serde_json::Value, ToolError>;

    async fn delete_item(&self, source: &StoreConfig, item_id: &str, partition_key: &str) -> Result<bool, ToolError>;
}

/// Lookup for the store tier of configuration resolution.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_by_partition_key(
        &self,
        container: &str,
        name: &str,
    ) -> Result<Option<serde_json::Value>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        queries: Mutex<Vec<SearchQuery>>,
    }

    #[async_trait]
    impl SearchCapability for Recorder {
        async fn search(&self, _source: &SearchConfig, query: SearchQuery) -> Result<SearchResults, ToolError> {
            self.queries.lock().unwrap().push(query);
            Ok(SearchResults::default())
        }

        async fn get_by_id(&self, _source: &SearchConfig, _id: &str) -> Result<Option<serde_json::Value>, ToolError> {
            Ok(None)
        }
    }

    fn source() -> SearchConfig {
        SearchConfig {
            endpoint: "https://search.example".into(),
            index: "products".into(),
            query_key: "secret".into(),
            embedding_model: None,
            semantic_config: None,
            vector_fields: vec![],
        }
    }

    #[tokio::test]
    async fn lookup_by_field_is_an_exact_single_result_query() {
        let rec = Recorder::default();
        rec.lookup_by_field(&source(), "sku", "A-1").await.unwrap();
        let q = rec.queries.lock().unwrap()[0].clone();
        assert_eq!(q.query, "sku:\"A-1\"");
        assert!(q.complex_query && q.match_all);
        assert_eq!(q.number_of_results, 1);
        assert!(!q.do_vector_search);
    }

    #[test]
    fn search_query_defaults_from_json() {
        let q: SearchQuery = serde_json::from_value(serde_json::json!({"query": "shampoo"})).unwrap();
        assert_eq!(q, SearchQuery::simple("shampoo"));
    }

    #[test]
    fn debug_redacts_keys() {
        let dbg = format!("{:?}", source());
        assert!(!dbg.contains("secret"));
    }
}
