//! Adapters exposing a [`DocumentStore`] through the core capability traits.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use chatrelay_core::{ConfigStore, StoreCapability, StoreConfig, StoreError, ToolError};

use crate::cosmos::CosmosRest;
use crate::document::{DocumentStore, strip_system_fields};

/// Config tier backed by a document store: a config named `n` is the newest
/// item in partition `n` of the configs container.
pub struct DocumentConfigStore {
    store: Arc<dyn DocumentStore>,
}

impl DocumentConfigStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ConfigStore for DocumentConfigStore {
    async fn get_by_partition_key(&self, container: &str, name: &str) -> Result<Option<Value>, StoreError> {
        let items = self.store.partition(container, name).await?;
        Ok(items.into_iter().next().map(strip_system_fields))
    }
}

fn unavailable(source: &StoreConfig, err: StoreError) -> ToolError {
    let tool = format!("store:{}", source.container);
    match err {
        StoreError::InvalidDocument(reason) => ToolError::invalid(tool, reason),
        other => ToolError::unavailable(tool, other.to_string()),
    }
}

/// Store-backed tools against a local document store. The source's
/// `database/container` pair names the collection.
pub struct DocumentStoreCapability {
    store: Arc<dyn DocumentStore>,
}

impl DocumentStoreCapability {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn collection(source: &StoreConfig) -> String {
        if source.database.is_empty() {
            source.container.clone()
        } else {
            format!("{}/{}", source.database, source.container)
        }
    }
}

#[async_trait]
impl StoreCapability for DocumentStoreCapability {
    async fn get_item(&self, source: &StoreConfig, item_id: &str, partition_key: &str) -> Result<Option<Value>, ToolError> {
        self.store
            .get(&Self::collection(source), item_id, partition_key)
            .await
            .map_err(|e| unavailable(source, e))
    }

    async fn get_partition_items(&self, source: &StoreConfig, partition_key: &str) -> Result<Vec<Value>, ToolError> {
        self.store
            .partition(&Self::collection(source), partition_key)
            .await
            .map_err(|e| unavailable(source, e))
    }

    async fn upsert_item(&self, source: &StoreConfig, item: Value) -> Result<Value, ToolError> {
        debug!(collection = %Self::collection(source), "Upserting item");
        self.store
            .upsert(&Self::collection(source), item)
            .await
            .map_err(|e| unavailable(source, e))
    }

    async fn delete_item(&self, source: &StoreConfig, item_id: &str, partition_key: &str) -> Result<bool, ToolError> {
        self.store
            .delete(&Self::collection(source), item_id, partition_key)
            .await
            .map_err(|e| unavailable(source, e))
    }
}

/// Store-backed tools against whichever Cosmos account each source names.
pub struct CosmosStoreCapability {
    rest: CosmosRest,
}

impl CosmosStoreCapability {
    pub fn new(rest: CosmosRest) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl StoreCapability for CosmosStoreCapability {
    async fn get_item(&self, source: &StoreConfig, item_id: &str, partition_key: &str) -> Result<Option<Value>, ToolError> {
        self.rest
            .read(source, item_id, partition_key)
            .await
            .map_err(|e| unavailable(source, e))
    }

    async fn get_partition_items(&self, source: &StoreConfig, partition_key: &str) -> Result<Vec<Value>, ToolError> {
        self.rest
            .query_partition(source, partition_key)
            .await
            .map_err(|e| unavailable(source, e))
    }

    async fn upsert_item(&self, source: &StoreConfig, item: Value) -> Result<Value, ToolError> {
        self.rest.upsert(source, item).await.map_err(|e| unavailable(source, e))
    }

    async fn delete_item(&self, source: &StoreConfig, item_id: &str, partition_key: &str) -> Result<bool, ToolError> {
        self.rest
            .delete(source, item_id, partition_key)
            .await
            .map_err(|e| unavailable(source, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryDocumentStore;
    use serde_json::json;

    fn source() -> StoreConfig {
        StoreConfig {
            host: String::new(),
            key: String::new(),
            database: "shop".into(),
            container: "orders".into(),
        }
    }

    #[tokio::test]
    async fn config_tier_returns_newest_item_without_system_fields() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store
            .upsert("configs", json!({"id": "configs", "partitionKey": "my-config", "temperature": 0.4}))
            .await
            .unwrap();
        let configs = DocumentConfigStore::new(store);
        let doc = configs.get_by_partition_key("configs", "my-config").await.unwrap().unwrap();
        assert_eq!(doc, json!({"temperature": 0.4}));
        assert!(configs.get_by_partition_key("configs", "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn capability_scopes_by_database_and_container() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let cap = DocumentStoreCapability::new(store.clone());
        cap.upsert_item(&source(), json!({"id": "7", "partitionKey": "web"}))
            .await
            .unwrap();
        assert!(store.get("shop/orders", "7", "web").await.unwrap().is_some());
        assert!(cap.get_item(&source(), "7", "web").await.unwrap().is_some());
        assert_eq!(cap.get_partition_items(&source(), "web").await.unwrap().len(), 1);
        assert!(cap.delete_item(&source(), "7", "web").await.unwrap());
    }

    #[tokio::test]
    async fn malformed_item_is_invalid_args() {
        let cap = DocumentStoreCapability::new(Arc::new(InMemoryDocumentStore::new()));
        let err = cap.upsert_item(&source(), json!({"no": "id"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs { .. }));
    }
}
