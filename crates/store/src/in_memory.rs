//! In-memory document store: useful for testing and ephemeral deployments.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use chatrelay_core::StoreError;

use crate::document::{DocumentStore, TIMESTAMP_FIELD, item_key};

/// Items of one collection in write order; the last element is the newest.
#[derive(Debug, Default, Clone)]
pub(crate) struct Collection {
    pub(crate) items: Vec<Value>,
}

impl Collection {
    fn position(&self, id: &str, partition: &str) -> Option<usize> {
        self.items.iter().position(|item| {
            item_key(item).is_ok_and(|(i, p)| i == id && p == partition)
        })
    }

    pub(crate) fn get(&self, id: &str, partition: &str) -> Option<Value> {
        self.position(id, partition).map(|i| self.items[i].clone())
    }

    pub(crate) fn partition(&self, partition: &str) -> Vec<Value> {
        self.items
            .iter()
            .rev()
            .filter(|item| item_key(item).is_ok_and(|(_, p)| p == partition))
            .cloned()
            .collect()
    }

    pub(crate) fn upsert(&mut self, mut item: Value) -> Result<Value, StoreError> {
        let (id, partition) = item_key(&item)?;
        if let Some(i) = self.position(&id, &partition) {
            self.items.remove(i);
        }
        item[TIMESTAMP_FIELD] = Value::from(Utc::now().timestamp());
        self.items.push(item.clone());
        Ok(item)
    }

    pub(crate) fn delete(&mut self, id: &str, partition: &str) -> bool {
        match self.position(id, partition) {
            Some(i) => {
                self.items.remove(i);
                true
            }
            None => false,
        }
    }
}

/// A store that keeps every collection in a map behind one lock.
pub struct InMemoryDocumentStore {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, collection: &str, id: &str, partition: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|c| c.get(id, partition)))
    }

    async fn partition(&self, collection: &str, partition: &str) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|c| c.partition(partition))
            .unwrap_or_default())
    }

    async fn upsert(&self, collection: &str, item: Value) -> Result<Value, StoreError> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .upsert(item)
    }

    async fn delete(&self, collection: &str, id: &str, partition: &str) -> Result<bool, StoreError> {
        Ok(self
            .collections
            .write()
            .await
            .get_mut(collection)
            .is_some_and(|c| c.delete(id, partition)))
    }
}
