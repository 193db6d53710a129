//! The document store abstraction shared by every persistence concern.
//!
//! Items are JSON objects carrying an `id` and a `partitionKey`. Collections
//! are named containers; a partition lists its items newest first.

use async_trait::async_trait;
use serde_json::{Map, Value};

use chatrelay_core::StoreError;

/// Field holding an item's partition key.
pub const PARTITION_FIELD: &str = "partitionKey";

/// Field stamped with the last-write time (unix seconds).
pub const TIMESTAMP_FIELD: &str = "_ts";

/// A store of JSON items grouped into named collections.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, collection: &str, id: &str, partition: &str) -> Result<Option<Value>, StoreError>;

    /// All items of a partition, most recently written first.
    async fn partition(&self, collection: &str, partition: &str) -> Result<Vec<Value>, StoreError>;

    /// Insert or replace by `(id, partitionKey)`; returns the stored item.
    async fn upsert(&self, collection: &str, item: Value) -> Result<Value, StoreError>;

    async fn delete(&self, collection: &str, id: &str, partition: &str) -> Result<bool, StoreError>;
}

/// `(id, partition)` of an item, or why it cannot be stored.
pub fn item_key(item: &Value) -> Result<(String, String), StoreError> {
    let obj = item
        .as_object()
        .ok_or_else(|| StoreError::InvalidDocument("item must be a JSON object".into()))?;
    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StoreError::InvalidDocument("item has no string 'id'".into()))?;
    let partition = obj
        .get(PARTITION_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::InvalidDocument(format!("item has no string '{PARTITION_FIELD}'")))?;
    Ok((id.to_string(), partition.to_string()))
}

/// Drop `id`, the partition key and `_`-prefixed system fields.
pub fn strip_system_fields(item: Value) -> Value {
    match item {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| k != "id" && k != PARTITION_FIELD && !k.starts_with('_'))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}
