//! Conversation context persistence on top of a document store.
//!
//! One item per conversation in the `history` collection: id `history`,
//! partition key = the context token.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

use chatrelay_core::{ContextStore, ContextToken, ConversationContext, StoreError};

use crate::document::{DocumentStore, PARTITION_FIELD};

pub const HISTORY_COLLECTION: &str = "history";
const HISTORY_ID: &str = "history";

pub struct DocumentContextStore {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl DocumentContextStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            collection: HISTORY_COLLECTION.into(),
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }
}

#[async_trait]
impl ContextStore for DocumentContextStore {
    async fn load(&self, token: &ContextToken) -> Result<Option<ConversationContext>, StoreError> {
        let Some(item) = self.store.get(&self.collection, HISTORY_ID, token.as_str()).await? else {
            debug!(context = %token, "No stored context");
            return Ok(None);
        };
        let context = item.get("context").cloned().unwrap_or(Value::Null);
        let mut context: ConversationContext = serde_json::from_value(context)
            .map_err(|e| StoreError::InvalidDocument(format!("context {token}: {e}")))?;
        context.token = Some(token.clone());
        Ok(Some(context))
    }

    async fn save(&self, context: &mut ConversationContext) -> Result<ContextToken, StoreError> {
        let token = context.token.get_or_insert_with(ContextToken::new).clone();
        let body = serde_json::to_value(&*context).map_err(|e| StoreError::InvalidDocument(e.to_string()))?;
        self.store
            .upsert(
                &self.collection,
                json!({
                    "id": HISTORY_ID,
                    PARTITION_FIELD: token.as_str(),
                    "context": body,
                }),
            )
            .await?;
        debug!(context = %token, turns = context.turns.len(), "Context saved");
        Ok(token)
    }
}
