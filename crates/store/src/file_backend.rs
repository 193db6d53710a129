//! File-based document store: one JSON-lines file per collection.
//!
//! Each line is one item. A collection is read from disk the first time it is
//! touched and rewritten on every mutation, which gives fast reads with
//! durable writes.
//!
//! Storage location: `~/.chatrelay/data/{collection}.jsonl`

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use chatrelay_core::StoreError;

use crate::document::DocumentStore;
use crate::in_memory::Collection;

pub struct FileDocumentStore {
    root: PathBuf,
    collections: Mutex<HashMap<String, Collection>>,
}

impl FileDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            collections: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Collection names may contain `/` (database/container); anything
    /// outside `[A-Za-z0-9_-]` becomes `_` so a name can never escape the root.
    fn path_for(&self, collection: &str) -> PathBuf {
        let file: String = collection
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("{file}.jsonl"))
    }

    async fn load(path: &Path) -> Result<Collection, StoreError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Collection::default()),
            Err(e) => return Err(StoreError::Storage(format!("failed to read {}: {e}", path.display()))),
        };

        let items: Vec<Value> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Value>(line) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping corrupted item");
                    None
                }
            })
            .collect();
        debug!(path = %path.display(), count = items.len(), "Collection loaded");
        Ok(Collection { items })
    }

    async fn flush(&self, collection: &str, data: &Collection) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::Storage(format!("failed to create {}: {e}", self.root.display())))?;

        let mut content = String::new();
        for item in &data.items {
            let line = serde_json::to_string(item).map_err(|e| StoreError::Storage(e.to_string()))?;
            content.push_str(&line);
            content.push('\n');
        }

        // Write-then-rename so a crash never leaves a half-written collection.
        let path = self.path_for(collection);
        let tmp = path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| StoreError::Storage(format!("failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Storage(format!("failed to replace {}: {e}", path.display())))
    }

    /// Run `f` against a loaded collection while holding the store lock.
    async fn with_collection<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut Collection) -> Result<(T, bool), StoreError>,
    ) -> Result<T, StoreError> {
        let mut collections = self.collections.lock().await;
        if !collections.contains_key(collection) {
            let loaded = Self::load(&self.path_for(collection)).await?;
            collections.insert(collection.to_string(), loaded);
        }
        let Some(data) = collections.get_mut(collection) else {
            return Err(StoreError::Storage(format!("collection {collection} vanished")));
        };
        let (out, dirty) = f(data)?;
        if dirty {
            self.flush(collection, data).await?;
        }
        Ok(out)
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, collection: &str, id: &str, partition: &str) -> Result<Option<Value>, StoreError> {
        self.with_collection(collection, |c| Ok((c.get(id, partition), false)))
            .await
    }

    async fn partition(&self, collection: &str, partition: &str) -> Result<Vec<Value>, StoreError> {
        self.with_collection(collection, |c| Ok((c.partition(partition), false)))
            .await
    }

    async fn upsert(&self, collection: &str, item: Value) -> Result<Value, StoreError> {
        self.with_collection(collection, |c| c.upsert(item).map(|stored| (stored, true)))
            .await
    }

    async fn delete(&self, collection: &str, id: &str, partition: &str) -> Result<bool, StoreError> {
        self.with_collection(collection, |c| {
            let deleted = c.delete(id, partition);
            Ok((deleted, deleted))
        })
        .await
    }
}
