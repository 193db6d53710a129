//! Document storage for chatrelay.
//!
//! One [`DocumentStore`] serves three concerns:
//! - the store tier of named-config resolution ([`DocumentConfigStore`])
//! - store-backed tools ([`DocumentStoreCapability`], [`CosmosStoreCapability`])
//! - conversation contexts ([`DocumentContextStore`])

pub mod adapters;
pub mod context;
pub mod cosmos;
pub mod document;
pub mod file_backend;
pub mod in_memory;

pub use adapters::{CosmosStoreCapability, DocumentConfigStore, DocumentStoreCapability};
pub use context::{DocumentContextStore, HISTORY_COLLECTION};
pub use cosmos::{CosmosDocumentStore, CosmosRest};
pub use document::{DocumentStore, PARTITION_FIELD};
pub use file_backend::FileDocumentStore;
pub use in_memory::InMemoryDocumentStore;
