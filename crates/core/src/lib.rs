//! # chatrelay Core
//!
//! Domain types, capability traits, and error definitions for the chatrelay
//! conversation orchestration engine. This crate has **no transport
//! dependencies**; it defines the domain model that all other crates
//! implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (model backend, search index, document store,
//! stream transport, context persistence) is a trait here. Implementations
//! live in their respective crates, so the orchestrator can be driven end to
//! end with in-memory stand-ins.

pub mod capability;
pub mod context;
pub mod error;
pub mod message;
pub mod provider;
pub mod response;
pub mod stream;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use capability::{
    ConfigStore, SearchCapability, SearchConfig, SearchQuery, SearchResults, StoreCapability,
    StoreConfig, VectorFieldSpec,
};
pub use context::{
    ContextStore, ContextToken, ConversationContext, MAX_RECORDED_TURNS, ParticipantThread, ToolCallRecord, Turn,
};
pub use error::{BackendError, Error, Result, StoreError, StreamError, ToolError};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{BackendRequest, BackendResponse, ChunkReceiver, ModelBackend, StreamChunk, ToolChoice, Usage};
pub use response::{Citation, ResponseItem};
pub use stream::{StreamEvent, StreamEventKind, StreamHandle, StreamTransport, STREAM_EXPIRY_MINUTES};
pub use tool::{BaseCapability, ToolCall, ToolDescriptor, ToolResult};
