//! Model backend implementations for chatrelay.
//!
//! All backends implement the `chatrelay_core::ModelBackend` trait.
//! The router builds one backend per connection found in the effective
//! turn settings and wraps it in a single-retry layer.

pub mod azure_openai;
pub mod retry;
pub mod router;

pub use azure_openai::AzureOpenAiBackend;
pub use retry::RetryingBackend;
pub use router::{BackendFactory, BackendRouter, FixedBackend};
