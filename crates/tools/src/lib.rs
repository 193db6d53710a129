//! Tool bindings for chatrelay.
//!
//! A named config exposes tools to the model; each one is bound to a base
//! capability (search, document lookup, store item operations) plus fixed
//! arguments the model cannot override. The registry describes those tools
//! and executes the calls the model makes.

pub mod azure_search;
pub mod registry;
pub mod schema;

pub use azure_search::AzureSearchClient;
pub use registry::{ToolRegistry, failure_message};
pub use schema::{ArgKind, ArgSpec};
