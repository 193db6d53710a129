//! Tool domain types: what a model sees and what it asks for.
//!
//! A tool is never open-ended code: every exposed tool name is bound to one
//! of a closed set of [`BaseCapability`] variants plus a set of fixed
//! arguments the model cannot override.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// The exposed tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the model-visible parameters
    pub parameters: serde_json::Value,
}

/// A request to execute a tool, as decoded from a model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Exposed name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The text fed back to the model
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// The closed set of operations a tool binding can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseCapability {
    Search,
    LookupDocument,
    GetDocument,
    GetItem,
    GetPartitionItems,
    UpsertItem,
    DeleteItem,
}

impl BaseCapability {
    pub const ALL: [BaseCapability; 7] = [
        Self::Search,
        Self::LookupDocument,
        Self::GetDocument,
        Self::GetItem,
        Self::GetPartitionItems,
        Self::UpsertItem,
        Self::DeleteItem,
    ];

    /// Canonical function name used in configuration documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::LookupDocument => "lookup_document_by_field",
            Self::GetDocument => "get_document",
            Self::GetItem => "get_item",
            Self::GetPartitionItems => "get_partition_items",
            Self::UpsertItem => "upsert_item",
            Self::DeleteItem => "delete_item",
        }
    }

    /// Search-family capabilities take a search source; the rest take a store.
    pub fn uses_search_source(&self) -> bool {
        matches!(self, Self::Search | Self::LookupDocument | Self::GetDocument)
    }
}

impl fmt::Display for BaseCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BaseCapability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "search" => Ok(Self::Search),
            "lookup_document_by_field" | "lookup_document" => Ok(Self::LookupDocument),
            "get_document" => Ok(Self::GetDocument),
            "get_item" => Ok(Self::GetItem),
            "get_partition_items" => Ok(Self::GetPartitionItems),
            "upsert_item" => Ok(Self::UpsertItem),
            "delete_item" => Ok(Self::DeleteItem),
            other => Err(format!("unknown base capability '{other}'")),
        }
    }
}
