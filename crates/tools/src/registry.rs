//! Tool registry: binds exposed tool names to base capabilities.
//!
//! The orchestrator uses this to:
//! 1. Get tool descriptors to send to the model
//! 2. Validate and execute tool calls the model requests

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use chatrelay_config::{ConfigResolver, NamedConfig, ToolBinding};
use chatrelay_core::{
    BaseCapability, Error, SearchCapability, SearchConfig, SearchQuery, StoreCapability, StoreConfig, ToolCall,
    ToolDescriptor, ToolError, ToolResult,
};

use crate::schema;

/// Describes and invokes the tools of a named config.
pub struct ToolRegistry {
    resolver: Arc<ConfigResolver>,
    search: Arc<dyn SearchCapability>,
    store: Arc<dyn StoreCapability>,
    call_timeout: Duration,
}

impl ToolRegistry {
    pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(
        resolver: Arc<ConfigResolver>,
        search: Arc<dyn SearchCapability>,
        store: Arc<dyn StoreCapability>,
    ) -> Self {
        Self {
            resolver,
            search,
            store,
            call_timeout: Self::DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// One descriptor per binding, in config order.
    pub fn describe(&self, config: &NamedConfig) -> Vec<ToolDescriptor> {
        config
            .tools
            .iter()
            .map(|binding| ToolDescriptor {
                name: binding.exposed_name.clone(),
                description: if binding.description.is_empty() {
                    schema::default_description(binding.capability).to_string()
                } else {
                    binding.description.clone()
                },
                parameters: schema::parameters(binding),
            })
            .collect()
    }

    /// Execute one tool call against the config's bindings.
    ///
    /// Fixed arguments always override model arguments of the same key.
    pub async fn invoke(&self, config: &NamedConfig, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let binding = config
            .tool(&call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;

        let mut args = match &call.arguments {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(ToolError::invalid(
                    &call.name,
                    format!("arguments must be a JSON object, got {other}"),
                ));
            }
        };
        for (key, value) in &binding.fixed_args {
            args.insert(key.clone(), value.clone());
        }
        schema::validate(&call.name, binding.capability, &args)?;

        // A bound source is never overridden by the model.
        let requested = args.remove("source").and_then(|v| v.as_str().map(str::to_string));
        let source = binding.source.clone().or(requested);

        debug!(
            tool = %call.name,
            capability = %binding.capability,
            source = ?source,
            "Invoking tool"
        );

        let dispatch = self.dispatch(binding, source.as_deref(), args);
        let data = match tokio::time::timeout(self.call_timeout, dispatch).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(tool = %call.name, timeout_secs = self.call_timeout.as_secs(), "Tool call timed out");
                return Err(ToolError::unavailable(
                    &call.name,
                    format!("no response within {}s", self.call_timeout.as_secs()),
                ));
            }
        };

        Ok(ToolResult {
            call_id: call.id.clone(),
            success: true,
            output: serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string()),
            data: Some(data),
        })
    }

    async fn dispatch(
        &self,
        binding: &ToolBinding,
        source: Option<&str>,
        args: Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let name = binding.exposed_name.as_str();
        let text = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or_default().to_string();

        match binding.capability {
            BaseCapability::Search => {
                let source = self.search_source(name, source).await?;
                let query: SearchQuery = serde_json::from_value(Value::Object(args.clone()))
                    .map_err(|e| ToolError::invalid(name, e.to_string()))?;
                to_value(name, self.search.search(&source, query).await?)
            }
            BaseCapability::LookupDocument => {
                let source = self.search_source(name, source).await?;
                let found = self
                    .search
                    .lookup_by_field(&source, &text("field_name"), &text("field_val"))
                    .await?;
                to_value(name, found)
            }
            BaseCapability::GetDocument => {
                let source = self.search_source(name, source).await?;
                Ok(self.search.get_by_id(&source, &text("id")).await?.unwrap_or(Value::Null))
            }
            BaseCapability::GetItem => {
                let source = self.store_source(name, source).await?;
                let item = self
                    .store
                    .get_item(&source, &text("item_id"), &text("partition_key"))
                    .await?;
                Ok(item.unwrap_or(Value::Null))
            }
            BaseCapability::GetPartitionItems => {
                let source = self.store_source(name, source).await?;
                let items = self.store.get_partition_items(&source, &text("partition_key")).await?;
                Ok(Value::Array(items))
            }
            BaseCapability::UpsertItem => {
                let source = self.store_source(name, source).await?;
                let item = args.get("item").cloned().unwrap_or(Value::Null);
                self.store.upsert_item(&source, item).await
            }
            BaseCapability::DeleteItem => {
                let source = self.store_source(name, source).await?;
                let deleted = self
                    .store
                    .delete_item(&source, &text("item_id"), &text("partition_key"))
                    .await?;
                Ok(Value::Bool(deleted))
            }
        }
    }

    async fn search_source(&self, tool: &str, source: Option<&str>) -> Result<SearchConfig, ToolError> {
        self.resolver
            .search_config(source)
            .await
            .map_err(|e| source_error(tool, source, e))
    }

    async fn store_source(&self, tool: &str, source: Option<&str>) -> Result<StoreConfig, ToolError> {
        self.resolver
            .store_config(source)
            .await
            .map_err(|e| source_error(tool, source, e))
    }
}

/// A source the model named that does not exist is a bad argument; any other
/// resolution failure means the tool cannot run right now.
fn source_error(tool: &str, source: Option<&str>, err: Error) -> ToolError {
    match err {
        Error::ConfigNotFound { name } if source == Some(name.as_str()) => {
            ToolError::invalid(tool, format!("unknown source '{name}'"))
        }
        other => ToolError::unavailable(tool, other.to_string()),
    }
}

fn to_value<T: serde::Serialize>(tool: &str, value: T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::unavailable(tool, e.to_string()))
}

/// Render a recoverable tool failure as the text fed back to the model.
pub fn failure_message(err: &ToolError) -> String {
    match err {
        ToolError::Unavailable { tool_name, reason } => format!("Error: tool unavailable: {tool_name}: {reason}"),
        other => format!("Error: {other}"),
    }
}
