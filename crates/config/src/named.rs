//! Named configuration documents and their normalized shape.
//!
//! Documents arrive as loosely-typed JSON with several accepted spellings per
//! field. Aliases and `${VAR}` references are resolved here, once, so the rest
//! of the system only ever sees [`NamedConfig`].

use serde::Serialize;
use serde_json::Value;

use chatrelay_core::{BaseCapability, Error, Result, SearchConfig, StoreConfig, VectorFieldSpec};

use crate::env::{EnvLookup, ProcessDefaults, parse_vector_fields};

/// Model endpoint connection fields.
#[derive(Clone, Default, Serialize)]
pub struct ConnectionSettings {
    #[serde(skip_serializing)]
    pub key: Option<String>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub version: Option<String>,
    pub model: Option<String>,
}

impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("version", &self.version)
            .field("model", &self.model)
            .finish()
    }
}

/// A tool exposed to the model, bound to one base capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolBinding {
    pub exposed_name: String,
    pub capability: BaseCapability,
    pub description: String,
    /// Arguments the model cannot see or override
    pub fixed_args: serde_json::Map<String, Value>,
    /// Name of the search/store config this tool runs against
    pub source: Option<String>,
}

/// A fully parsed, immutable named configuration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NamedConfig {
    pub name: String,
    pub connection: ConnectionSettings,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub max_steps: Option<u32>,
    pub max_history: Option<usize>,
    pub use_data_source: bool,
    pub data_source_config: Option<String>,
    pub data_source_api_version: Option<String>,
    pub tools: Vec<ToolBinding>,
    /// Data-source extension descriptors, filled in by the resolver
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_sources: Option<Value>,
}

/// Effective per-turn values after defaults are applied.
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub key: Option<String>,
    pub endpoint: String,
    pub region: String,
    pub version: String,
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_steps: u32,
    pub max_history: usize,
    pub data_source_api_version: String,
}

/// Alias-aware view over a raw JSON document.
struct Doc<'a> {
    name: &'a str,
    value: &'a Value,
    env: &'a EnvLookup,
}

impl<'a> Doc<'a> {
    /// First alias present wins; a `${VAR}` value is replaced by the variable,
    /// and an unset variable leaves the field unset.
    fn raw(&self, aliases: &[&str]) -> Option<Value> {
        let found = aliases
            .iter()
            .find_map(|key| self.value.get(*key).filter(|v| !v.is_null()))?;
        match found.as_str() {
            Some(s) if s.starts_with("${") && s.ends_with('}') && s.len() > 3 => {
                (self.env)(&s[2..s.len() - 1]).map(Value::String)
            }
            _ => Some(found.clone()),
        }
    }

    fn string(&self, aliases: &[&str]) -> Option<String> {
        match self.raw(aliases)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn float(&self, aliases: &[&str]) -> Result<Option<f32>> {
        match self.raw(aliases) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64().map(|f| f as f32)),
            Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| self.invalid(aliases[0], &s)),
            Some(other) => Err(self.invalid(aliases[0], &other.to_string())),
        }
    }

    fn uint(&self, aliases: &[&str]) -> Result<Option<u64>> {
        match self.raw(aliases) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .map(Some)
                .ok_or_else(|| self.invalid(aliases[0], &n.to_string())),
            Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| self.invalid(aliases[0], &s)),
            Some(other) => Err(self.invalid(aliases[0], &other.to_string())),
        }
    }

    fn boolean(&self, aliases: &[&str]) -> Result<Option<bool>> {
        match self.raw(aliases) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Some(true)),
                "false" | "0" | "no" | "" => Ok(Some(false)),
                _ => Err(self.invalid(aliases[0], &s)),
            },
            Some(Value::Number(n)) => Ok(Some(n.as_f64().is_some_and(|f| f != 0.0))),
            Some(other) => Err(self.invalid(aliases[0], &other.to_string())),
        }
    }

    fn required(&self, aliases: &[&str]) -> Result<String> {
        self.string(aliases)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::config(format!("config '{}' is missing required field '{}'", self.name, aliases[0])))
    }

    fn invalid(&self, field: &str, value: &str) -> Error {
        Error::config(format!("config '{}' has invalid value for '{field}': {value}", self.name))
    }
}

impl NamedConfig {
    /// Built-in configuration used when a request names none.
    pub fn builtin() -> Self {
        Self {
            name: "default".into(),
            ..Default::default()
        }
    }

    /// Parse a raw document, resolving aliases and `${VAR}` references.
    pub fn parse(name: &str, value: &Value, env: &EnvLookup) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::config(format!("config '{name}' is not a JSON object")));
        }
        let doc = Doc { name, value, env };

        let to_u32 = |v: Option<u64>, field: &str| -> Result<Option<u32>> {
            v.map(|n| u32::try_from(n).map_err(|_| doc.invalid(field, &n.to_string())))
                .transpose()
        };

        Ok(Self {
            name: doc.string(&["name"]).unwrap_or_else(|| name.to_string()),
            connection: ConnectionSettings {
                key: doc.string(&["oai-key", "ai-key"]),
                endpoint: doc.string(&["oai-endpoint", "ai-endpoint"]),
                region: doc.string(&["oai-region", "ai-region"]),
                version: doc.string(&["oai-version", "ai-version"]),
                model: doc.string(&["oai-model", "ai-model"]),
            },
            system_prompt: doc.string(&["system-prompt", "ai-prompt"]),
            temperature: doc.float(&["temperature", "ai-temperature"])?,
            top_p: doc.float(&["top-p", "top_p"])?,
            max_tokens: to_u32(doc.uint(&["max-tokens", "max-tokens-generated"])?, "max-tokens")?,
            timeout_secs: doc.uint(&["timeout", "timeout-secs", "ai-timeout"])?,
            max_steps: to_u32(doc.uint(&["max-steps", "ai-max-steps"])?, "max-steps")?,
            max_history: doc.uint(&["max-history", "ai-max-history"])?.map(|n| n as usize),
            use_data_source: doc
                .boolean(&["use-data-source-config", "use-data-source-extensions"])?
                .unwrap_or(false),
            data_source_config: doc.string(&["data-source-config", "ai-source-config"]),
            data_source_api_version: doc.string(&["data-source-oai-version", "ai-source-config-api-version"]),
            tools: parse_tools(&doc)?,
            data_sources: None,
        })
    }

    /// The data-source config this config pulls in, if data sources are enabled.
    pub fn data_source_name(&self, defaults: &ProcessDefaults) -> Option<String> {
        if !self.use_data_source {
            return None;
        }
        self.data_source_config
            .clone()
            .or_else(|| defaults.data_source_config.clone())
    }

    /// Names of every other config this one refers to, in declaration order.
    pub fn references(&self, defaults: &ProcessDefaults) -> Vec<String> {
        let mut refs: Vec<String> = Vec::new();
        let candidates = self
            .data_source_name(defaults)
            .into_iter()
            .chain(self.tools.iter().filter_map(|t| t.source.clone()));
        for name in candidates {
            if !refs.contains(&name) {
                refs.push(name);
            }
        }
        refs
    }

    pub fn tool(&self, exposed_name: &str) -> Option<&ToolBinding> {
        self.tools.iter().find(|t| t.exposed_name == exposed_name)
    }

    /// Apply process defaults to every unset field.
    pub fn settings(&self, defaults: &ProcessDefaults) -> TurnSettings {
        let c = &self.connection;
        let region = c.region.clone().unwrap_or_else(|| defaults.region.clone());
        let endpoint = c
            .endpoint
            .clone()
            .or_else(|| defaults.endpoint.clone())
            .unwrap_or_else(|| format!("https://aoai-{region}.openai.azure.com"));
        let version = c.version.clone().unwrap_or_else(|| defaults.version.clone());
        TurnSettings {
            key: c.key.clone().or_else(|| defaults.key.clone()),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            region,
            model: c.model.clone().unwrap_or_else(|| defaults.model.clone()),
            system_prompt: self
                .system_prompt
                .clone()
                .unwrap_or_else(|| defaults.system_prompt.clone()),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            timeout_secs: self.timeout_secs.unwrap_or(defaults.timeout_secs),
            max_steps: self.max_steps.unwrap_or(defaults.max_steps).max(1),
            max_history: self.max_history.unwrap_or(defaults.max_history),
            data_source_api_version: self
                .data_source_api_version
                .clone()
                .or_else(|| defaults.data_source_api_version.clone())
                .unwrap_or_else(|| version.clone()),
            version,
        }
    }
}

fn parse_tools(doc: &Doc<'_>) -> Result<Vec<ToolBinding>> {
    let Some(entries) = doc.value.get("functions").or_else(|| doc.value.get("ai-functions")) else {
        return Ok(Vec::new());
    };
    let Some(entries) = entries.as_array() else {
        return Err(Error::config(format!("config '{}': 'functions' must be an array", doc.name)));
    };

    let mut tools: Vec<ToolBinding> = Vec::with_capacity(entries.len());
    for entry in entries {
        let field = |key: &str| entry.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let exposed_name = field("name")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::config(format!("config '{}': function entry without a name", doc.name)))?;
        if tools.iter().any(|t| t.exposed_name == exposed_name) {
            return Err(Error::config(format!(
                "config '{}': function '{exposed_name}' declared twice",
                doc.name
            )));
        }
        let capability = field("function")
            .unwrap_or_else(|| exposed_name.clone())
            .parse::<BaseCapability>()
            .map_err(|e| Error::config(format!("config '{}': function '{exposed_name}': {e}", doc.name)))?;
        let fixed_args = match entry.get("args") {
            None | Some(Value::Null) => serde_json::Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(Error::config(format!(
                    "config '{}': function '{exposed_name}': 'args' must be an object",
                    doc.name
                )));
            }
        };
        let source = fixed_args
            .get("source")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| field("source"));

        tools.push(ToolBinding {
            exposed_name,
            capability,
            description: field("description").unwrap_or_default(),
            fixed_args,
            source,
        });
    }
    Ok(tools)
}

/// Parse a search source document.
pub fn parse_search_config(name: &str, value: &Value, env: &EnvLookup) -> Result<SearchConfig> {
    let doc = Doc { name, value, env };
    let vector_fields = match doc.raw(&["vector-fields", "vector_fields"]) {
        None => Vec::new(),
        Some(Value::String(spec)) => parse_vector_fields(&spec),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                let d = Doc { name, value: item, env };
                let field = d.required(&["field", "name"])?;
                let dim = d.uint(&["dim", "dimensions"])?.map(|n| n as u32);
                let knn = d.uint(&["knn", "k-nearest-neighbors"])?.map(|n| n as u32);
                Ok(VectorFieldSpec {
                    field,
                    dim: dim.unwrap_or(VectorFieldSpec::DEFAULT_DIM),
                    k_nearest: knn.unwrap_or(VectorFieldSpec::DEFAULT_K_NEAREST),
                })
            })
            .collect::<Result<Vec<_>>>()?,
        Some(other) => return Err(doc.invalid("vector-fields", &other.to_string())),
    };

    Ok(SearchConfig {
        endpoint: doc.required(&["endpoint", "service-endpoint"])?,
        index: doc.required(&["index", "index-name"])?,
        query_key: doc.required(&["query_api_key", "query-key", "query-api-key"])?,
        embedding_model: doc.string(&["embedding-model", "embedding_model"]),
        semantic_config: doc.string(&["semantic-config", "semantic_config"]),
        vector_fields,
    })
}

/// Parse a document store source document.
pub fn parse_store_config(name: &str, value: &Value, env: &EnvLookup) -> Result<StoreConfig> {
    let doc = Doc { name, value, env };
    Ok(StoreConfig {
        host: doc.string(&["host"]).unwrap_or_default(),
        key: doc.string(&["key", "masterKey"]).unwrap_or_default(),
        database: doc.required(&["database", "databaseId"])?,
        container: doc.required(&["container", "containerId"])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::env_from_pairs;
    use serde_json::json;

    fn no_env() -> EnvLookup {
        env_from_pairs(&[])
    }

    #[test]
    fn aliases_populate_canonical_fields() {
        let a = NamedConfig::parse("a", &json!({"oai-key": "k1", "ai-model": "gpt-4o", "ai-timeout": 30}), &no_env()).unwrap();
        let b = NamedConfig::parse("b", &json!({"ai-key": "k1", "oai-model": "gpt-4o", "timeout-secs": "30"}), &no_env()).unwrap();
        assert_eq!(a.connection.key, b.connection.key);
        assert_eq!(a.connection.model.as_deref(), Some("gpt-4o"));
        assert_eq!(b.connection.model.as_deref(), Some("gpt-4o"));
        assert_eq!(a.timeout_secs, Some(30));
        assert_eq!(b.timeout_secs, Some(30));
    }

    #[test]
    fn first_alias_wins() {
        let c = NamedConfig::parse("c", &json!({"timeout": 10, "ai-timeout": 99}), &no_env()).unwrap();
        assert_eq!(c.timeout_secs, Some(10));
    }

    #[test]
    fn env_references_are_substituted() {
        let env = env_from_pairs(&[("MY_KEY", "secret-from-env")]);
        let c = NamedConfig::parse("c", &json!({"oai-key": "${MY_KEY}", "ai-prompt": "${UNSET}"}), &env).unwrap();
        assert_eq!(c.connection.key.as_deref(), Some("secret-from-env"));
        assert!(c.system_prompt.is_none());
    }

    #[test]
    fn invalid_number_is_a_config_error() {
        let err = NamedConfig::parse("c", &json!({"temperature": "warm"}), &no_env()).unwrap_err();
        assert_eq!(err.kind(), "config-invalid");
    }

    #[test]
    fn tool_bindings_keep_order_and_source() {
        let c = NamedConfig::parse(
            "my-config",
            &json!({
                "temperature": 0.4,
                "functions": [
                    {"name": "search-products", "function": "search", "description": "Find products",
                     "args": {"source": "product-database"}},
                    {"name": "get-order", "function": "get_item", "source": "orders", "args": {"partition_key": "web"}}
                ]
            }),
            &no_env(),
        )
        .unwrap();
        assert_eq!(c.temperature, Some(0.4));
        assert_eq!(c.tools.len(), 2);
        assert_eq!(c.tools[0].exposed_name, "search-products");
        assert_eq!(c.tools[0].capability, BaseCapability::Search);
        assert_eq!(c.tools[0].source.as_deref(), Some("product-database"));
        assert_eq!(c.tools[1].source.as_deref(), Some("orders"));
        assert_eq!(c.tools[1].fixed_args["partition_key"], "web");
    }

    #[test]
    fn unknown_capability_rejected() {
        let err = NamedConfig::parse("c", &json!({"functions": [{"name": "x", "function": "shell"}]}), &no_env()).unwrap_err();
        assert!(err.to_string().contains("shell"));
    }

    #[test]
    fn references_include_data_source_only_when_enabled() {
        let defaults = ProcessDefaults::default();
        let off = NamedConfig::parse("c", &json!({"data-source-config": "ds"}), &no_env()).unwrap();
        assert!(off.references(&defaults).is_empty());
        let on = NamedConfig::parse(
            "c",
            &json!({"use-data-source-config": "true", "ai-source-config": "ds",
                    "functions": [{"name": "s", "function": "search", "args": {"source": "ds"}}]}),
            &no_env(),
        )
        .unwrap();
        assert_eq!(on.references(&defaults), vec!["ds".to_string()]);
    }

    #[test]
    fn settings_fall_back_to_defaults() {
        let c = NamedConfig::parse("c", &json!({"temperature": 0.4, "oai-region": "eastus-02"}), &no_env()).unwrap();
        let s = c.settings(&ProcessDefaults::default());
        assert!((s.temperature - 0.4).abs() < f32::EPSILON);
        assert_eq!(s.endpoint, "https://aoai-eastus-02.openai.azure.com");
        assert_eq!(s.model, "gpt-4");
        assert_eq!(s.max_steps, 5);
        assert_eq!(s.data_source_api_version, "2024-02-15-preview");
    }

    #[test]
    fn search_config_aliases() {
        let s = parse_search_config(
            "product-database",
            &json!({
                "service-endpoint": "https://products.search.windows.net",
                "index-name": "products",
                "query-key": "qk",
                "vector-fields": [{"name": "embedding", "dimensions": 1536}, {"field": "title_vec", "knn": 5}]
            }),
            &no_env(),
        )
        .unwrap();
        assert_eq!(s.index, "products");
        assert_eq!(s.vector_fields[0].dim, 1536);
        assert_eq!(s.vector_fields[0].k_nearest, 3);
        assert_eq!(s.vector_fields[1].dim, 1024);
        assert_eq!(s.vector_fields[1].k_nearest, 5);
    }

    #[test]
    fn store_config_requires_container() {
        let err = parse_store_config("orders", &json!({"databaseId": "shop"}), &no_env()).unwrap_err();
        assert!(err.to_string().contains("container"));
        let ok = parse_store_config("orders", &json!({"databaseId": "shop", "containerId": "orders", "masterKey": "k"}), &no_env()).unwrap();
        assert_eq!(ok.container, "orders");
        assert_eq!(ok.key, "k");
    }
}
