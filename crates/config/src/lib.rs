//! Configuration loading, validation, and named-config resolution for chatrelay.
//!
//! Two layers live here:
//! - [`AppConfig`]: the service's own settings, loaded from
//!   `~/.chatrelay/config.toml` with environment variable overrides.
//! - [`ConfigResolver`]: cascading lookup of the named chat configurations a
//!   request selects (environment, then files, then the document store).

pub mod env;
pub mod named;
pub mod resolver;

pub use env::{EnvLookup, ProcessDefaults, env_from_pairs, process_env};
pub use named::{ConnectionSettings, NamedConfig, ToolBinding, TurnSettings};
pub use resolver::{ConfigResolver, ConfigSource, ConfigTier, EnvSource, FileSource, StoreSource};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root service configuration.
///
/// Maps directly to `~/.chatrelay/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Named-config resolution settings
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Document store used for contexts, store-backed tools and the config tier
    #[serde(default)]
    pub store: StoreSettings,

    /// Progress stream transport
    #[serde(default)]
    pub stream: StreamSettings,

    /// Turn orchestration limits
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    7071
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Directories searched for `{name}`, `{name}.json`, `{name}.conf`
    #[serde(default = "default_config_dirs")]
    pub config_dirs: Vec<PathBuf>,

    /// Store container holding config documents
    #[serde(default = "default_configs_container")]
    pub store_container: String,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_config_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("configs"), PathBuf::from("data-configs")]
}
fn default_configs_container() -> String {
    "configs".into()
}
fn default_cache_ttl() -> u64 {
    300
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            config_dirs: default_config_dirs(),
            store_container: default_configs_container(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// "file", "memory", or "cosmos" (uses the root `COSMOS_*` account)
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// Root directory of the file backend
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_store_backend() -> String {
    "file".into()
}
fn default_data_dir() -> PathBuf {
    AppConfig::config_dir().join("data")
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// "local" or "web-pubsub"
    #[serde(default = "default_stream_transport")]
    pub transport: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubsub_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubsub_access_key: Option<String>,

    #[serde(default = "default_hub")]
    pub pubsub_hub: String,
}

fn default_stream_transport() -> String {
    "local".into()
}
fn default_hub() -> String {
    "hub".into()
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            transport: default_stream_transport(),
            pubsub_endpoint: None,
            pubsub_access_key: None,
            pubsub_hub: default_hub(),
        }
    }
}

impl std::fmt::Debug for StreamSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSettings")
            .field("transport", &self.transport)
            .field("pubsub_endpoint", &self.pubsub_endpoint)
            .field("pubsub_access_key", &redact(&self.pubsub_access_key))
            .field("pubsub_hub", &self.pubsub_hub)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Whole-request timeout when the caller gives none
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Per tool call
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Backoff before the single backend retry
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Time always reserved for the interpreter in multi-assistant turns
    #[serde(default = "default_interpreter_reserve")]
    pub interpreter_reserve_secs: u64,

    /// Minimum gap between interim stream flushes
    #[serde(default = "default_interim_interval")]
    pub interim_interval_ms: u64,
}

fn default_request_timeout() -> u64 {
    90
}
fn default_tool_timeout() -> u64 {
    30
}
fn default_retry_backoff() -> u64 {
    500
}
fn default_interpreter_reserve() -> u64 {
    20
}
fn default_interim_interval() -> u64 {
    400
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            retry_backoff_ms: default_retry_backoff(),
            interpreter_reserve_secs: default_interpreter_reserve(),
            interim_interval_ms: default_interim_interval(),
        }
    }
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.chatrelay/config.toml),
    /// then apply environment overrides from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(&process_env());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Environment overrides:
    /// - `CHATRELAY_PORT`, `CHATRELAY_HOST`
    /// - `CHATRELAY_CONFIG_DIR` (searched before the configured directories)
    /// - `CHATRELAY_DATA_DIR`
    /// - `PUBSUB_ENDPOINT`, `PUBSUB_ACCESS_KEY`, `PUBSUB_HUB` (an endpoint selects Web PubSub)
    pub fn apply_env(&mut self, env: &EnvLookup) {
        if let Some(port) = env("CHATRELAY_PORT").and_then(|p| p.parse().ok()) {
            self.gateway.port = port;
        }
        if let Some(host) = env("CHATRELAY_HOST") {
            self.gateway.host = host;
        }
        if let Some(dir) = env("CHATRELAY_CONFIG_DIR") {
            self.resolver.config_dirs.insert(0, PathBuf::from(dir));
        }
        if let Some(dir) = env("CHATRELAY_DATA_DIR") {
            self.store.data_dir = PathBuf::from(dir);
        }
        if let Some(endpoint) = env("PUBSUB_ENDPOINT") {
            self.stream.pubsub_endpoint = Some(endpoint);
            self.stream.transport = "web-pubsub".into();
        }
        if let Some(key) = env("PUBSUB_ACCESS_KEY") {
            self.stream.pubsub_access_key = Some(key);
        }
        if let Some(hub) = env("PUBSUB_HUB") {
            self.stream.pubsub_hub = hub;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chatrelay")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.store.backend.as_str(), "file" | "memory" | "cosmos") {
            return Err(ConfigError::ValidationError(format!(
                "store.backend must be \"file\", \"memory\" or \"cosmos\", got \"{}\"",
                self.store.backend
            )));
        }

        match self.stream.transport.as_str() {
            "local" => {}
            "web-pubsub" => {
                if self.stream.pubsub_endpoint.is_none() || self.stream.pubsub_access_key.is_none() {
                    return Err(ConfigError::ValidationError(
                        "web-pubsub transport requires PUBSUB_ENDPOINT and PUBSUB_ACCESS_KEY".into(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "stream.transport must be \"local\" or \"web-pubsub\", got \"{other}\""
                )));
            }
        }

        if self.orchestrator.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.request_timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Service configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
