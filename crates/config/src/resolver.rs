//! Cascading named-configuration resolution.
//!
//! Each tier is a pure `name -> Option<document>` lookup. Tiers run in a
//! fixed order (environment, local files, document store) and the first hit
//! wins; documents are never merged across tiers.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

use chatrelay_core::{ConfigStore, Error, Result, SearchConfig, StoreConfig};

use crate::env::{EnvLookup, ProcessDefaults};
use crate::named::{NamedConfig, parse_search_config, parse_store_config};

/// Which tier a document was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigTier {
    Env,
    File,
    Store,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Env => "env",
            Self::File => "file",
            Self::Store => "store",
        })
    }
}

/// One resolution tier.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    fn tier(&self) -> ConfigTier;

    async fn lookup(&self, name: &str) -> Result<Option<Value>>;
}

/// `CONFIG_{name}` environment variables holding a full JSON document.
pub struct EnvSource {
    env: EnvLookup,
}

impl EnvSource {
    pub fn new(env: EnvLookup) -> Self {
        Self { env }
    }

    fn keys(name: &str) -> Vec<String> {
        let mut keys = vec![
            format!("CONFIG_{name}"),
            format!("CONFIG_{}", name.to_uppercase()),
            format!("CONFIG_{}", name.to_uppercase().replace(['-', '.'], "_")),
        ];
        keys.dedup();
        keys
    }
}

#[async_trait]
impl ConfigSource for EnvSource {
    fn tier(&self) -> ConfigTier {
        ConfigTier::Env
    }

    async fn lookup(&self, name: &str) -> Result<Option<Value>> {
        for key in Self::keys(name) {
            if let Some(raw) = (self.env)(&key) {
                let doc = serde_json::from_str(&raw)
                    .map_err(|e| Error::config(format!("{key} does not hold valid JSON: {e}")))?;
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }
}

/// `{dir}/{name}`, `{dir}/{name}.json` or `{dir}/{name}.conf`, first directory first.
pub struct FileSource {
    dirs: Vec<PathBuf>,
}

impl FileSource {
    const SUFFIXES: [&'static str; 3] = ["", ".json", ".conf"];

    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    fn tier(&self) -> ConfigTier {
        ConfigTier::File
    }

    async fn lookup(&self, name: &str) -> Result<Option<Value>> {
        // Names are plain identifiers, never paths.
        if name.contains(['/', '\\']) || name.starts_with('.') {
            return Ok(None);
        }
        for dir in &self.dirs {
            for suffix in Self::SUFFIXES {
                let path = dir.join(format!("{name}{suffix}"));
                if !tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
                    continue;
                }
                let raw = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
                let doc = serde_json::from_str(&raw)
                    .map_err(|e| Error::config(format!("{} is not valid JSON: {e}", path.display())))?;
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }
}

/// Items in the `configs` container, partition-keyed by name.
pub struct StoreSource {
    store: Arc<dyn ConfigStore>,
    container: String,
}

impl StoreSource {
    pub fn new(store: Arc<dyn ConfigStore>, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
        }
    }
}

#[async_trait]
impl ConfigSource for StoreSource {
    fn tier(&self) -> ConfigTier {
        ConfigTier::Store
    }

    async fn lookup(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.store.get_by_partition_key(&self.container, name).await?)
    }
}

#[derive(Clone)]
struct CacheEntry {
    document: Arc<Value>,
    tier: ConfigTier,
    loaded_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.loaded_at.elapsed() > ttl
    }
}

/// Resolves configuration names to parsed, immutable configs.
pub struct ConfigResolver {
    tiers: Vec<Box<dyn ConfigSource>>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    defaults: Arc<ProcessDefaults>,
    env: EnvLookup,
}

impl ConfigResolver {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    /// A resolver with no tiers. Add them in priority order with [`Self::with_tier`].
    pub fn new(defaults: Arc<ProcessDefaults>, env: EnvLookup) -> Self {
        Self {
            tiers: Vec::new(),
            cache: RwLock::new(HashMap::new()),
            ttl: Self::DEFAULT_TTL,
            defaults,
            env,
        }
    }

    /// Environment, then files under `dirs`, then the optional store.
    pub fn standard(
        defaults: Arc<ProcessDefaults>,
        env: EnvLookup,
        dirs: Vec<PathBuf>,
        store: Option<(Arc<dyn ConfigStore>, String)>,
    ) -> Self {
        let mut resolver = Self::new(defaults, env.clone())
            .with_tier(EnvSource::new(env))
            .with_tier(FileSource::new(dirs));
        if let Some((store, container)) = store {
            resolver = resolver.with_tier(StoreSource::new(store, container));
        }
        resolver
    }

    pub fn with_tier(mut self, tier: impl ConfigSource + 'static) -> Self {
        self.tiers.push(Box::new(tier));
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn defaults(&self) -> &ProcessDefaults {
        &self.defaults
    }

    pub fn env(&self) -> &EnvLookup {
        &self.env
    }

    /// Fetch the raw document for `name`, from cache when fresh.
    pub async fn document(&self, name: &str) -> Result<(Arc<Value>, ConfigTier)> {
        if let Some(entry) = self.cache.read().await.get(name)
            && !entry.is_expired(self.ttl)
        {
            return Ok((entry.document.clone(), entry.tier));
        }

        for tier in &self.tiers {
            if let Some(doc) = tier.lookup(name).await? {
                debug!(config = %name, tier = %tier.tier(), "Configuration loaded");
                let entry = CacheEntry {
                    document: Arc::new(doc),
                    tier: tier.tier(),
                    loaded_at: Instant::now(),
                };
                let found = (entry.document.clone(), entry.tier);
                // Whole-entry swap; readers holding the old Arc keep a consistent view.
                self.cache.write().await.insert(name.to_string(), entry);
                return Ok(found);
            }
        }

        Err(Error::ConfigNotFound { name: name.to_string() })
    }

    async fn parse(&self, name: &str) -> Result<NamedConfig> {
        let (doc, _) = self.document(name).await?;
        NamedConfig::parse(name, &doc, &self.env)
    }

    /// Resolve `name` and every config it references.
    ///
    /// References are followed depth-first; meeting a name already on the
    /// current path fails with [`Error::ConfigCycle`].
    pub async fn resolve(&self, name: &str) -> Result<Arc<NamedConfig>> {
        let mut root = self.parse(name).await?;
        self.check_references(name, &root).await?;

        if let Some(ds_name) = root.data_source_name(&self.defaults) {
            let (doc, _) = self.document(&ds_name).await?;
            let sources = doc.get("data-sources").cloned().unwrap_or_else(|| (*doc).clone());
            root.data_sources = Some(match sources {
                Value::Array(_) => sources,
                other => Value::Array(vec![other]),
            });
        }

        info!(config = %name, tools = root.tools.len(), "Configuration resolved");
        Ok(Arc::new(root))
    }

    /// Like [`Self::resolve`], but an unknown root name yields `None`.
    pub async fn resolve_optional(&self, name: &str) -> Result<Option<Arc<NamedConfig>>> {
        match self.document(name).await {
            Ok(_) => self.resolve(name).await.map(Some),
            Err(Error::ConfigNotFound { name: missing }) if missing == name => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn check_references(&self, root_name: &str, root: &NamedConfig) -> Result<()> {
        // Each frame is (config name, references still to visit).
        let mut stack: Vec<(String, Vec<String>)> = vec![(root_name.to_string(), reversed(root.references(&self.defaults)))];
        let mut done: HashSet<String> = HashSet::new();

        loop {
            let next = match stack.last_mut() {
                None => break,
                Some((_, pending)) => pending.pop(),
            };
            let Some(next) = next else {
                if let Some((finished, _)) = stack.pop() {
                    done.insert(finished);
                }
                continue;
            };

            if stack.iter().any(|(n, _)| *n == next) {
                let mut chain: Vec<String> = stack.iter().map(|(n, _)| n.clone()).collect();
                chain.push(next);
                return Err(Error::ConfigCycle { chain });
            }
            if done.contains(&next) {
                continue;
            }

            let referenced = self.parse(&next).await?;
            let refs = reversed(referenced.references(&self.defaults));
            stack.push((next, refs));
        }
        Ok(())
    }

    /// Search source for a tool. `None` selects the process-wide root index.
    pub async fn search_config(&self, name: Option<&str>) -> Result<SearchConfig> {
        match name {
            Some(name) => {
                let (doc, _) = self.document(name).await?;
                parse_search_config(name, &doc, &self.env)
            }
            None => self
                .defaults
                .search
                .clone()
                .ok_or_else(|| Error::config("no search source named and no root search index configured")),
        }
    }

    /// Store source for a tool. `None` selects the process-wide root store.
    pub async fn store_config(&self, name: Option<&str>) -> Result<StoreConfig> {
        match name {
            Some(name) => {
                let (doc, _) = self.document(name).await?;
                parse_store_config(name, &doc, &self.env)
            }
            None => self
                .defaults
                .store
                .clone()
                .ok_or_else(|| Error::config("no store source named and no root document store configured")),
        }
    }

    /// Drop the cached entry for `name`; the next lookup re-reads the tiers.
    pub async fn refresh(&self, name: &str) -> bool {
        self.cache.write().await.remove(name).is_some()
    }

    pub async fn refresh_all(&self) {
        let mut cache = self.cache.write().await;
        info!(entries = cache.len(), "Configuration cache cleared");
        cache.clear();
    }
}

fn reversed(mut v: Vec<String>) -> Vec<String> {
    v.reverse();
    v
}
