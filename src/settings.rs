//! Declarative cache settings loaded from YAML or the environment.
//!
//! ```yaml
//! ttl_secs: 300
//! key_prefix: "qcache:"
//! cache_models: [User, Order]
//! invalidate_on_update: true
//! sweep_interval_secs: 60
//! adapter:
//!   kind: redis
//!   addr: "localhost:6379"
//!   db: 0
//! ```
//!
//! Settings cover the declarative subset of [`Config`]. Skip predicates and
//! key generators are code and must be added to the resulting config.

use crate::adapter::{Adapter, MemoryAdapter};
use crate::config::{Config, DEFAULT_KEY_PREFIX, DEFAULT_TTL};
use crate::error::ErrorContext;
use crate::serializer::JsonSerializer;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const ENV_TTL_SECS: &str = "QUERY_CACHE_TTL_SECS";
pub const ENV_KEY_PREFIX: &str = "QUERY_CACHE_KEY_PREFIX";
pub const ENV_MODELS: &str = "QUERY_CACHE_MODELS";
pub const ENV_REDIS_ADDR: &str = "QUERY_CACHE_REDIS_ADDR";
pub const ENV_REDIS_PASSWORD: &str = "QUERY_CACHE_REDIS_PASSWORD";
pub const ENV_REDIS_DB: &str = "QUERY_CACHE_REDIS_DB";
pub const ENV_SWEEP_INTERVAL_SECS: &str = "QUERY_CACHE_SWEEP_INTERVAL_SECS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterSettings {
    pub kind: AdapterKind,
    pub addr: Option<String>,
    pub password: Option<String>,
    pub db: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub key_prefix: String,
    pub cache_models: Vec<String>,
    pub invalidate_on_create: bool,
    pub invalidate_on_update: bool,
    pub invalidate_on_delete: bool,
    /// Sweep period of the in-memory adapter
    pub sweep_interval_secs: u64,
    pub adapter: AdapterSettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL.as_secs(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            cache_models: Vec::new(),
            invalidate_on_create: true,
            invalidate_on_update: true,
            invalidate_on_delete: true,
            sweep_interval_secs: crate::adapter::memory::DEFAULT_SWEEP_INTERVAL.as_secs(),
            adapter: AdapterSettings::default(),
        }
    }
}

impl CacheSettings {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "Loaded cache settings file");
        Self::from_yaml_str(&content)
    }

    /// Defaults overlaid with `QUERY_CACHE_*` environment variables.
    ///
    /// # Environment Variables
    /// - `QUERY_CACHE_TTL_SECS`: entry TTL (default: 300)
    /// - `QUERY_CACHE_KEY_PREFIX`: key prefix (default: `qcache:`)
    /// - `QUERY_CACHE_MODELS`: comma separated model allow-list (default: all)
    /// - `QUERY_CACHE_REDIS_ADDR`: selects the redis adapter at this address
    /// - `QUERY_CACHE_REDIS_PASSWORD`: redis credential
    /// - `QUERY_CACHE_REDIS_DB`: redis logical database (default: 0)
    /// - `QUERY_CACHE_SWEEP_INTERVAL_SECS`: in-memory sweep period (default: 60)
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Overlay values produced by `lookup` (keyed by variable name).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_TTL_SECS) {
            self.ttl_secs = parse_var(ENV_TTL_SECS, &v)?;
        }
        if let Some(v) = lookup(ENV_KEY_PREFIX) {
            self.key_prefix = v;
        }
        if let Some(v) = lookup(ENV_MODELS) {
            self.cache_models = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup(ENV_REDIS_ADDR) {
            self.adapter.kind = AdapterKind::Redis;
            self.adapter.addr = Some(v);
        }
        if let Some(v) = lookup(ENV_REDIS_PASSWORD) {
            self.adapter.password = Some(v);
        }
        if let Some(v) = lookup(ENV_REDIS_DB) {
            self.adapter.db = parse_var(ENV_REDIS_DB, &v)?;
        }
        if let Some(v) = lookup(ENV_SWEEP_INTERVAL_SECS) {
            self.sweep_interval_secs = parse_var(ENV_SWEEP_INTERVAL_SECS, &v)?;
        }
        Ok(self)
    }

    /// Build a [`Config`], connecting to the networked store if selected.
    pub async fn into_config(self) -> Result<Config<JsonSerializer>> {
        let adapter: Arc<dyn Adapter> = match self.adapter.kind {
            AdapterKind::Memory => Arc::new(self.memory_adapter()),
            AdapterKind::Redis => connect_redis(&self.adapter).await?,
        };

        Ok(Config {
            adapter: Some(adapter),
            ttl: Duration::from_secs(self.ttl_secs),
            cache_models: self.cache_models,
            invalidate_on_create: self.invalidate_on_create,
            invalidate_on_update: self.invalidate_on_update,
            invalidate_on_delete: self.invalidate_on_delete,
            key_prefix: self.key_prefix,
            skip_condition: None,
            key_generator: None,
            serializer: JsonSerializer,
        })
    }

    fn memory_adapter(&self) -> MemoryAdapter {
        MemoryAdapter::with_sweep_interval(Duration::from_secs(self.sweep_interval_secs))
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| {
        Error::configuration_with_context(
            format!("invalid value {:?}: {}", raw, e),
            ErrorContext::new().with_field_path(name.to_string()),
        )
    })
}

#[cfg(feature = "redis")]
async fn connect_redis(settings: &AdapterSettings) -> Result<Arc<dyn Adapter>> {
    use crate::adapter::{RedisAdapter, RedisAdapterConfig};

    let mut config = RedisAdapterConfig::default().with_db(settings.db);
    if let Some(ref addr) = settings.addr {
        config.addr = addr.clone();
    }
    config.password = settings.password.clone();
    Ok(Arc::new(RedisAdapter::connect(config).await?))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_: &AdapterSettings) -> Result<Arc<dyn Adapter>> {
    Err(Error::configuration_with_context(
        "redis adapter requires the `redis` feature",
        ErrorContext::new().with_field_path("adapter.kind"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_yaml_with_defaults() {
        let s = CacheSettings::from_yaml_str(
            "ttl_secs: 60\ncache_models: [User]\ninvalidate_on_create: false\n",
        )
        .unwrap();
        assert_eq!(s.ttl_secs, 60);
        assert_eq!(s.cache_models, vec!["User".to_string()]);
        assert!(!s.invalidate_on_create);
        assert!(s.invalidate_on_update);
        assert_eq!(s.key_prefix, "qcache:");
        assert_eq!(s.adapter.kind, AdapterKind::Memory);
    }

    #[test]
    fn test_yaml_adapter_section() {
        let s = CacheSettings::from_yaml_str(
            "adapter:\n  kind: redis\n  addr: \"cache:6379\"\n  db: 3\n",
        )
        .unwrap();
        assert_eq!(s.adapter.kind, AdapterKind::Redis);
        assert_eq!(s.adapter.addr.as_deref(), Some("cache:6379"));
        assert_eq!(s.adapter.db, 3);
    }

    #[test]
    fn test_yaml_rejects_unknown_kind() {
        let err = CacheSettings::from_yaml_str("adapter:\n  kind: memcached\n").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_TTL_SECS, "30"),
            (ENV_MODELS, "User, Order ,"),
            (ENV_REDIS_ADDR, "cache:6379"),
            (ENV_REDIS_DB, "2"),
        ]
        .into_iter()
        .collect();
        let s = CacheSettings::default()
            .with_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(s.ttl_secs, 30);
        assert_eq!(s.cache_models, vec!["User".to_string(), "Order".to_string()]);
        assert_eq!(s.adapter.kind, AdapterKind::Redis);
        assert_eq!(s.adapter.db, 2);
    }

    #[test]
    fn test_bad_number_names_the_variable() {
        let err = CacheSettings::default()
            .with_overrides(|name| (name == ENV_TTL_SECS).then(|| "soon".to_string()))
            .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some(ENV_TTL_SECS)
        );
    }

    #[test]
    fn test_missing_file() {
        let err = CacheSettings::from_path("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_huge_sweep_interval_from_env() {
        let max = u64::MAX.to_string();
        let s = CacheSettings::default()
            .with_overrides(|name| (name == ENV_SWEEP_INTERVAL_SECS).then(|| max.clone()))
            .unwrap();
        assert_eq!(s.sweep_interval_secs, u64::MAX);

        let memory = s.memory_adapter();
        assert_eq!(memory.sweep_interval(), crate::adapter::memory::MAX_SWEEP_INTERVAL);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(memory.sweeper_running());
        memory.close().await.unwrap();

        let cfg = s.into_config().await.unwrap();
        let adapter = cfg.adapter.unwrap();
        adapter
            .set("k", bytes::Bytes::from_static(b"v"), Duration::ZERO)
            .await
            .unwrap();
        assert!(adapter.get("k").await.is_ok());
        adapter.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_into_config_memory() {
        let s = CacheSettings::from_yaml_str("ttl_secs: 10\nkey_prefix: \"app:\"\n").unwrap();
        let cfg = s.into_config().await.unwrap();
        let adapter = cfg.adapter.as_ref().unwrap();
        assert_eq!(adapter.name(), "memory");
        assert_eq!(cfg.ttl, Duration::from_secs(10));
        assert_eq!(cfg.key_prefix, "app:");
        adapter.close().await.unwrap();
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_redis_without_feature() {
        let mut s = CacheSettings::default();
        s.adapter.kind = AdapterKind::Redis;
        assert!(s.into_config().await.is_err());
    }
}
