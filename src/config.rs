//! Cache policy and the key/policy resolver.
//!
//! A [`Config`] decides three things for every statement: whether its model
//! participates in caching, whether this particular call bypasses the cache,
//! and which key (or invalidation pattern) it maps to.

use crate::adapter::Adapter;
use crate::key;
use crate::serializer::{JsonSerializer, Serializer};
use crate::statement::{ModelInfo, QueryInfo, Statement};
use crate::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_KEY_PREFIX: &str = "qcache:";

/// Custom bypass rule. Returning `true` skips the cache.
pub type SkipPredicate = Arc<dyn Fn(&QueryInfo<'_>) -> bool + Send + Sync>;

/// Custom key scheme. The configured prefix is prepended to its output.
pub type KeyGenerator = Arc<dyn Fn(&QueryInfo<'_>) -> String + Send + Sync>;

pub struct Config<S = JsonSerializer> {
    /// Backing store; `None` lets [`CacheEngine::new`](crate::CacheEngine::new)
    /// create an in-memory adapter
    pub adapter: Option<Arc<dyn Adapter>>,
    pub ttl: Duration,
    /// Model identities allowed to cache; empty allows every model
    pub cache_models: Vec<String>,
    pub invalidate_on_create: bool,
    pub invalidate_on_update: bool,
    pub invalidate_on_delete: bool,
    pub key_prefix: String,
    pub skip_condition: Option<SkipPredicate>,
    pub key_generator: Option<KeyGenerator>,
    pub serializer: S,
}

impl Default for Config<JsonSerializer> {
    fn default() -> Self {
        Self {
            adapter: None,
            ttl: DEFAULT_TTL,
            cache_models: Vec::new(),
            invalidate_on_create: true,
            invalidate_on_update: true,
            invalidate_on_delete: true,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            skip_condition: None,
            key_generator: None,
            serializer: JsonSerializer,
        }
    }
}

impl Config<JsonSerializer> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: Serializer> Config<S> {
    pub fn with_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Allow caching for the model identified by `name`.
    pub fn with_cache_model(mut self, name: impl Into<String>) -> Self {
        self.cache_models.push(name.into());
        self
    }

    /// Allow caching for the Rust type `M` (see [`ModelInfo::of`]).
    pub fn cache_model<M: ?Sized + 'static>(self) -> Self {
        self.with_cache_model(std::any::type_name::<M>())
    }

    pub fn with_invalidate_on_create(mut self, enabled: bool) -> Self {
        self.invalidate_on_create = enabled;
        self
    }

    pub fn with_invalidate_on_update(mut self, enabled: bool) -> Self {
        self.invalidate_on_update = enabled;
        self
    }

    pub fn with_invalidate_on_delete(mut self, enabled: bool) -> Self {
        self.invalidate_on_delete = enabled;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_skip_condition<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&QueryInfo<'_>) -> bool + Send + Sync + 'static,
    {
        self.skip_condition = Some(Arc::new(predicate));
        self
    }

    pub fn with_key_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&QueryInfo<'_>) -> String + Send + Sync + 'static,
    {
        self.key_generator = Some(Arc::new(generator));
        self
    }

    /// Swap the codec, changing the config's serializer type.
    pub fn with_serializer<S2: Serializer>(self, serializer: S2) -> Config<S2> {
        Config {
            adapter: self.adapter,
            ttl: self.ttl,
            cache_models: self.cache_models,
            invalidate_on_create: self.invalidate_on_create,
            invalidate_on_update: self.invalidate_on_update,
            invalidate_on_delete: self.invalidate_on_delete,
            key_prefix: self.key_prefix,
            skip_condition: self.skip_condition,
            key_generator: self.key_generator,
            serializer,
        }
    }

    /// Zero TTL and empty prefix fall back to the defaults.
    pub(crate) fn normalized(mut self) -> Self {
        if self.ttl.is_zero() {
            self.ttl = DEFAULT_TTL;
        }
        if self.key_prefix.is_empty() {
            self.key_prefix = DEFAULT_KEY_PREFIX.to_string();
        }
        self
    }

    /// Whether statements against `model` participate in caching.
    ///
    /// An empty allow-list admits every model, but a statement without a
    /// model is never cached once a list is configured.
    pub fn should_cache_model(&self, model: Option<&ModelInfo>) -> bool {
        if self.cache_models.is_empty() {
            return true;
        }
        match model {
            Some(model) => self.cache_models.iter().any(|m| *m == model.name),
            None => false,
        }
    }

    /// Bypass decision for one call.
    ///
    /// Precedence: the context's skip signal (either value ends evaluation),
    /// then the custom predicate, then the statement's own override.
    pub fn should_skip_cache<T>(&self, stmt: &Statement<T>) -> bool {
        if let Some(skip) = stmt.context.skip_signal().as_option() {
            return skip;
        }
        if let Some(ref predicate) = self.skip_condition {
            if predicate(&stmt.info()) {
                return true;
            }
        }
        stmt.scope_override().unwrap_or(false)
    }

    pub fn generate_cache_key<T>(&self, stmt: &Statement<T>) -> Result<String> {
        let info = stmt.info();
        if let Some(ref generator) = self.key_generator {
            return Ok(format!("{}{}", self.key_prefix, generator(&info)));
        }
        let fingerprint = key::fingerprint(info.sql, info.params)?;
        Ok(key::compose_key(&self.key_prefix, info.table(), &fingerprint))
    }

    pub fn model_pattern(&self, model: Option<&ModelInfo>) -> String {
        key::model_pattern(&self.key_prefix, model.map(|m| m.table.as_str()))
    }
}

impl<S: Serializer> fmt::Debug for Config<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("adapter", &self.adapter.as_ref().map(|a| a.name()))
            .field("ttl", &self.ttl)
            .field("cache_models", &self.cache_models)
            .field("invalidate_on_create", &self.invalidate_on_create)
            .field("invalidate_on_update", &self.invalidate_on_update)
            .field("invalidate_on_delete", &self.invalidate_on_delete)
            .field("key_prefix", &self.key_prefix)
            .field("skip_condition", &self.skip_condition.is_some())
            .field("key_generator", &self.key_generator.is_some())
            .field("serializer", &self.serializer.name())
            .finish()
    }
}
