//! Coherence engine: the hook points a host calls around its queries.
//!
//! # Coherence Engine
//!
//! The engine implements cache-aside on top of a [`Config`]:
//!
//! | Hook | When the host calls it | What the engine does |
//! |------|------------------------|----------------------|
//! | [`CacheEngine::before_query`] | before executing a read | looks the statement up, fills `dest` on a hit |
//! | [`CacheEngine::after_query`] | after the read (executed or not) | restores the row count on a hit, stores the result on a miss |
//! | [`CacheEngine::after_create`] | after an insert | evicts the model's keys |
//! | [`CacheEngine::after_update`] | after an update | evicts the model's keys |
//! | [`CacheEngine::after_delete`] | after a delete | evicts the model's keys |
//!
//! Hosts that do not have their own callback chain can implement [`Source`]
//! and use [`CacheEngine::query`] / [`CacheEngine::mutate`], which wire the
//! hooks around a single execution.
//!
//! Cache failures never reach the caller. Misses, unreachable stores, codec
//! failures, timeouts and cancellations all fall through to the source of
//! truth on reads and are logged and counted on writes. The only failure a
//! caller ever sees is the one its own source put on the statement.

mod stats;

pub use stats::CacheStats;

use crate::adapter::MemoryAdapter;
use crate::config::Config;
use crate::serializer::{JsonSerializer, Serializer};
use crate::statement::{QueryResult, Statement, UpstreamError};
use crate::{Adapter, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use stats::AtomicStats;
use std::sync::Arc;

/// Outcome of [`CacheEngine::before_query`], handed back to
/// [`CacheEngine::after_query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// The source must execute the read.
    Proceeded,
    /// `dest` was filled from the cache; the source must not execute.
    ShortCircuited { rows: u64 },
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::ShortCircuited { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }
}

fn default_adapter() -> Arc<dyn Adapter> {
    Arc::new(MemoryAdapter::new())
}

/// The authoritative data source.
///
/// `execute` fills `dest` and `rows_affected` on success. A returned error is
/// stored on the statement as its upstream failure.
#[async_trait]
pub trait Source<T: Send>: Send + Sync {
    async fn execute(&self, stmt: &mut Statement<T>) -> std::result::Result<(), UpstreamError>;
}

pub struct CacheEngine<S: Serializer = JsonSerializer> {
    config: Config<S>,
    adapter: Arc<dyn Adapter>,
    stats: Arc<AtomicStats>,
}

impl<S: Serializer> CacheEngine<S> {
    /// Build an engine. A config without an adapter gets a fresh
    /// [`MemoryAdapter`].
    pub fn new(config: Config<S>) -> Self {
        let mut config = config.normalized();
        let adapter = Arc::clone(config.adapter.get_or_insert_with(default_adapter));
        tracing::debug!(
            adapter = adapter.name(),
            serializer = config.serializer.name(),
            ttl_secs = config.ttl.as_secs(),
            prefix = %config.key_prefix,
            "Query cache engine created"
        );
        Self {
            config,
            adapter,
            stats: Arc::new(AtomicStats::default()),
        }
    }

    pub fn config(&self) -> &Config<S> {
        &self.config
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    /// Try to satisfy a read from the cache.
    ///
    /// On a hit `dest` holds the cached result and the host must skip
    /// execution. The returned [`Lookup`] must be passed to
    /// [`after_query`](Self::after_query).
    pub async fn before_query<T>(&self, stmt: &mut Statement<T>) -> Lookup
    where
        T: DeserializeOwned + QueryResult,
    {
        if stmt.has_error() {
            return Lookup::Proceeded;
        }
        if self.config.should_skip_cache(stmt) || !self.config.should_cache_model(stmt.model()) {
            return Lookup::Proceeded;
        }
        if stmt.build_sql().is_empty() {
            return Lookup::Proceeded;
        }

        let key = match self.config.generate_cache_key(stmt) {
            Ok(key) => key,
            Err(e) => {
                self.absorb(&e, "key derivation");
                return Lookup::Proceeded;
            }
        };

        let fetched = stmt.context.guard(self.adapter.get(&key)).await;
        match fetched {
            Ok(bytes) => match self.config.serializer.unmarshal::<T>(&bytes) {
                Ok(value) => {
                    stmt.dest = value;
                    let rows = stmt.dest.shape().row_count();
                    AtomicStats::bump(&self.stats.hits);
                    tracing::debug!(key = %key, rows, "Query cache hit");
                    Lookup::ShortCircuited { rows }
                }
                Err(e) => {
                    // Let the fresh result overwrite the unreadable payload.
                    self.absorb(&e, "decode");
                    stmt.remember_key(key);
                    Lookup::Proceeded
                }
            },
            Err(e) => {
                if e.is_not_found() {
                    AtomicStats::bump(&self.stats.misses);
                    tracing::debug!(key = %key, "Query cache miss");
                } else {
                    self.absorb(&e, "get");
                }
                stmt.remember_key(key);
                Lookup::Proceeded
            }
        }
    }

    /// Finish a read started with [`before_query`](Self::before_query).
    pub async fn after_query<T>(&self, stmt: &mut Statement<T>, lookup: Lookup)
    where
        T: Serialize,
    {
        let key = stmt.take_key();
        if let Lookup::ShortCircuited { rows } = lookup {
            stmt.rows_affected = rows;
            return;
        }
        if stmt.has_error() {
            return;
        }
        if self.config.should_skip_cache(stmt) || !self.config.should_cache_model(stmt.model()) {
            return;
        }
        let Some(key) = key else {
            return;
        };
        if stmt.rows_affected == 0 {
            tracing::debug!(key = %key, "Empty result not cached");
            return;
        }

        let payload = match self.config.serializer.marshal(&stmt.dest) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                self.absorb(&e, "encode");
                return;
            }
        };
        let stored = stmt
            .context
            .guard(self.adapter.set(&key, payload, self.config.ttl))
            .await;
        match stored {
            Ok(()) => {
                AtomicStats::bump(&self.stats.stores);
                tracing::debug!(key = %key, rows = stmt.rows_affected, "Query result cached");
            }
            Err(e) => self.absorb(&e, "set"),
        }
    }

    pub async fn after_create<T>(&self, stmt: &Statement<T>) {
        self.invalidate(MutationKind::Create, stmt).await
    }

    pub async fn after_update<T>(&self, stmt: &Statement<T>) {
        self.invalidate(MutationKind::Update, stmt).await
    }

    pub async fn after_delete<T>(&self, stmt: &Statement<T>) {
        self.invalidate(MutationKind::Delete, stmt).await
    }

    /// Evict every cached read for the statement's model after a mutation.
    pub async fn invalidate<T>(&self, kind: MutationKind, stmt: &Statement<T>) {
        let enabled = match kind {
            MutationKind::Create => self.config.invalidate_on_create,
            MutationKind::Update => self.config.invalidate_on_update,
            MutationKind::Delete => self.config.invalidate_on_delete,
        };
        if !enabled || stmt.has_error() || !self.config.should_cache_model(stmt.model()) {
            return;
        }

        let pattern = self.config.model_pattern(stmt.model());
        let evicted = stmt
            .context
            .guard(self.adapter.delete_pattern(&pattern))
            .await;
        match evicted {
            Ok(()) => {
                AtomicStats::bump(&self.stats.invalidations);
                tracing::debug!(pattern = %pattern, mutation = kind.as_str(), "Invalidated cached queries");
            }
            Err(e) => self.absorb(&e, kind.as_str()),
        }
    }

    /// Run a read through the cache: lookup, execution on a miss, store.
    ///
    /// A source failure is left on `stmt.error`.
    pub async fn query<T, Src>(&self, stmt: &mut Statement<T>, source: &Src) -> Lookup
    where
        T: Serialize + DeserializeOwned + QueryResult + Send,
        Src: Source<T> + ?Sized,
    {
        let lookup = self.before_query(stmt).await;
        if !lookup.is_hit() && !stmt.has_error() {
            if let Err(e) = source.execute(stmt).await {
                stmt.error = Some(e);
            }
        }
        self.after_query(stmt, lookup).await;
        lookup
    }

    /// Run a mutation through the source, then invalidate its model.
    pub async fn mutate<T, Src>(&self, kind: MutationKind, stmt: &mut Statement<T>, source: &Src)
    where
        T: Send,
        Src: Source<T> + ?Sized,
    {
        if !stmt.has_error() {
            stmt.build_sql();
            if let Err(e) = source.execute(stmt).await {
                stmt.error = Some(e);
            }
        }
        self.invalidate(kind, stmt).await
    }

    /// Drop every entry in the underlying store.
    pub async fn clear(&self) -> Result<()> {
        self.adapter.clear().await
    }

    pub async fn close(&self) -> Result<()> {
        self.adapter.close().await
    }

    fn absorb(&self, err: &crate::Error, op: &str) {
        AtomicStats::bump(&self.stats.errors);
        tracing::warn!(
            adapter = self.adapter.name(),
            op,
            error = %err,
            "Query cache failure absorbed"
        );
    }
}
