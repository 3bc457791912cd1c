//! Storage adapters: the key/value layer underneath the coherence engine.
//!
//! # Storage Adapters
//!
//! Every adapter offers the same small capability set: point reads and writes
//! with a TTL, idempotent deletes, prefix-pattern bulk eviction, a full clear,
//! and an explicit close that releases background tasks or connections.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Adapter`] | Trait implemented by every storage backend |
//! | [`MemoryAdapter`] | In-process map with lazy expiry and a background sweeper |
//! | [`NullAdapter`] | Always misses, never fails; disables caching without rewiring |
//! | `RedisAdapter` | Networked store reached through a connection manager (feature `redis`) |
//!
//! ## Patterns
//!
//! Patterns have the form `literalPrefix*`. Matching is a literal prefix test,
//! never a glob: `qcache:users:*` removes every key that starts with
//! `qcache:users:`, and a bare `*` removes everything.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryAdapter;
#[cfg(feature = "redis")]
pub use self::redis::{RedisAdapter, RedisAdapterConfig};

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

#[async_trait]
pub trait Adapter: Send + Sync {
    /// Fetch the payload stored at `key`.
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) for both absent and
    /// expired keys. Stale data is never returned.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Store `value` at `key`, replacing any previous entry.
    /// A zero `ttl` means the entry never expires.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Remove `key`. Absent keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every key matching a `literalPrefix*` pattern.
    async fn delete_pattern(&self, pattern: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    /// Release resources. Safe to call more than once.
    async fn close(&self) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Literal prefix of a `prefix*` pattern. `None` means "match everything".
///
/// A pattern without a trailing `*` is treated as an exact prefix as well.
pub(crate) fn pattern_prefix(pattern: &str) -> Option<&str> {
    let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
    if prefix.is_empty() {
        None
    } else {
        Some(prefix)
    }
}

pub(crate) fn matches_pattern(key: &str, pattern: &str) -> bool {
    match pattern_prefix(pattern) {
        Some(prefix) => key.starts_with(prefix),
        None => true,
    }
}

pub struct NullAdapter;

impl NullAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for NullAdapter {
    async fn get(&self, key: &str) -> Result<Bytes> {
        Err(crate::Error::not_found(key))
    }
    async fn set(&self, _: &str, _: Bytes, _: Duration) -> Result<()> {
        Ok(())
    }
    async fn delete(&self, _: &str) -> Result<()> {
        Ok(())
    }
    async fn delete_pattern(&self, _: &str) -> Result<()> {
        Ok(())
    }
    async fn clear(&self) -> Result<()> {
        Ok(())
    }
    async fn close(&self) -> Result<()> {
        Ok(())
    }
    fn name(&self) -> &'static str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_prefix() {
        assert_eq!(pattern_prefix("user:*"), Some("user:"));
        assert_eq!(pattern_prefix("*"), None);
        assert_eq!(pattern_prefix(""), None);
        assert_eq!(pattern_prefix("exact"), Some("exact"));
    }

    #[test]
    fn test_matching_is_literal() {
        assert!(matches_pattern("user:1", "user:*"));
        assert!(!matches_pattern("order:1", "user:*"));
        assert!(matches_pattern("anything", "*"));
        // glob metacharacters carry no meaning
        assert!(!matches_pattern("user:1", "u?er:*"));
        assert!(matches_pattern("u?er:1", "u?er:*"));
    }

    #[tokio::test]
    async fn test_null_adapter_always_misses() {
        let adapter = NullAdapter::new();
        adapter
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(adapter.get("k").await.unwrap_err().is_not_found());
        adapter.close().await.unwrap();
        adapter.close().await.unwrap();
    }
}
