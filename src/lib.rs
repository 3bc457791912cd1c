//! # query-cache
//!
//! Cache-aside coherence layer for query results.
//!
//! The crate sits between a query-issuing host and its authoritative data
//! source. Reads are answered from a cache when a stored result exists, and
//! every write evicts the cached results of the model it touched.
//!
//! ## Overview
//!
//! - **Transparent reads**: [`CacheEngine::before_query`] fills the caller's
//!   destination on a hit so the source is never consulted; on a miss the
//!   result is stored by [`CacheEngine::after_query`]
//! - **Invalidation**: create/update/delete hooks evict all keys of a model
//!   with one prefix-pattern delete
//! - **Pluggable storage**: an in-process adapter with background expiry, a
//!   Redis adapter (feature `redis`), or any [`Adapter`] implementation
//! - **Best effort**: cache failures degrade performance, never correctness;
//!   they are logged through `tracing` and counted in [`CacheStats`]
//!
//! ## Quick Start
//!
//! ```rust
//! use query_cache::{CacheEngine, Config, ModelInfo, Statement};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! struct User;
//!
//! let engine = CacheEngine::new(Config::new());
//!
//! let mut stmt = Statement::query("SELECT name FROM users WHERE id = ?", Vec::<String>::new())
//!     .bind(7)
//!     .with_model(ModelInfo::of::<User>("users"));
//!
//! let lookup = engine.before_query(&mut stmt).await;
//! if !lookup.is_hit() {
//!     // run the real query here
//!     stmt.dest = vec!["ada".to_string()];
//!     stmt.rows_affected = 1;
//! }
//! engine.after_query(&mut stmt, lookup).await;
//! engine.close().await.ok();
//! # }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapter`] | Storage adapter trait and implementations |
//! | [`config`] | Cache policy and key/policy resolver |
//! | [`context`] | Request-scoped skip signal, cancellation and deadline |
//! | [`engine`] | Hook points, whole-call drivers and statistics |
//! | [`key`] | Fingerprints, cache keys and invalidation patterns |
//! | [`serializer`] | Result-set codecs |
//! | [`settings`] | YAML / environment settings |
//! | [`statement`] | The per-call statement handed to the engine |

pub mod adapter;
pub mod config;
pub mod context;
pub mod engine;
pub mod key;
pub mod serializer;
pub mod settings;
pub mod statement;

// Re-export main types for convenience
pub use adapter::{Adapter, MemoryAdapter, NullAdapter};
pub use config::Config;
pub use context::{CallContext, SkipSignal};
pub use engine::{CacheEngine, CacheStats, Lookup, MutationKind, Source};
pub use serializer::{JsonSerializer, Serializer};
pub use settings::CacheSettings;
pub use statement::{ModelInfo, QueryInfo, QueryResult, ResultShape, Statement, UpstreamError};

#[cfg(feature = "redis")]
pub use adapter::{RedisAdapter, RedisAdapterConfig};
#[cfg(feature = "bincode")]
pub use serializer::BincodeSerializer;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
