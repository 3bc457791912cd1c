//! Networked adapter backed by Redis.
//!
//! Connections go through [`ConnectionManager`], which multiplexes one
//! connection and reconnects transparently. Pattern deletes use `SCAN` with a
//! cursor (never `KEYS`) and send all `DEL`s in a single pipeline.

use super::{pattern_prefix, Adapter};
use crate::error::ErrorContext;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::{ConnectionLike, ConnectionManager};
use std::time::Duration;
use tokio::sync::RwLock;

const SCAN_COUNT: usize = 500;

/// Connection parameters for [`RedisAdapter::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisAdapterConfig {
    /// `host:port`, or a full `redis://` / `rediss://` URL
    pub addr: String,
    pub password: Option<String>,
    /// Logical database index
    pub db: i64,
}

impl Default for RedisAdapterConfig {
    fn default() -> Self {
        Self {
            addr: "localhost:6379".to_string(),
            password: None,
            db: 0,
        }
    }
}

impl RedisAdapterConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// Render the connection URL understood by the redis client.
    pub fn to_url(&self) -> Result<url::Url> {
        let raw = if self.addr.contains("://") {
            self.addr.clone()
        } else {
            format!("redis://{}", self.addr)
        };
        let mut url = url::Url::parse(&raw).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid redis address: {}", e),
                ErrorContext::new()
                    .with_field_path("adapter.addr")
                    .with_details(self.addr.clone()),
            )
        })?;
        if let Some(ref password) = self.password {
            url.set_password(Some(password)).map_err(|_| {
                Error::configuration_with_context(
                    "redis address cannot carry credentials",
                    ErrorContext::new().with_field_path("adapter.password"),
                )
            })?;
        }
        if self.db != 0 {
            url.set_path(&format!("/{}", self.db));
        }
        Ok(url)
    }
}

pub struct RedisAdapter {
    conn: RwLock<Option<ConnectionManager>>,
}

impl RedisAdapter {
    /// Open a managed connection using `config`.
    pub async fn connect(config: RedisAdapterConfig) -> Result<Self> {
        let url = config.to_url()?;
        let client = redis::Client::open(url.as_str()).map_err(|e| {
            Error::configuration_with_context(
                e.to_string(),
                ErrorContext::new()
                    .with_field_path("adapter.addr")
                    .with_source("redis_adapter"),
            )
        })?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| transport(e, "connect"))?;
        tracing::info!(addr = %config.addr, db = config.db, "Connected redis adapter");
        Ok(Self::with_manager(manager))
    }

    /// Wrap a connection the caller already owns.
    pub fn with_manager(manager: ConnectionManager) -> Self {
        Self {
            conn: RwLock::new(Some(manager)),
        }
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        self.conn.read().await.clone().ok_or(Error::Closed)
    }
}

fn transport(err: redis::RedisError, op: &str) -> Error {
    Error::transport_with_context(
        err.to_string(),
        ErrorContext::new()
            .with_source("redis_adapter")
            .with_details(op.to_string()),
    )
}

/// Escape glob metacharacters so `SCAN MATCH` performs a literal prefix test.
pub(crate) fn escape_glob(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `GET key`, mapping a nil reply to [`Error::NotFound`].
async fn get_with<C>(conn: &mut C, key: &str) -> Result<Bytes>
where
    C: ConnectionLike + Send,
{
    let value: Option<Vec<u8>> = redis::cmd("GET")
        .arg(key)
        .query_async(conn)
        .await
        .map_err(|e| transport(e, "GET"))?;
    value.map(Bytes::from).ok_or_else(|| Error::not_found(key))
}

/// Scan every key matching `pattern` and delete them in one pipeline.
///
/// Keys queued before a scan failure are still deleted; the scan error is
/// returned afterwards. Returns the number of keys sent for deletion.
async fn delete_pattern_with<C>(conn: &mut C, pattern: &str) -> Result<usize>
where
    C: ConnectionLike + Send,
{
    let match_pattern = match pattern_prefix(pattern) {
        Some(prefix) => format!("{}*", escape_glob(prefix)),
        None => "*".to_string(),
    };

    let mut pipe = redis::pipe();
    let mut queued = 0usize;
    let mut cursor: u64 = 0;
    let mut scan_error = None;

    loop {
        let scanned: redis::RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(&match_pattern)
            .arg("COUNT")
            .arg(SCAN_COUNT)
            .query_async(conn)
            .await;
        match scanned {
            Ok((next, keys)) => {
                for key in keys {
                    pipe.cmd("DEL").arg(key).ignore();
                    queued += 1;
                }
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Err(e) => {
                scan_error = Some(e);
                break;
            }
        }
    }

    // Flush whatever was queued before reporting a scan failure.
    if queued > 0 {
        let flushed: redis::RedisResult<()> = pipe.query_async(conn).await;
        if let Err(e) = flushed {
            if let Some(ref scan) = scan_error {
                tracing::warn!(pattern, error = %scan, "SCAN failed mid-iteration");
            }
            return Err(transport(e, "DEL pipeline"));
        }
    }
    if let Some(e) = scan_error {
        tracing::warn!(pattern, flushed = queued, error = %e, "SCAN failed mid-iteration");
        return Err(transport(e, "SCAN"));
    }

    tracing::debug!(pattern, removed = queued, "Deleted keys by pattern");
    Ok(queued)
}

#[async_trait]
impl Adapter for RedisAdapter {
    async fn get(&self, key: &str) -> Result<Bytes> {
        let mut conn = self.connection().await?;
        get_with(&mut conn, key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value.as_ref());
        if !ttl.is_zero() {
            let millis = ttl.as_millis().clamp(1, u64::MAX as u128) as u64;
            cmd.arg("PX").arg(millis);
        }
        let _: () = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| transport(e, "SET"))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| transport(e, "DEL"))?;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        delete_pattern_with(&mut conn, pattern).await.map(|_| ())
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(|e| transport(e, "FLUSHDB"))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.conn.write().await.take().is_some() {
            tracing::info!("Redis adapter closed");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
