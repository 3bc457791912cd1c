//! In-process adapter backed by a `HashMap` behind a reader/writer lock.

use super::{matches_pattern, pattern_prefix, Adapter};
use crate::error::ErrorContext;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};

/// Default period between two sweeps of expired entries.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Longest accepted sweep period; larger requests are clamped to it.
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone)]
struct CacheEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: Bytes, ttl: Duration) -> Self {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Instant::now().checked_add(ttl)
        };
        Self { value, expires_at }
    }

    fn is_expired_at(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }
}

type Entries = Arc<RwLock<HashMap<String, CacheEntry>>>;

/// In-memory adapter.
///
/// Reads take the shared lock and treat expired entries as absent. Writes,
/// pattern deletes and the background sweep take the exclusive lock. The
/// sweeper is started at construction when a tokio runtime is available and
/// stopped by [`Adapter::close`] or on drop.
pub struct MemoryAdapter {
    entries: Entries,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    sweeper: Option<JoinHandle<()>>,
    sweep_interval: Duration,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    /// Create an adapter whose sweeper runs every `sweep_interval`.
    /// A zero interval falls back to [`DEFAULT_SWEEP_INTERVAL`]; anything above
    /// [`MAX_SWEEP_INTERVAL`] is clamped.
    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        let sweep_interval = if sweep_interval.is_zero() {
            DEFAULT_SWEEP_INTERVAL
        } else if sweep_interval > MAX_SWEEP_INTERVAL {
            tracing::warn!(
                requested_secs = sweep_interval.as_secs(),
                max_secs = MAX_SWEEP_INTERVAL.as_secs(),
                "Sweep interval too large, clamping"
            );
            MAX_SWEEP_INTERVAL
        } else {
            sweep_interval
        };
        let entries: Entries = Arc::new(RwLock::new(HashMap::new()));

        let (shutdown, sweeper) = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let (tx, rx) = watch::channel(false);
                let task = handle.spawn(sweep_task(Arc::clone(&entries), sweep_interval, rx));
                (Some(tx), Some(task))
            }
            Err(_) => {
                tracing::warn!(
                    "No tokio runtime available; memory adapter will rely on lazy expiry only"
                );
                (None, None)
            }
        };

        Self {
            entries,
            shutdown: Mutex::new(shutdown),
            sweeper,
            sweep_interval,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Whether the background sweeper task is alive.
    pub fn sweeper_running(&self) -> bool {
        self.sweeper.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Run one sweep now and return how many entries were reclaimed.
    pub fn purge_expired(&self) -> Result<usize> {
        let mut entries = self.write()?;
        Ok(remove_expired(&mut entries))
    }

    /// Number of physically present entries, expired ones included.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries.read().map_err(|e| poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries.write().map_err(|e| poisoned(e.to_string()))
    }

    fn stop_sweeper(&self) {
        let sender = match self.shutdown.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(tx) = sender {
            let _ = tx.send(true);
            tracing::info!("Memory adapter sweeper stopped");
        }
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryAdapter {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

fn poisoned(message: String) -> Error {
    Error::runtime_with_context(
        format!("cache lock poisoned: {}", message),
        ErrorContext::new().with_source("memory_adapter"),
    )
}

fn remove_expired(entries: &mut HashMap<String, CacheEntry>) -> usize {
    let now = Instant::now();
    let before = entries.len();
    entries.retain(|_, e| !e.is_expired_at(now));
    before - entries.len()
}

async fn sweep_task(entries: Entries, period: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    let now = tokio::time::Instant::now();
    let mut ticker = interval_at(now.checked_add(period).unwrap_or(now), period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(interval_ms = period.as_millis() as u64, "Memory adapter sweeper started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let removed = match entries.write() {
                    Ok(mut guard) => remove_expired(&mut guard),
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping sweep, cache lock poisoned");
                        continue;
                    }
                };
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired cache entries");
                } else {
                    tracing::trace!("Sweep found no expired entries");
                }
            }
        }
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn get(&self, key: &str) -> Result<Bytes> {
        let entries = self.read()?;
        match entries.get(key) {
            Some(entry) if !entry.is_expired_at(Instant::now()) => Ok(entry.value.clone()),
            _ => Err(Error::not_found(key)),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.write()?
            .insert(key.to_string(), CacheEntry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.write()?.remove(key);
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<()> {
        let mut entries = self.write()?;
        if pattern_prefix(pattern).is_none() {
            entries.clear();
            return Ok(());
        }
        let doomed: Vec<String> = entries
            .keys()
            .filter(|k| matches_pattern(k, pattern))
            .cloned()
            .collect();
        for key in &doomed {
            entries.remove(key);
        }
        tracing::debug!(pattern, removed = doomed.len(), "Deleted keys by pattern");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.write()?.clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.stop_sweeper();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
