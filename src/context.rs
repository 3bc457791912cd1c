//! Request-scoped call context.
//!
//! The host passes a [`CallContext`] with every statement. It carries the
//! tri-state skip-cache signal, an optional cancellation token and deadline
//! honored by adapter calls, and free-form attributes that custom skip
//! predicates may inspect.

use crate::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Explicit per-call override of the cache bypass decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SkipSignal {
    #[default]
    Unset,
    /// Bypass the cache for this call.
    Skip,
    /// Use the cache even if a custom predicate would bypass it.
    NoSkip,
}

impl SkipSignal {
    /// `None` when unset, otherwise whether to skip.
    pub fn as_option(self) -> Option<bool> {
        match self {
            SkipSignal::Unset => None,
            SkipSignal::Skip => Some(true),
            SkipSignal::NoSkip => Some(false),
        }
    }
}

impl From<bool> for SkipSignal {
    fn from(skip: bool) -> Self {
        if skip {
            SkipSignal::Skip
        } else {
            SkipSignal::NoSkip
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallContext {
    skip: SkipSignal,
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
    values: HashMap<String, serde_json::Value>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for `with_skip_cache(true)`.
    pub fn skip_cache(self) -> Self {
        self.with_skip_cache(true)
    }

    pub fn with_skip_cache(mut self, skip: bool) -> Self {
        self.skip = SkipSignal::from(skip);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline `timeout` from now. A timeout too large to represent adds no
    /// deadline.
    pub fn with_timeout(self, timeout: std::time::Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn skip_signal(&self) -> SkipSignal {
        self.skip
    }

    pub fn value(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Drive `fut` while honoring this context's cancellation token and
    /// deadline.
    pub(crate) async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if matches!(self.deadline, Some(d) if d <= Instant::now()) {
            return Err(Error::Timeout);
        }

        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .map_err(|_| Error::Timeout)?,
                None => fut.await,
            }
        };

        match self.cancel {
            Some(ref token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(Error::Cancelled),
                result = bounded => result,
            },
            None => bounded.await,
        }
    }
}
