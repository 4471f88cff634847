//! Root Cache: the shared, recomputable value of each root key.
//!
//! Reads never lock. `recompute` is the only writer and runs entirely under the
//! key's lock: set `<key>:working`, resolve, commit, clear `<key>:working`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use metrics::{counter, histogram};
use tracing::{debug, error, info, instrument, warn};

use super::config::CacheConfig;
use super::error::{ResolveError, StoreError};
use super::lock::{LockGuard, LockManager};
use super::store::BackingStore;
use crate::domain::keys::{CacheKey, KeyClass, RootKey};

const METRIC_RECOMPUTE_MS: &str = "tidecache_recompute_ms";
const METRIC_RECOMPUTE_FAILED_TOTAL: &str = "tidecache_recompute_failed_total";

/// Computes the authoritative serialized value of a root key from the system of
/// record.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(&self, key: RootKey) -> Result<Vec<u8>, ResolveError>;
}

/// Result of one `recompute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecomputeOutcome {
    /// A new value was committed.
    Committed(Bytes),
    /// The resolver has no computation for this key; nothing changed.
    NotDefined,
    /// The resolver failed; the previous value stays authoritative.
    Failed,
    /// Another holder owned the lock and the caller asked not to wait.
    Skipped,
}

impl RecomputeOutcome {
    pub fn committed_value(&self) -> Option<&Bytes> {
        match self {
            RecomputeOutcome::Committed(value) => Some(value),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RecomputeOutcome::Committed(_) => "committed",
            RecomputeOutcome::NotDefined => "not_defined",
            RecomputeOutcome::Failed => "failed",
            RecomputeOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Clone)]
pub struct RootCache {
    store: Arc<dyn BackingStore>,
    locks: LockManager,
    resolver: Arc<dyn SourceResolver>,
    working_ttl: Duration,
}

impl RootCache {
    pub fn new(
        store: Arc<dyn BackingStore>,
        locks: LockManager,
        resolver: Arc<dyn SourceResolver>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            store,
            locks,
            resolver,
            working_ttl: config.working_ttl(),
        }
    }

    /// Last committed value, or the key's documented default.
    pub async fn get(&self, key: RootKey) -> Result<Bytes, StoreError> {
        Ok(self
            .peek(key)
            .await?
            .unwrap_or_else(|| Bytes::from(key.default_value())))
    }

    /// Last committed value, `None` if the key has never been computed.
    pub async fn peek(&self, key: RootKey) -> Result<Option<Bytes>, StoreError> {
        self.store.get(CacheKey::Root(key).to_string().as_str()).await
    }

    pub async fn is_ready(&self, key: RootKey) -> Result<bool, StoreError> {
        let working = self.store.exists(&CacheKey::Root(key).working_key()).await?;
        Ok(!working)
    }

    /// Recompute `key`, waiting for the lock if another holder is busy.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn recompute(&self, key: RootKey) -> Result<RecomputeOutcome, StoreError> {
        if let Some(outcome) = Self::short_circuit(key) {
            return Ok(outcome);
        }
        let guard = self.locks.acquire(&CacheKey::Root(key)).await?;
        self.recompute_locked(key, guard).await
    }

    /// Recompute `key` unless someone already holds its lock.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn recompute_if_unlocked(
        &self,
        key: RootKey,
    ) -> Result<RecomputeOutcome, StoreError> {
        if let Some(outcome) = Self::short_circuit(key) {
            return Ok(outcome);
        }
        match self.locks.try_acquire(&CacheKey::Root(key)).await? {
            Some(guard) => self.recompute_locked(key, guard).await,
            None => {
                debug!("Recompute already in flight; skipped");
                Ok(RecomputeOutcome::Skipped)
            }
        }
    }

    // The registry is written by checkins, never by a resolver.
    fn short_circuit(key: RootKey) -> Option<RecomputeOutcome> {
        match key.class() {
            KeyClass::Registry => Some(RecomputeOutcome::NotDefined),
            KeyClass::Dataset => None,
        }
    }

    async fn recompute_locked(
        &self,
        key: RootKey,
        guard: LockGuard,
    ) -> Result<RecomputeOutcome, StoreError> {
        let cache_key = CacheKey::Root(key);
        let flag = WorkingFlag {
            store: Arc::clone(&self.store),
            working_key: cache_key.working_key(),
            guard: Some(guard),
        };

        let result = self.resolve_and_commit(key, &cache_key, &flag.working_key).await;
        let finished = flag.finish().await;

        let outcome = result?;
        finished?;
        Ok(outcome)
    }

    async fn resolve_and_commit(
        &self,
        key: RootKey,
        cache_key: &CacheKey,
        working_key: &str,
    ) -> Result<RecomputeOutcome, StoreError> {
        self.store
            .set(working_key, Bytes::from_static(b"1"), Some(self.working_ttl))
            .await?;

        let started_at = Instant::now();
        let resolved = self.resolver.resolve(key).await;
        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;

        let outcome = match resolved {
            Ok(value) => {
                let value = Bytes::from(value);
                self.store
                    .set(&cache_key.to_string(), value.clone(), None)
                    .await?;
                info!(bytes = value.len(), elapsed_ms, "Root value committed");
                RecomputeOutcome::Committed(value)
            }
            Err(ResolveError::NotDefined { .. }) => {
                debug!("No computation defined; recompute is a no-op");
                RecomputeOutcome::NotDefined
            }
            Err(err @ ResolveError::Failed { .. }) => {
                counter!(METRIC_RECOMPUTE_FAILED_TOTAL, "key" => key.as_str()).increment(1);
                error!(error = %err, elapsed_ms, "Recompute failed; keeping last good value");
                RecomputeOutcome::Failed
            }
        };

        histogram!(METRIC_RECOMPUTE_MS, "key" => key.as_str(), "outcome" => outcome.label())
            .record(elapsed_ms);

        Ok(outcome)
    }
}

/// The `<key>:working` marker of a running recompute, paired with the key's lock.
///
/// [`WorkingFlag::finish`] clears the marker, then releases the lock. Dropped
/// unfinished (the caller's future was cancelled), it does the same in a spawned
/// task, so the flag never outlives the work.
struct WorkingFlag {
    store: Arc<dyn BackingStore>,
    working_key: String,
    guard: Option<LockGuard>,
}

impl WorkingFlag {
    async fn finish(mut self) -> Result<(), StoreError> {
        let cleared = self.store.delete(&self.working_key).await;
        let released = match self.guard.take() {
            Some(guard) => guard.release().await,
            None => Ok(()),
        };
        cleared?;
        released
    }
}

impl Drop for WorkingFlag {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                key = %self.working_key,
                result = "leaked",
                hint = "working flag will be recovered after its ttl",
                "Recompute dropped outside a runtime"
            );
            return;
        };
        let store = Arc::clone(&self.store);
        let working_key = std::mem::take(&mut self.working_key);
        handle.spawn(async move {
            warn!(key = %working_key, "Recompute cancelled; clearing working flag");
            if let Err(err) = store.delete(&working_key).await {
                warn!(key = %working_key, error = %err, "Failed to clear abandoned working flag");
            }
            if let Err(err) = guard.release().await {
                warn!(key = %working_key, error = %err, "Failed to release lock of cancelled recompute");
            }
        });
    }
}
