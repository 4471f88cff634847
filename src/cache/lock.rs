//! Lock Manager: exclusive write access to one cache key at a time.
//!
//! The lock is a `<key>:lock` marker in the backing store, set atomically with a
//! TTL. The TTL only recovers from crashed holders; a live holder always releases
//! explicitly through its [`LockGuard`].

use std::sync::Arc;

use bytes::Bytes;
use metrics::{counter, histogram};
use tokio::time::{Instant, sleep};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::config::{CacheConfig, LockClass, LockPolicy};
use super::error::StoreError;
use super::store::BackingStore;
use crate::domain::keys::CacheKey;

const METRIC_LOCK_WAIT_MS: &str = "tidecache_lock_wait_ms";
const METRIC_LOCK_LOST_TOTAL: &str = "tidecache_lock_lost_total";

#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn BackingStore>,
    standard: LockPolicy,
    checkins: LockPolicy,
}

impl LockManager {
    pub fn new(store: Arc<dyn BackingStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            standard: config.lock_policy(LockClass::Standard),
            checkins: config.lock_policy(LockClass::Checkins),
        }
    }

    pub fn policy(&self, key: &CacheKey) -> LockPolicy {
        match LockClass::of(key) {
            LockClass::Standard => self.standard,
            LockClass::Checkins => self.checkins,
        }
    }

    /// Block until `key` is exclusively held by the caller.
    ///
    /// Waiters poll at the key's retry interval; there is no fairness between them.
    #[instrument(level = "debug", skip(self), fields(key = %key))]
    pub async fn acquire(&self, key: &CacheKey) -> Result<LockGuard, StoreError> {
        let policy = self.policy(key);
        let lock_key = key.lock_key();
        let token = Uuid::new_v4().to_string();
        let started_at = Instant::now();
        let mut attempts: u64 = 0;

        loop {
            attempts += 1;
            let granted = self
                .store
                .set_if_absent(&lock_key, Bytes::from(token.clone()), Some(policy.ttl))
                .await?;
            if granted {
                histogram!(METRIC_LOCK_WAIT_MS)
                    .record(started_at.elapsed().as_secs_f64() * 1000.0);
                debug!(attempts, "Lock acquired");
                return Ok(self.guard(key, lock_key, token));
            }
            sleep(policy.retry_interval).await;
        }
    }

    /// Take the lock only if nobody holds it right now.
    #[instrument(level = "debug", skip(self), fields(key = %key))]
    pub async fn try_acquire(&self, key: &CacheKey) -> Result<Option<LockGuard>, StoreError> {
        let policy = self.policy(key);
        let lock_key = key.lock_key();
        let token = Uuid::new_v4().to_string();
        let granted = self
            .store
            .set_if_absent(&lock_key, Bytes::from(token.clone()), Some(policy.ttl))
            .await?;
        if granted {
            Ok(Some(self.guard(key, lock_key, token)))
        } else {
            debug!("Lock held elsewhere; skipping");
            Ok(None)
        }
    }

    /// Clear the lock marker regardless of who set it. Releasing a free key is a no-op.
    pub async fn release(&self, key: &CacheKey) -> Result<(), StoreError> {
        self.store.delete(&key.lock_key()).await.map(|_| ())
    }

    pub async fn is_locked(&self, key: &CacheKey) -> Result<bool, StoreError> {
        self.store.exists(&key.lock_key()).await
    }

    fn guard(&self, key: &CacheKey, lock_key: String, token: String) -> LockGuard {
        LockGuard {
            store: Arc::clone(&self.store),
            key: key.clone(),
            lock_key,
            token,
            released: false,
        }
    }
}

/// Scoped ownership of one key's lock.
///
/// Call [`LockGuard::release`] on every normal exit path. A guard dropped without
/// release (panic, cancelled future) schedules a best-effort release on the
/// current runtime.
#[must_use = "dropping the guard releases the lock in the background"]
pub struct LockGuard {
    store: Arc<dyn BackingStore>,
    key: CacheKey,
    lock_key: String,
    token: String,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Clear the marker. On error the guard falls back to its drop-time release.
    pub async fn release(mut self) -> Result<(), StoreError> {
        let current = self.store.get(&self.lock_key).await?;
        if current.as_deref() != Some(self.token.as_bytes()) {
            counter!(METRIC_LOCK_LOST_TOTAL).increment(1);
            warn!(
                key = %self.key,
                result = if current.is_some() { "taken_over" } else { "expired" },
                hint = "holder outlived the lock ttl; raise the ttl above the slowest computation",
                "Lock lost before release"
            );
        }

        self.store.delete(&self.lock_key).await?;
        self.released = true;
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                key = %self.key,
                result = "leaked",
                hint = "lock will be recovered after its ttl",
                "Lock guard dropped outside a runtime"
            );
            return;
        };
        let store = Arc::clone(&self.store);
        let lock_key = std::mem::take(&mut self.lock_key);
        let key = self.key.clone();
        handle.spawn(async move {
            if let Err(err) = store.delete(&lock_key).await {
                warn!(key = %key, error = %err, "Failed to release dropped lock guard");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::store::MemoryStore;
    use crate::domain::keys::RootKey;

    fn manager() -> (Arc<MemoryStore>, LockManager) {
        let store = Arc::new(MemoryStore::new());
        let locks = LockManager::new(store.clone(), &CacheConfig::default());
        (store, locks)
    }

    fn key() -> CacheKey {
        CacheKey::Root(RootKey::ProcessedFiles)
    }

    #[tokio::test]
    async fn acquire_then_release() {
        let (_, locks) = manager();
        let guard = locks.acquire(&key()).await.expect("acquire");
        assert!(locks.is_locked(&key()).await.expect("is_locked"));
        guard.release().await.expect("release");
        assert!(!locks.is_locked(&key()).await.expect("is_locked"));
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let (_, locks) = manager();
        locks.release(&key()).await.expect("release free key");
        locks.release(&key()).await.expect("release again");
    }

    #[tokio::test]
    async fn try_acquire_skips_when_held() {
        let (_, locks) = manager();
        let guard = locks.acquire(&key()).await.expect("acquire");
        assert!(locks.try_acquire(&key()).await.expect("try").is_none());
        guard.release().await.expect("release");
        let again = locks.try_acquire(&key()).await.expect("try");
        assert!(again.is_some());
        again.expect("guard").release().await.expect("release");
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_gets_lock_after_release() {
        let (_, locks) = manager();
        let guard = locks.acquire(&key()).await.expect("acquire");

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire(&key()).await.expect("acquire") })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!waiter.is_finished());

        guard.release().await.expect("release");
        let second = waiter.await.expect("join");
        second.release().await.expect("release");
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_holder_recovers_after_ttl() {
        let (store, locks) = manager();
        // A crashed holder leaves its marker behind.
        store
            .set(&key().lock_key(), Bytes::from_static(b"dead"), Some(Duration::from_secs(60)))
            .await
            .expect("set marker");

        let started = Instant::now();
        let guard = locks.acquire(&key()).await.expect("acquire");
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(60));
        assert!(waited < Duration::from_secs(61));
        guard.release().await.expect("release");
    }

    #[tokio::test]
    async fn checkins_use_shorter_ttl() {
        let (_, locks) = manager();
        let policy = locks.policy(&CacheKey::Root(RootKey::Checkins));
        assert_eq!(policy.ttl, Duration::from_secs(10));
        assert_eq!(locks.policy(&key()).ttl, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn dropped_guard_releases_in_background() {
        let (_, locks) = manager();
        let guard = locks.acquire(&key()).await.expect("acquire");
        drop(guard);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(!locks.is_locked(&key()).await.expect("is_locked"));
    }
}
