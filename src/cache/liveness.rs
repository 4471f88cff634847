//! Liveness Registry: which browsing sessions are still around.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use super::config::CacheConfig;
use super::error::CacheError;
use super::lock::LockManager;
use super::store::BackingStore;
use crate::domain::keys::{CacheKey, RootKey};
use crate::domain::registry::Registry;
use crate::domain::session::SessionId;

/// Current wall-clock time in unix seconds.
pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

#[derive(Clone)]
pub struct LivenessRegistry {
    store: Arc<dyn BackingStore>,
    locks: LockManager,
    window: Duration,
}

impl LivenessRegistry {
    pub fn new(store: Arc<dyn BackingStore>, locks: LockManager, config: &CacheConfig) -> Self {
        Self {
            store,
            locks,
            window: config.staleness_window(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record `session` as seen at `now`, pruning stale records first.
    #[instrument(level = "debug", skip(self), fields(session = %session))]
    pub async fn checkin(&self, session: &SessionId, now: i64) -> Result<(), CacheError> {
        let key = CacheKey::Root(RootKey::Checkins);
        let guard = self.locks.acquire(&key).await?;
        let written = self.upsert_locked(&key, session, now).await;
        let released = guard.release().await;
        written?;
        Ok(released?)
    }

    async fn upsert_locked(
        &self,
        key: &CacheKey,
        session: &SessionId,
        now: i64,
    ) -> Result<(), CacheError> {
        let slot = key.to_string();
        let mut registry = match self.store.get(&slot).await? {
            None => Registry::default(),
            Some(bytes) => Registry::decode(&bytes).unwrap_or_else(|err| {
                warn!(
                    error = %err,
                    result = "reset",
                    hint = "live sessions re-register on their next checkin",
                    "Discarding undecodable checkin registry"
                );
                Registry::default()
            }),
        };

        registry.upsert(session.clone(), now, self.window);
        debug!(entries = registry.len(), "Checkin recorded");
        let encoded = registry.encode()?;
        Ok(self.store.set(&slot, Bytes::from(encoded), None).await?)
    }

    /// Sessions whose last checkin is within the staleness window of `now`.
    ///
    /// Lock-free; an undecodable registry is an error so callers never act on an
    /// empty set by mistake.
    pub async fn valid_sessions(&self, now: i64) -> Result<BTreeSet<SessionId>, CacheError> {
        let slot = CacheKey::Root(RootKey::Checkins).to_string();
        let registry = match self.store.get(&slot).await? {
            None => Registry::default(),
            Some(bytes) => Registry::decode(&bytes)?,
        };
        Ok(registry.valid_sessions(now, self.window))
    }
}
