//! View Snapshot Cache: per-session frozen copies of root values.
//!
//! A view slot is seeded lazily from its root and then only changes when its
//! session commits a refresh. Recomputing the root never touches existing views.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, instrument};

use super::config::CacheConfig;
use super::error::StoreError;
use super::lock::LockManager;
use super::root::{RecomputeOutcome, RootCache};
use super::store::BackingStore;
use crate::domain::keys::{CacheKey, RootKey, ViewKey};
use crate::domain::session::SessionId;

#[derive(Clone)]
pub struct ViewCache {
    store: Arc<dyn BackingStore>,
    locks: LockManager,
    roots: RootCache,
    working_ttl: Duration,
}

impl ViewCache {
    pub fn new(
        store: Arc<dyn BackingStore>,
        locks: LockManager,
        roots: RootCache,
        config: &CacheConfig,
    ) -> Self {
        Self {
            store,
            locks,
            roots,
            working_ttl: config.working_ttl(),
        }
    }

    pub fn roots(&self) -> &RootCache {
        &self.roots
    }

    /// The session's snapshot of `root`, seeding it on first access.
    #[instrument(skip(self), fields(session = %session, root = %root))]
    pub async fn get_view(&self, session: &SessionId, root: RootKey) -> Result<Bytes, StoreError> {
        let view = ViewKey::new(session.clone(), root);
        let slot = CacheKey::from(view.clone()).to_string();

        if let Some(value) = self.store.get(&slot).await? {
            return Ok(value);
        }

        // Resolve the seed before taking the view lock so at most one lock is held.
        let seed = self.seed_value(root).await?;

        let key = CacheKey::from(view);
        let guard = self.locks.acquire(&key).await?;
        let seeded = self.seed_locked(&slot, seed).await;
        let released = guard.release().await;
        let value = seeded?;
        released?;
        Ok(value)
    }

    async fn seed_value(&self, root: RootKey) -> Result<Bytes, StoreError> {
        if let Some(value) = self.roots.peek(root).await? {
            return Ok(value);
        }
        debug!("Root never computed; computing synchronously for first view");
        match self.roots.recompute(root).await? {
            RecomputeOutcome::Committed(value) => Ok(value),
            RecomputeOutcome::NotDefined | RecomputeOutcome::Failed | RecomputeOutcome::Skipped => {
                self.roots.get(root).await
            }
        }
    }

    async fn seed_locked(&self, slot: &str, seed: Bytes) -> Result<Bytes, StoreError> {
        // A concurrent first read may have seeded while we waited.
        if let Some(existing) = self.store.get(slot).await? {
            return Ok(existing);
        }
        self.store.set(slot, seed.clone(), None).await?;
        debug!(bytes = seed.len(), "View seeded");
        Ok(seed)
    }

    /// Mark `view` as refreshing. Readers keep seeing the old snapshot.
    pub async fn begin_refresh(&self, view: &ViewKey) -> Result<(), StoreError> {
        let key = CacheKey::from(view.clone());
        self.store
            .set(&key.working_key(), Bytes::from_static(b"1"), Some(self.working_ttl))
            .await
    }

    /// Copy a freshly computed root value into `view` and clear its working flag.
    ///
    /// With `None` (the root had no computation, or another holder was already
    /// recomputing) the current root value is copied instead.
    #[instrument(skip(self, value), fields(view = %view))]
    pub async fn commit_refresh(
        &self,
        view: &ViewKey,
        value: Option<Bytes>,
    ) -> Result<(), StoreError> {
        let value = match value {
            Some(value) => value,
            None => self.roots.get(view.root).await?,
        };

        let key = CacheKey::from(view.clone());
        let guard = self.locks.acquire(&key).await?;
        let written = self.store.set(&key.to_string(), value, None).await;
        let cleared = self.store.delete(&key.working_key()).await;
        let released = guard.release().await;
        written?;
        cleared?;
        released?;
        debug!("View refresh committed");
        Ok(())
    }

    /// Clear the working flag of a refresh whose root recompute never completed.
    pub async fn abandon_refresh(&self, view: &ViewKey) -> Result<(), StoreError> {
        let key = CacheKey::from(view.clone());
        self.store.delete(&key.working_key()).await.map(|_| ())
    }

    pub async fn is_ready(&self, view: &ViewKey) -> Result<bool, StoreError> {
        let key = CacheKey::from(view.clone());
        Ok(!self.store.exists(&key.working_key()).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::cache::error::ResolveError;
    use crate::cache::root::SourceResolver;
    use crate::cache::store::MemoryStore;

    /// Answers `v0`, `v1`, ... on successive calls.
    #[derive(Default)]
    struct Versioned {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceResolver for Versioned {
        async fn resolve(&self, _key: RootKey) -> Result<Vec<u8>, ResolveError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("v{call}").into_bytes())
        }
    }

    fn views() -> (Arc<Versioned>, ViewCache) {
        let store = Arc::new(MemoryStore::new());
        let config = CacheConfig::default();
        let locks = LockManager::new(store.clone(), &config);
        let resolver = Arc::new(Versioned::default());
        let roots = RootCache::new(store.clone(), locks.clone(), resolver.clone(), &config);
        (resolver, ViewCache::new(store, locks, roots, &config))
    }

    fn session(id: &str) -> SessionId {
        SessionId::parse(id).expect("session id")
    }

    #[tokio::test]
    async fn first_view_computes_unset_root() {
        let (resolver, views) = views();
        let value = views
            .get_view(&session("a"), RootKey::ProcessedFiles)
            .await
            .expect("get_view");
        assert_eq!(value, Bytes::from_static(b"v0"));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);

        // A second session copies the now-set root without recomputing.
        let other = views
            .get_view(&session("b"), RootKey::ProcessedFiles)
            .await
            .expect("get_view");
        assert_eq!(other, Bytes::from_static(b"v0"));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn view_is_stable_across_root_recomputes() {
        let (_, views) = views();
        let s = session("a");
        let first = views.get_view(&s, RootKey::PendingFiles).await.expect("get");
        views.roots().recompute(RootKey::PendingFiles).await.expect("recompute");
        let second = views.get_view(&s, RootKey::PendingFiles).await.expect("get");
        assert_eq!(first, second);
        assert_eq!(
            views.roots().get(RootKey::PendingFiles).await.expect("root"),
            Bytes::from_static(b"v1")
        );
    }

    #[tokio::test]
    async fn refresh_lifecycle_toggles_readiness() {
        let (_, views) = views();
        let view = ViewKey::new(session("a"), RootKey::DiscoveredFiles);
        views.get_view(&view.session, view.root).await.expect("seed");

        views.begin_refresh(&view).await.expect("begin");
        assert!(!views.is_ready(&view).await.expect("ready"));

        views
            .commit_refresh(&view, Some(Bytes::from_static(b"piped")))
            .await
            .expect("commit");
        assert!(views.is_ready(&view).await.expect("ready"));
        assert_eq!(
            views.get_view(&view.session, view.root).await.expect("get"),
            Bytes::from_static(b"piped")
        );
    }

    #[tokio::test]
    async fn commit_without_value_copies_current_root() {
        let (_, views) = views();
        let view = ViewKey::new(session("a"), RootKey::DeletedFiles);
        views.get_view(&view.session, view.root).await.expect("seed");
        views.roots().recompute(RootKey::DeletedFiles).await.expect("recompute");

        views.begin_refresh(&view).await.expect("begin");
        views.commit_refresh(&view, None).await.expect("commit");
        assert_eq!(
            views.get_view(&view.session, view.root).await.expect("get"),
            Bytes::from_static(b"v1")
        );
    }

    #[tokio::test]
    async fn abandon_keeps_snapshot_and_clears_flag() {
        let (_, views) = views();
        let view = ViewKey::new(session("a"), RootKey::ProcessedFiles);
        let before = views.get_view(&view.session, view.root).await.expect("seed");

        views.begin_refresh(&view).await.expect("begin");
        views.abandon_refresh(&view).await.expect("abandon");
        assert!(views.is_ready(&view).await.expect("ready"));
        assert_eq!(
            views.get_view(&view.session, view.root).await.expect("get"),
            before
        );
    }
}
