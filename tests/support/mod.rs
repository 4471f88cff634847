//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tidecache::application::pipeline::Pipeline;
use tidecache::application::runner::LocalTaskRunner;
use tidecache::application::service::CacheService;
use tidecache::cache::{
    BackingStore, CacheConfig, LivenessRegistry, LockManager, MemoryStore, ResolveError,
    RootCache, SourceResolver, Sweeper, ViewCache,
};
use tidecache::domain::dataset::{Dataset, Row};
use tidecache::domain::keys::RootKey;
use tidecache::domain::session::SessionId;

/// Dataset resolver that stamps each result with a call counter and records how
/// many resolutions overlap.
#[derive(Default)]
pub struct CountingResolver {
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub failing: AtomicBool,
}

impl CountingResolver {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn fail_from_now(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceResolver for CountingResolver {
    async fn resolve(&self, key: RootKey) -> Result<Vec<u8>, ResolveError> {
        if key == RootKey::Checkins {
            return Err(ResolveError::not_defined(key));
        }

        let version = self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(ResolveError::failed(key, "system of record unavailable"));
        }
        Ok(versioned(key, version).encode())
    }
}

/// A one-row dataset whose `id` cell carries `version`.
pub fn versioned(key: RootKey, version: usize) -> Dataset {
    let mut row = Row::new();
    row.insert("id".into(), json!(format!("v{version}")));
    row.insert("filename".into(), json!(format!("file-{version}.csv")));
    Dataset::with_rows(key, vec![row])
}

pub fn version_of(key: RootKey, bytes: &Bytes) -> String {
    let dataset = Dataset::decode(key, bytes).expect("dataset value");
    dataset.rows[0]["id"]
        .as_str()
        .expect("id cell")
        .to_string()
}

pub fn session(id: &str) -> SessionId {
    SessionId::parse(id).expect("session id")
}

pub struct Stack {
    pub store: Arc<MemoryStore>,
    pub config: CacheConfig,
    pub locks: LockManager,
    pub roots: RootCache,
    pub views: ViewCache,
    pub liveness: LivenessRegistry,
    pub sweeper: Sweeper,
    pub service: CacheService,
}

pub fn stack(resolver: Arc<dyn SourceResolver>, pending_dir: Option<PathBuf>) -> Stack {
    stack_with(CacheConfig::default(), resolver, pending_dir)
}

pub fn stack_with(
    config: CacheConfig,
    resolver: Arc<dyn SourceResolver>,
    pending_dir: Option<PathBuf>,
) -> Stack {
    let store = Arc::new(MemoryStore::new());
    let shared: Arc<dyn BackingStore> = store.clone();
    let locks = LockManager::new(shared.clone(), &config);
    let roots = RootCache::new(shared.clone(), locks.clone(), resolver, &config);
    let views = ViewCache::new(shared.clone(), locks.clone(), roots.clone(), &config);
    let liveness = LivenessRegistry::new(shared.clone(), locks.clone(), &config);
    let sweeper = Sweeper::new(shared, liveness.clone(), pending_dir);
    let runner = Arc::new(LocalTaskRunner::new(Pipeline::new(views.clone())));
    let service = CacheService::new(views.clone(), liveness.clone(), sweeper.clone(), runner);

    Stack {
        store,
        config,
        locks,
        roots,
        views,
        liveness,
        sweeper,
        service,
    }
}
