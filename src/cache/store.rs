//! Backing store abstraction.
//!
//! The backing store is the only state shared between web-serving processes and
//! workers. Every operation is atomic for a single key.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use super::error::StoreError;
use super::sync::mutex_lock;

const SOURCE: &str = "cache::store";

#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Overwrite `key`. A `ttl` makes the key expire; `None` keeps it until deleted.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>)
    -> Result<(), StoreError>;

    /// Store `value` only if `key` is currently absent (or expired).
    ///
    /// Returns `true` when this call created the key.
    async fn set_if_absent(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// Remove `key`. Deleting an absent key is not an error; the return value
    /// reports whether something was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// All live keys starting with `prefix`, in lexicographic order.
    async fn scan(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn new(value: Bytes, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| now < deadline)
    }
}

/// In-process backing store.
///
/// Suitable for a single node and for tests. Expiry is measured on tokio's clock,
/// so paused-time tests can advance past a TTL without sleeping.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, StoredEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        mutex_lock(&self.entries, SOURCE, "len")
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        mutex_lock(&self.entries, SOURCE, "set").insert(key.to_string(), StoredEntry::new(value, ttl));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "set_if_absent");
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(key.to_string(), StoredEntry::new(value, ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let removed = mutex_lock(&self.entries, SOURCE, "delete").remove(key);
        Ok(removed.is_some_and(|entry| entry.is_live(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let entries = mutex_lock(&self.entries, SOURCE, "scan");
        let keys = entries
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        Ok(keys)
    }
}
