use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use ulid::Ulid;

use crate::observability::{CACHE_ERRORS_TOTAL, CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};

#[derive(Debug)]
pub struct CacheError(pub String);

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cache error: {}", self.0)
    }
}

impl std::error::Error for CacheError {}

/// Key/value store with per-entry TTL. Implemented in-process by
/// [`MemoryCache`]; an external store plugs in behind the same trait.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    /// Delete every key starting with `prefix`; returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError>;
}

pub fn appointment_key(company_id: Ulid, appointment_id: Ulid) -> String {
    format!("appointment:{company_id}:{appointment_id}")
}

pub fn appointment_list_prefix(company_id: Ulid, clinic_id: Ulid) -> String {
    format!("appointments:{company_id}:{clinic_id}:")
}

pub fn appointment_list_key(company_id: Ulid, clinic_id: Ulid, signature: &str) -> String {
    format!("{}{signature}", appointment_list_prefix(company_id, clinic_id))
}

#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, (Instant, Vec<u8>)>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries. Reads already ignore them; this only frees memory.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, (expires_at, _)| *expires_at > now);
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        if let Some(entry) = self.entries.get(key) {
            let (expires_at, value) = entry.value();
            if *expires_at > Instant::now() {
                return Ok(Some(value.clone()));
            }
        } else {
            return Ok(None);
        }
        // expired; the read guard is released above
        self.entries.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), (Instant::now() + ttl, value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()))
    }
}

/// Counter bumped by the notifier before every invalidation. A view loaded
/// while it moved may predate the mutation and must not stay cached.
#[derive(Debug, Default)]
pub struct InvalidationEpoch(AtomicU64);

impl InvalidationEpoch {
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Get-or-set wrapper for JSON-serializable read views.
///
/// Cache failures degrade to a miss: the loader runs and its result is
/// returned even if it cannot be stored.
#[derive(Clone)]
pub struct ViewCache {
    store: Arc<dyn CacheStore>,
    epoch: Arc<InvalidationEpoch>,
    ttl: Duration,
}

impl ViewCache {
    /// `epoch` must be the one the invalidating side bumps.
    pub fn new(store: Arc<dyn CacheStore>, epoch: Arc<InvalidationEpoch>, ttl: Duration) -> Self {
        Self { store, epoch, ttl }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub async fn get_or_set<T, E, F, Fut>(&self, key: &str, load: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let epoch = self.epoch.current();
        match self.store.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => {
                    metrics::counter!(CACHE_HITS_TOTAL).increment(1);
                    return Ok(value);
                }
                Err(e) => tracing::warn!(key, "discarding undecodable cache entry: {e}"),
            },
            Ok(None) => {}
            Err(e) => {
                metrics::counter!(CACHE_ERRORS_TOTAL, "op" => "get").increment(1);
                tracing::warn!(key, "cache read failed: {e}");
            }
        }
        metrics::counter!(CACHE_MISSES_TOTAL).increment(1);

        let value = load().await?;
        if self.epoch.current() != epoch {
            return Ok(value);
        }
        match serde_json::to_vec(&value) {
            Ok(bytes) => {
                if let Err(e) = self.store.set(key, bytes, self.ttl).await {
                    metrics::counter!(CACHE_ERRORS_TOTAL, "op" => "set").increment(1);
                    tracing::warn!(key, "cache write failed: {e}");
                } else if self.epoch.current() != epoch {
                    // an invalidation ran while the write was in flight
                    if let Err(e) = self.store.delete(key).await {
                        metrics::counter!(CACHE_ERRORS_TOTAL, "op" => "delete").increment(1);
                        tracing::warn!(key, "could not drop a possibly stale view: {e}");
                    }
                }
            }
            Err(e) => tracing::warn!(key, "cache encode failed: {e}"),
        }
        Ok(value)
    }
}

/// Store whose every operation fails, for exercising the degrade paths.
#[cfg(test)]
pub(crate) struct FailingStore;

#[cfg(test)]
#[async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Err(CacheError("store unavailable".into()))
    }
    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError("store unavailable".into()))
    }
    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError("store unavailable".into()))
    }
    async fn delete_prefix(&self, _prefix: &str) -> Result<usize, CacheError> {
        Err(CacheError("store unavailable".into()))
    }
}
