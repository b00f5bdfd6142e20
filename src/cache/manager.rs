//! Cache store: partitions, entries and statistics on top of a backend.

use super::backend::CacheBackend;
use super::key::RequestFingerprint;
use crate::types::LlmResponse;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async lock per partition seed.
type SeedLocks = std::sync::Mutex<HashMap<u64, Arc<Mutex<()>>>>;

/// A memoized response. Entries never expire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub response: LlmResponse,
    /// Cost at the time the live call was made.
    pub cost: f64,
    /// Unix seconds.
    pub stored_at: f64,
}

impl CachedEntry {
    pub fn new(response: LlmResponse, cost: f64) -> Self {
        Self {
            response,
            cost,
            stored_at: timestamp(),
        }
    }
}

pub(crate) fn timestamp() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Handle to a cache backend, cheap to clone and share between dispatchers.
///
/// A *shared* store (the default) treats `get` and `put` as independent atomic
/// operations: concurrent dispatches may both miss and both write the same
/// fingerprint, last write wins. An *exclusive* store serializes whole
/// lookup-then-write sequences per partition: [`CacheStore::acquire`] holds
/// that seed's lock until the returned [`CachePartition`] is dropped, while
/// other seeds stay available.
///
/// Entries never expire. The only way an entry leaves a store is an explicit
/// `clear`, or a backend that was built with a bound (such as
/// [`MemoryCache::with_capacity`](super::MemoryCache::with_capacity)) evicting it.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    stats: Arc<AtomicStats>,
    exclusive: Option<Arc<SeedLocks>>,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            stats: Arc::new(AtomicStats::default()),
            exclusive: None,
        }
    }

    /// Store whose partitions are held exclusively between acquire and release.
    pub fn exclusive(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            exclusive: Some(Arc::new(SeedLocks::default())),
            ..Self::new(backend)
        }
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive.is_some()
    }

    /// Acquire the partition for `seed`. Keys are namespaced `<seed>:<fingerprint>`.
    pub async fn acquire(&self, seed: u64) -> CachePartition {
        let guard = match &self.exclusive {
            Some(locks) => {
                let lock = locks
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .entry(seed)
                    .or_default()
                    .clone();
                Some(lock.lock_owned().await)
            }
            None => None,
        };
        CachePartition {
            store: self.clone(),
            seed,
            _guard: guard,
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Remove every entry from every partition.
    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await
    }

    pub async fn len(&self) -> Result<usize> {
        self.backend.len().await
    }
}

/// A named partition of a [`CacheStore`], held for one lookup-then-maybe-write
/// sequence. Dropping it releases the partition.
pub struct CachePartition {
    store: CacheStore,
    seed: u64,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl CachePartition {
    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn key(&self, fp: &RequestFingerprint) -> String {
        format!("{}:{}", self.seed, fp.as_str())
    }

    /// Look up an entry. Undecodable payloads count as a miss and an error.
    pub async fn get(&self, fp: &RequestFingerprint) -> Result<Option<CachedEntry>> {
        let stats = &self.store.stats;
        match self.store.backend.get(&self.key(fp)).await {
            Ok(Some(data)) => match serde_json::from_slice::<CachedEntry>(&data) {
                Ok(entry) => {
                    stats.hits.fetch_add(1, Ordering::Relaxed);
                    Ok(Some(entry))
                }
                Err(_) => {
                    stats.errors.fetch_add(1, Ordering::Relaxed);
                    stats.misses.fetch_add(1, Ordering::Relaxed);
                    Ok(None)
                }
            },
            Ok(None) => {
                stats.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => {
                stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub async fn put(&self, fp: &RequestFingerprint, entry: &CachedEntry) -> Result<()> {
        let data = serde_json::to_vec(entry)?;
        match self.store.backend.set(&self.key(fp), &data).await {
            Ok(()) => {
                self.store.stats.writes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.store.stats.errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }
}
