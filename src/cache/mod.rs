//! # Response Cache Module
//!
//! Content-addressed memo of backend responses, keyed by a fingerprint of
//! the fully resolved request.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`RequestFingerprint`] | SHA-256 of the canonical (key-sorted) request JSON |
//! | [`FingerprintGenerator`] | Computes fingerprints, with optional salt |
//! | [`CacheBackend`] | Trait for byte-level storage |
//! | [`MemoryCache`] | In-process LRU, unbounded by default |
//! | [`DiskCache`] | One JSON file per entry, atomic rename on write |
//! | [`NullCache`] | Disables caching |
//! | [`CacheStore`] | Partitioned handle with hit/miss statistics |
//!
//! ## Example
//!
//! ```rust
//! use ai_dispatch::cache::{CacheStore, MemoryCache};
//! use std::sync::Arc;
//!
//! let store = CacheStore::new(Arc::new(MemoryCache::new()));
//! assert_eq!(store.stats().hits, 0);
//! ```
//!
//! Entries do not expire. A response stays cached even when a filter
//! rejects it in one dispatch round; another round may accept it.

mod backend;
mod key;
mod manager;

pub use backend::{CacheBackend, DiskCache, MemoryCache, NullCache, CACHE_DIR_ENV};
pub use key::{FingerprintGenerator, RequestFingerprint};
pub use manager::{CachePartition, CacheStats, CacheStore, CachedEntry};
pub(crate) use manager::timestamp;
