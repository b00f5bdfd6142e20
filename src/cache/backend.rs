//! Cache backend implementations.
//!
//! Backends store opaque bytes under string keys. Entries never expire;
//! removal is an explicit `delete`/`clear`.

use crate::error::{Error, ErrorContext};
use crate::Result;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Environment variable for the disk cache root.
pub const CACHE_DIR_ENV: &str = "AI_DISPATCH_CACHE_DIR";
const DEFAULT_CACHE_DIR: &str = ".cache";

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn clear(&self) -> Result<()>;
    async fn len(&self) -> Result<usize>;
    fn name(&self) -> &'static str;
}

fn cache_error(backend: &str, msg: impl Into<String>) -> Error {
    Error::cache_with_context(msg, ErrorContext::new().with_source(backend.to_string()))
}

/// In-memory store. Unbounded by default, so entries stay until cleared.
///
/// [`MemoryCache::with_capacity`] opts into LRU eviction for long-running
/// processes that cannot hold every response.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
        }
    }

    /// Bounded variant: evicts the least recently used entry past
    /// `max_entries` (min 1), so an evicted request is called live again.
    pub fn with_capacity(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LruCache<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| cache_error("memory_cache", "cache lock poisoned"))
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }
    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.lock()?.put(key.to_string(), value.to_vec());
        Ok(())
    }
    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.pop(key).is_some())
    }
    async fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }
    async fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }
    fn name(&self) -> &'static str {
        "memory"
    }
}

/// One JSON file per key under a root directory.
///
/// A key `<partition>:<id>` is stored at `<root>/<partition>/<id>.json`.
/// Writes land in a temp file that is renamed into place, so concurrent
/// writers of the same key resolve last-write-wins and readers never see
/// a partial file.
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root from `AI_DISPATCH_CACHE_DIR`, default `.cache`.
    pub fn from_env() -> Self {
        let root = std::env::var(CACHE_DIR_ENV).unwrap_or_else(|_| DEFAULT_CACHE_DIR.to_string());
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        match key.split_once(':') {
            Some((partition, id)) => self
                .root
                .join(sanitize(partition))
                .join(format!("{}.json", sanitize(id))),
            None => self.root.join(format!("{}.json", sanitize(key))),
        }
    }

    async fn io<T>(&self, op: &str, fut: impl std::future::Future<Output = std::io::Result<T>>) -> Result<T> {
        fut.await.map_err(|e| {
            Error::cache_with_context(
                format!("disk cache {} failed: {}", op, e),
                ErrorContext::new()
                    .with_field_path(self.root.display().to_string())
                    .with_source("disk_cache"),
            )
        })
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl CacheBackend for DiskCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(cache_error("disk_cache", format!("read failed: {}", e))),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(dir) = path.parent() {
            self.io("mkdir", tokio::fs::create_dir_all(dir)).await?;
        }
        let tmp = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4().simple()));
        self.io("write", tokio::fs::write(&tmp, value)).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(cache_error("disk_cache", format!("rename failed: {}", e)));
        }
        debug!(path = %path.display(), bytes = value.len(), "disk cache write");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(cache_error("disk_cache", format!("delete failed: {}", e))),
        }
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(cache_error("disk_cache", format!("clear failed: {}", e))),
        }
    }

    async fn len(&self) -> Result<usize> {
        let mut count = 0;
        let mut dirs = vec![self.root.clone()];
        while let Some(dir) = dirs.pop() {
            let mut rd = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(cache_error("disk_cache", format!("list failed: {}", e))),
            };
            while let Some(entry) = self.io("list", rd.next_entry()).await? {
                let path = entry.path();
                if self.io("stat", entry.file_type()).await?.is_dir() {
                    dirs.push(path);
                } else if path.extension().map_or(false, |e| e == "json") {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    fn name(&self) -> &'static str {
        "disk"
    }
}

/// Stores nothing; every lookup misses.
pub struct NullCache;

impl NullCache {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for NullCache {
    async fn get(&self, _: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
    async fn set(&self, _: &str, _: &[u8]) -> Result<()> {
        Ok(())
    }
    async fn delete(&self, _: &str) -> Result<bool> {
        Ok(false)
    }
    async fn clear(&self) -> Result<()> {
        Ok(())
    }
    async fn len(&self) -> Result<usize> {
        Ok(0)
    }
    fn name(&self) -> &'static str {
        "null"
    }
}
