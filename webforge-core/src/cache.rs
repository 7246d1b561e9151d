//! Cached file content with bounded, recency-based eviction.
//!
//! [`FileCache`] keeps the raw bytes of recently served files in memory,
//! keyed by path and validated against the file's modification time. It
//! is count-bounded: inserting past the configured entry limit evicts
//! exactly the least-recently-used entry.
//!
//! # Design
//!
//! The cache is split into two structures:
//!
//! - a concurrent index ([`DashMap`]) that the hit path reads without
//!   taking any lock, and
//! - a recency list (`lru::LruCache` behind a single mutex) that orders
//!   entries for eviction. All mutation — insert, evict, recency touch —
//!   is serialized under that one lock.
//!
//! [`FileCache::get`] never makes the caller wait on a cache write. On a
//! miss or a stale entry it reads the file from disk, hands those fresh
//! bytes straight back, and detaches a background task to update the
//! cache. On a hit it detaches a recency-touch task and returns the
//! cached bytes.
//!
//! Because the hit path runs outside the lock it can race with writers;
//! a hit that disappears mid-read simply falls through to disk. Content
//! is stored as [`Bytes`], so an entry is published atomically and
//! concurrent readers can never observe a torn buffer.
//!
//! # Freshness
//!
//! Cached bytes are served only if the file has not been modified since
//! they were cached: an entry is fresh iff its cache timestamp is
//! strictly newer than the file's current mtime. Anything else re-reads
//! the disk, which also self-heals any staleness a race may produce.
//!
//! # Examples
//!
//! ```no_run
//! use webforge_core::cache::FileCache;
//!
//! # async fn example() -> webforge_core::error::Result<()> {
//! let cache = FileCache::new(1000);
//! let bytes = cache.get("html/index.html").await?;
//! println!("served {} bytes", bytes.len());
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use bytes::Bytes;
use dashmap::DashMap;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Clone)]
struct CacheEntry {
    content: Bytes,
    cached_at: SystemTime,
}

struct CacheInner {
    entries: DashMap<PathBuf, CacheEntry>,
    recency: Mutex<LruCache<PathBuf, ()>>,
}

/// A count-bounded, mtime-validated cache of file contents.
///
/// Cheaply cloneable; clones share the same storage. One instance is
/// created per server and shared by every request task.
#[derive(Clone)]
pub struct FileCache {
    inner: Arc<CacheInner>,
}

impl FileCache {
    /// Creates a cache bounded to `limit` entries. A limit of zero is
    /// treated as one.
    pub fn new(limit: usize) -> Self {
        let cap = NonZeroUsize::new(limit.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(CacheInner {
                entries: DashMap::new(),
                recency: Mutex::new(LruCache::new(cap)),
            }),
        }
    }

    /// Returns the contents of `path`, from cache when fresh, from disk
    /// otherwise.
    ///
    /// Disk reads hand their bytes back immediately; the cache update
    /// runs as a detached task the caller does not wait for.
    ///
    /// # Errors
    ///
    /// - [`Error::FileNotFound`] when the file does not exist (the
    ///   request handler maps this to a 404 response).
    /// - [`Error::Io`] when the read itself fails (mapped to 500).
    pub async fn get(&self, path: impl AsRef<Path>) -> Result<Bytes> {
        let path = path.as_ref();

        let cached = self.inner.entries.get(path).map(|e| e.value().clone());
        if let Some(entry) = cached {
            if let Ok(mtime) = tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
                if entry.cached_at > mtime {
                    debug!("'{}' found in cache", path.display());
                    let cache = self.clone();
                    let key = path.to_path_buf();
                    tokio::spawn(async move { cache.touch(&key).await });
                    return Ok(entry.content);
                }
            }
            // Stale, or the metadata went away under us. Either way the
            // disk is the source of truth now.
        }

        self.read_from_disk(path).await
    }

    async fn read_from_disk(&self, path: &Path) -> Result<Bytes> {
        match tokio::fs::read(path).await {
            Ok(data) => {
                debug!("'{}' found on disk", path.display());
                let content = Bytes::from(data);
                let cache = self.clone();
                let key = path.to_path_buf();
                let pending = content.clone();
                tokio::spawn(async move { cache.store(key, pending).await });
                Ok(content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("'{}' not found", path.display());
                Err(Error::FileNotFound(path.to_path_buf()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Inserts or refreshes an entry, evicting the least-recently-used
    /// entry when the bound is exceeded.
    async fn store(&self, key: PathBuf, content: Bytes) {
        let entry = CacheEntry {
            content,
            cached_at: SystemTime::now(),
        };
        let mut recency = self.inner.recency.lock().await;
        if let Some((evicted, _)) = recency.push(key.clone(), ()) {
            // push returns the displaced pair: either the LRU entry on
            // overflow, or the key itself on refresh.
            if evicted != key {
                debug!("evicting '{}' from cache", evicted.display());
                self.inner.entries.remove(&evicted);
            }
        }
        self.inner.entries.insert(key, entry);
    }

    /// Moves an entry to the most-recently-used position. A no-op when
    /// the entry has been evicted in the meantime.
    async fn touch(&self, key: &Path) {
        let mut recency = self.inner.recency.lock().await;
        recency.get(key);
    }

    /// Number of entries currently cached.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    #[cfg(test)]
    fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.inner.entries.contains_key(path.as_ref())
    }
}
