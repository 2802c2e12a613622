//! Content stores backing cachable requests.
//!
//! The store is injected into [`Requests`](super::Requests), so each test (or
//! each run) owns its cache instead of sharing a process-wide one.

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Memoizes response bodies keyed by URL.
pub trait CacheStore: fmt::Debug + Send + Sync {
    /// Cached body for `url`, if any.
    fn get(&self, url: &str) -> Option<Bytes>;

    /// Remember `content` as the body for `url`.
    fn put(&self, url: &str, content: Bytes);
}

/// Cache that never stores anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl CacheStore for NoCache {
    fn get(&self, _url: &str) -> Option<Bytes> {
        None
    }

    fn put(&self, _url: &str, _content: Bytes) {}
}

/// In-memory cache for the lifetime of the store.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Bytes>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached URLs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |entries| entries.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, url: &str) -> Option<Bytes> {
        self.entries.read().ok()?.get(url).cloned()
    }

    fn put(&self, url: &str, content: Bytes) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(url.to_string(), content);
        }
    }
}

/// On-disk cache shared between runs.
///
/// Entries live at `<root>/<hh>/<rest>` where `hhrest` is the BLAKE3 hex
/// digest of the URL. Writes are atomic, so a crashed run never leaves a
/// truncated entry behind.
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the entry for `url`.
    #[must_use]
    pub fn entry_path(&self, url: &str) -> PathBuf {
        let key = blake3::hash(url.as_bytes()).to_hex();
        let key = key.as_str();
        self.root.join(&key[..2]).join(&key[2..])
    }
}

impl CacheStore for DiskCache {
    fn get(&self, url: &str) -> Option<Bytes> {
        let path = self.entry_path(url);
        match std::fs::read(&path) {
            Ok(content) => Some(Bytes::from(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(url, path = %path.display(), "ignoring unreadable cache entry: {e}");
                None
            }
        }
    }

    fn put(&self, url: &str, content: Bytes) {
        let path = self.entry_path(url);
        if let Err(e) = crate::fs::atomic_write(&path, &content) {
            tracing::warn!(url, path = %path.display(), "failed to write cache entry: {e}");
        }
    }
}
