//! Memoized responses for idempotent reads.
//!
//! Only GET requests explicitly marked cacheable participate. Entries are
//! keyed by `(method, url)`, never expire, and are only removed by
//! [`ResponseCache::clear`]. This is acceptable because the cacheable set is a
//! short, fixed whitelist of read-mostly endpoints called at most once per
//! session (currently only authentication URL discovery).

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::Method;

/// Cache key for a response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub method: Method,
    pub url: String,
}

impl CacheKey {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
        }
    }
}

/// Last successful response body per [`CacheKey`].
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<CacheKey, serde_json::Value>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached body. Returns `Some(body)` on cache hit.
    pub fn get(&self, key: &CacheKey) -> Option<serde_json::Value> {
        let found = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Store a body, replacing any earlier entry for the key.
    pub fn put(&self, key: CacheKey, body: serde_json::Value) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, body);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cache hit count.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Cache miss count.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
