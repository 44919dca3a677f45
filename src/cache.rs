//! Key/value cache with per-entry time-to-live.
//!
//! The pipeline treats the cache as an external service behind the
//! [`CacheStore`] trait: values are JSON, entries are never updated in place
//! and expire by TTL only. [`MemoryCache`] is the in-process implementation
//! used by the binary and the tests; a networked backend only has to
//! implement `get`/`set`.
//!
//! Keys are built with [`cache_key`], which strips characters that network
//! cache transports reject (whitespace, control characters).

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Abstraction over the cache service.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// A live entry for `key`, if any.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Store `value` under `key` for `ttl`. Last write wins.
    async fn set(&self, key: &str, value: Value, ttl: Duration);
}

/// Fetch and deserialize a cached value. Undecodable entries count as misses.
pub async fn get_typed<T: DeserializeOwned>(cache: &dyn CacheStore, key: &str) -> Option<T> {
    let value = cache.get(key).await?;
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, error = %e, "Discarding undecodable cache entry");
            None
        }
    }
}

/// Serialize and store a value.
pub async fn put_typed<T: Serialize>(cache: &dyn CacheStore, key: &str, value: &T, ttl: Duration) {
    match serde_json::to_value(value) {
        Ok(v) => cache.set(key, v, ttl).await,
        Err(e) => warn!(key, error = %e, "Failed to serialise value for cache"),
    }
}

/// Join key parts with `:`, lowercasing and collapsing whitespace runs to `_`.
pub fn cache_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| {
            part.split_whitespace()
                .map(|word| {
                    word.chars()
                        .filter(|c| !c.is_control())
                        .flat_map(char::to_lowercase)
                        .collect::<String>()
                })
                .collect::<Vec<_>>()
                .join("_")
        })
        .collect::<Vec<_>>()
        .join(":")
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) < self.ttl
    }
}

/// In-process TTL cache.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }


    /// Number of stored entries, live or not.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .map(|entry| entry.value.clone())
    }

    /// Expired entries are pruned on every write.
    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "Pruned expired cache entries");
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: now,
                ttl,
            },
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
