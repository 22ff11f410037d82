//! Cache store collaborator and the in-memory implementation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use serde_json::Value;

use crate::error::CacheResult;

/// String-keyed store with per-entry expiry.
///
/// `get` must return `None` for entries whose TTL has elapsed.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up a live entry.
    async fn get(&self, key: &str) -> CacheResult<Option<Value>>;

    /// Store a value that expires `ttl_secs` seconds from now.
    async fn set(&self, key: &str, value: Value, ttl_secs: u64) -> CacheResult<()>;

    /// Remove an entry. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> CacheResult<()>;
}

#[async_trait]
impl<T: CacheStore + ?Sized> CacheStore for Arc<T> {
    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Value, ttl_secs: u64) -> CacheResult<()> {
        (**self).set(key, value, ttl_secs).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        (**self).delete(key).await
    }
}

/// TTLs above this are stored without an expiry.
pub const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Value,
    /// `None` never expires.
    ttl: Option<Duration>,
}

impl StoredEntry {
    fn new(value: Value, ttl_secs: u64) -> Self {
        let ttl = (ttl_secs <= MAX_TTL_SECS).then(|| Duration::from_secs(ttl_secs));
        Self { value, ttl }
    }
}

/// Expires each entry after its own TTL, restarting the clock on overwrite.
struct EntryTtl;

impl Expiry<String, StoredEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &StoredEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        entry.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &StoredEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.ttl
    }
}

/// Process-local [`CacheStore`] backed by a bounded `moka` cache.
///
/// Expired entries are evicted by the cache's own housekeeping, whether or
/// not they are read again, and the least useful entries are evicted once
/// `max_capacity` is reached. A TTL of zero stores an entry that is never
/// readable.
pub struct InMemoryStore {
    entries: Cache<String, StoredEntry>,
    max_capacity: u64,
}

impl InMemoryStore {
    /// Default entry limit.
    pub const DEFAULT_MAX_CAPACITY: u64 = 10_000;

    pub fn new() -> Self {
        Self::with_max_capacity(Self::DEFAULT_MAX_CAPACITY)
    }

    /// Create a store holding at most `max_capacity` entries.
    pub fn with_max_capacity(max_capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryTtl)
            .build();
        Self {
            entries,
            max_capacity,
        }
    }

    pub fn max_capacity(&self) -> u64 {
        self.max_capacity
    }

    /// Approximate number of live entries.
    ///
    /// Call [`run_pending_tasks`](Self::run_pending_tasks) first for an
    /// up-to-date count.
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }

    /// Run pending evictions and expirations now.
    pub async fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks().await;
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.entries.invalidate_all();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("max_capacity", &self.max_capacity)
            .field("entry_count", &self.entries.entry_count())
            .finish()
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        Ok(self.entries.get(key).await.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: Value, ttl_secs: u64) -> CacheResult<()> {
        self.entries
            .insert(key.to_string(), StoredEntry::new(value, ttl_secs))
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.invalidate(key).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let store = InMemoryStore::new();
        store.set("k", json!({"price": 1.79}), 60).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(json!({"price": 1.79})));
        assert_eq!(store.get("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let store = InMemoryStore::new();
        store.set("k", json!(1), 1).await.unwrap();
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_is_never_readable() {
        let store = InMemoryStore::new();
        store.set("k", json!(1), 0).await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_overwrites_and_resets_expiry() {
        let store = InMemoryStore::new();
        store.set("k", json!("old"), 1).await.unwrap();
        store.set("k", json!("new"), 60).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(store.get("k").await.unwrap(), Some(json!("new")));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryStore::new();
        store.set("k", json!(1), 60).await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("missing").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let store = InMemoryStore::new();
        store.set("a", json!(1), 60).await.unwrap();
        store.set("b", json!(2), 60).await.unwrap();
        store.clear();
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.get("b").await.unwrap().is_none());
    }

    // === Eviction ===

    #[tokio::test]
    async fn test_expired_entries_are_evicted_without_reads() {
        let store = InMemoryStore::new();
        for i in 0..1000 {
            store.set(&format!("ids={}", i), json!(i), 1).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(2500)).await;

        store.set("fresh", json!(true), 60).await.unwrap();
        store.run_pending_tasks().await;
        assert_eq!(store.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_capacity_bounds_entry_count() {
        let store = InMemoryStore::with_max_capacity(10);
        for i in 0..200 {
            store.set(&format!("ids={}", i), json!(i), 600).await.unwrap();
        }
        store.run_pending_tasks().await;
        assert!(store.entry_count() <= 10);
    }

    // === Long TTLs ===

    #[tokio::test]
    async fn test_huge_ttl_never_expires() {
        let store = InMemoryStore::new();
        store.set("max", json!("forever"), u64::MAX).await.unwrap();
        store.set("half", json!("forever"), u64::MAX / 2).await.unwrap();
        store.set("cap", json!("century"), MAX_TTL_SECS).await.unwrap();

        assert_eq!(store.get("max").await.unwrap(), Some(json!("forever")));
        assert_eq!(store.get("half").await.unwrap(), Some(json!("forever")));
        assert_eq!(store.get("cap").await.unwrap(), Some(json!("century")));
    }

    #[tokio::test]
    async fn test_shared_through_arc() {
        let store: Arc<dyn CacheStore> = Arc::new(InMemoryStore::new());
        let alias = Arc::clone(&store);
        store.set("k", json!(true), 60).await.unwrap();
        assert_eq!(alias.get("k").await.unwrap(), Some(json!(true)));
    }
}
