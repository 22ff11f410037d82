//! Stale-while-revalidate fetching.
//!
//! A hit is served straight from the store and a background refresh is
//! started for the same key; a miss fetches, stores and returns. The caller
//! never waits on the network when a cached value exists.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashSet;
use fuel_observability::DataLayerMetrics;
use fuel_transport::RetryingTransport;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::error::CacheResult;
use crate::key::{CacheKey, Resource};
use crate::store::CacheStore;

/// Per-call options for [`RevalidatingCache::fetch_optimized`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// How long a stored value stays readable.
    pub ttl: Duration,
}

impl FetchOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl }
    }

    /// TTL in whole seconds, rounding a fractional second up.
    pub fn ttl_secs(&self) -> u64 {
        self.ttl
            .as_secs()
            .saturating_add(u64::from(self.ttl.subsec_nanos() > 0))
    }
}

impl Default for FetchOptions {
    /// Five minutes.
    fn default() -> Self {
        Self::with_ttl(Duration::from_secs(300))
    }
}

/// Where a returned value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Served from the store; a refresh was scheduled.
    Hit,
    /// Fetched from the network.
    Miss,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hit => write!(f, "HIT"),
            Self::Miss => write!(f, "MISS"),
        }
    }
}

struct Inner {
    store: Arc<dyn CacheStore>,
    transport: RetryingTransport,
    refreshing: DashSet<String>,
    tracker: TaskTracker,
    metrics: OnceLock<Arc<DataLayerMetrics>>,
}

impl Inner {
    async fn fetch_value(&self, resource: &Resource) -> CacheResult<Value> {
        let request = resource.to_request()?;
        let response = self.transport.send(request).await?;
        Ok(response.json::<Value>()?)
    }

    async fn write(&self, key: &CacheKey, value: Value, options: FetchOptions) {
        if let Err(error) = self
            .store
            .set(key.as_str(), value, options.ttl_secs())
            .await
        {
            warn!(key = %key, error = %error, "cache write failed");
        }
    }
}

/// Marks a key as refreshing until dropped, so a panicking refresh still
/// frees the key.
struct RefreshGuard {
    inner: Arc<Inner>,
    key: CacheKey,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.inner.refreshing.remove(self.key.as_str());
    }
}

/// Read-through cache that serves stored values immediately and refreshes
/// them in the background.
///
/// Cloning is cheap; clones share the store, transport and the set of
/// in-flight refreshes.
#[derive(Clone)]
pub struct RevalidatingCache {
    inner: Arc<Inner>,
}

impl RevalidatingCache {
    /// Create a cache over a store and a retrying transport.
    pub fn new(store: Arc<dyn CacheStore>, transport: RetryingTransport) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                refreshing: DashSet::new(),
                tracker: TaskTracker::new(),
                metrics: OnceLock::new(),
            }),
        }
    }

    /// Record hits, misses and refreshes into `metrics`.
    ///
    /// Applies to every clone. Only the first attached sink is kept.
    pub fn with_metrics(self, metrics: Arc<DataLayerMetrics>) -> Self {
        if self.inner.metrics.set(metrics).is_err() {
            warn!("cache metrics already attached, keeping the first");
        }
        self
    }

    /// Fetch a resource through the cache.
    ///
    /// On a hit the stored value is returned and one background refresh is
    /// started for the key, unless one is already running. On a miss the
    /// resource is fetched with retries, stored with `options.ttl`, and
    /// returned; a fetch failure is returned to the caller and nothing is
    /// stored. A store read failure counts as a miss and a store write
    /// failure is logged only.
    pub async fn fetch_optimized(
        &self,
        resource: &Resource,
        options: FetchOptions,
    ) -> CacheResult<Value> {
        self.fetch_with_status(resource, options)
            .await
            .map(|(value, _)| value)
    }

    /// [`fetch_optimized`](Self::fetch_optimized), deserialized into `T`.
    pub async fn fetch_optimized_as<T: DeserializeOwned>(
        &self,
        resource: &Resource,
        options: FetchOptions,
    ) -> CacheResult<T> {
        let value = self.fetch_optimized(resource, options).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// [`fetch_optimized`](Self::fetch_optimized), also reporting whether the
    /// value came from the store.
    pub async fn fetch_with_status(
        &self,
        resource: &Resource,
        options: FetchOptions,
    ) -> CacheResult<(Value, CacheStatus)> {
        let key = resource.cache_key();

        match self.inner.store.get(key.as_str()).await {
            Ok(Some(value)) => {
                debug!(key = %key, "cache hit");
                if let Some(metrics) = self.inner.metrics.get() {
                    metrics.record_cache_hit();
                }
                self.spawn_refresh(key, resource.clone(), options);
                return Ok((value, CacheStatus::Hit));
            }
            Ok(None) => {}
            Err(error) => {
                warn!(key = %key, error = %error, "cache read failed, fetching");
            }
        }

        debug!(key = %key, "cache miss");
        if let Some(metrics) = self.inner.metrics.get() {
            metrics.record_cache_miss();
        }

        let value = self.inner.fetch_value(resource).await?;
        self.inner.write(&key, value.clone(), options).await;
        Ok((value, CacheStatus::Miss))
    }

    /// Drop the stored value for a resource.
    pub async fn invalidate(&self, resource: &Resource) -> CacheResult<()> {
        self.inner.store.delete(resource.cache_key().as_str()).await
    }

    /// Whether a background refresh is running for this resource.
    pub fn is_refreshing(&self, resource: &Resource) -> bool {
        self.inner
            .refreshing
            .contains(resource.cache_key().as_str())
    }

    /// Number of background refreshes currently running.
    pub fn pending_refreshes(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Wait until every background refresh started so far has finished.
    ///
    /// Not meant to be called from several tasks at once.
    pub async fn settle(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    fn spawn_refresh(&self, key: CacheKey, resource: Resource, options: FetchOptions) {
        if !self.inner.refreshing.insert(key.as_str().to_string()) {
            debug!(key = %key, "refresh already running");
            return;
        }
        if let Some(metrics) = self.inner.metrics.get() {
            metrics.record_refresh_started();
        }

        let guard = RefreshGuard {
            inner: Arc::clone(&self.inner),
            key,
        };
        self.inner.tracker.spawn(async move {
            let inner = &guard.inner;
            let key = &guard.key;
            match inner.fetch_value(&resource).await {
                Ok(value) => {
                    inner.write(key, value, options).await;
                    debug!(key = %key, "refreshed");
                }
                Err(error) => {
                    warn!(key = %key, error = %error, "background refresh failed");
                    if let Some(metrics) = inner.metrics.get() {
                        metrics.record_refresh_failed();
                    }
                }
            }
        });
    }
}

impl std::fmt::Debug for RevalidatingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevalidatingCache")
            .field("transport", &self.inner.transport)
            .field("refreshing", &self.inner.refreshing.len())
            .finish_non_exhaustive()
    }
}
