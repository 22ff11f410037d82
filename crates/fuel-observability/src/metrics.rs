//! Data-layer counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters shared by the batching, caching and transport components.
///
/// Every component takes an optional `Arc<DataLayerMetrics>`; counters are
/// monotonic and only ever read through [`DataLayerMetrics::snapshot`].
#[derive(Debug, Default)]
pub struct DataLayerMetrics {
    batches_dispatched: AtomicU64,
    keys_dispatched: AtomicU64,
    loader_cache_hits: AtomicU64,
    batch_failures: AtomicU64,
    windowed_flushes: AtomicU64,
    windowed_items: AtomicU64,
    windowed_item_failures: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    refreshes_started: AtomicU64,
    refreshes_failed: AtomicU64,
    http_attempts: AtomicU64,
    http_retries: AtomicU64,
}

/// Point-in-time copy of [`DataLayerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Bulk-fetch calls issued by keyed loaders.
    pub batches_dispatched: u64,
    /// Keys passed to bulk-fetch calls.
    pub keys_dispatched: u64,
    /// Loads answered from a loader's own cache.
    pub loader_cache_hits: u64,
    /// Bulk-fetch calls that failed or broke the length contract.
    pub batch_failures: u64,
    /// Windowed batcher flushes.
    pub windowed_flushes: u64,
    /// Thunks executed by windowed batchers.
    pub windowed_items: u64,
    /// Thunks that settled with an error.
    pub windowed_item_failures: u64,
    /// Revalidating cache hits.
    pub cache_hits: u64,
    /// Revalidating cache misses.
    pub cache_misses: u64,
    /// Background refreshes spawned.
    pub refreshes_started: u64,
    /// Background refreshes that failed.
    pub refreshes_failed: u64,
    /// HTTP attempts made by the retrying transport.
    pub http_attempts: u64,
    /// Attempts that were retries.
    pub http_retries: u64,
}

impl MetricsSnapshot {
    /// Fraction of revalidating cache lookups that hit, if any lookup happened.
    pub fn cache_hit_ratio(&self) -> Option<f64> {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            None
        } else {
            Some(self.cache_hits as f64 / total as f64)
        }
    }

    /// Format as JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl DataLayerMetrics {
    /// Create a zeroed set of counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one bulk-fetch call over `keys` keys.
    pub fn record_batch(&self, keys: usize) {
        bump(&self.batches_dispatched, 1);
        bump(&self.keys_dispatched, keys as u64);
    }

    pub fn record_batch_failure(&self) {
        bump(&self.batch_failures, 1);
    }

    pub fn record_loader_cache_hit(&self) {
        bump(&self.loader_cache_hits, 1);
    }

    /// Record one windowed flush of `items` thunks, `failures` of which failed.
    pub fn record_flush(&self, items: usize, failures: usize) {
        bump(&self.windowed_flushes, 1);
        bump(&self.windowed_items, items as u64);
        bump(&self.windowed_item_failures, failures as u64);
    }

    pub fn record_cache_hit(&self) {
        bump(&self.cache_hits, 1);
    }

    pub fn record_cache_miss(&self) {
        bump(&self.cache_misses, 1);
    }

    pub fn record_refresh_started(&self) {
        bump(&self.refreshes_started, 1);
    }

    pub fn record_refresh_failed(&self) {
        bump(&self.refreshes_failed, 1);
    }

    /// Record an HTTP attempt; `attempt` is zero for the initial try.
    pub fn record_http_attempt(&self, attempt: u32) {
        bump(&self.http_attempts, 1);
        if attempt > 0 {
            bump(&self.http_retries, 1);
        }
    }

    /// Read every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            batches_dispatched: load(&self.batches_dispatched),
            keys_dispatched: load(&self.keys_dispatched),
            loader_cache_hits: load(&self.loader_cache_hits),
            batch_failures: load(&self.batch_failures),
            windowed_flushes: load(&self.windowed_flushes),
            windowed_items: load(&self.windowed_items),
            windowed_item_failures: load(&self.windowed_item_failures),
            cache_hits: load(&self.cache_hits),
            cache_misses: load(&self.cache_misses),
            refreshes_started: load(&self.refreshes_started),
            refreshes_failed: load(&self.refreshes_failed),
            http_attempts: load(&self.http_attempts),
            http_retries: load(&self.http_retries),
        }
    }
}
