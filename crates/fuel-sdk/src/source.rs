//! Station price access built from the data layer parts.
//!
//! `station(id)` calls made in one scheduler turn are coalesced by a
//! [`KeyedBatchLoader`] into a single `GET {base_url}/stations?ids=a,b,c`,
//! which goes through the [`RevalidatingCache`] and its retrying transport.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use fuel_batch::{BatchError, KeyedBatchLoader, LoadError, Pending, WindowedRequestBatcher};
use fuel_cache::{CacheError, FetchOptions, Resource, RevalidatingCache};
use fuel_observability::DataLayerMetrics;
use fuel_transport::{ReqwestClient, RetryingTransport};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::DataLayerConfig;

/// Identifier of a fuel station.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(String);

impl StationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Fuel grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FuelKind {
    Diesel,
    E5,
    E10,
}

/// One advertised price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuelPrice {
    pub fuel: FuelKind,
    /// Price per litre in euros.
    pub price: f64,
    pub updated_at: DateTime<Utc>,
}

/// Current prices at one station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationPrices {
    pub station_id: StationId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub prices: Vec<FuelPrice>,
}

impl StationPrices {
    /// Price for one fuel grade.
    pub fn price(&self, fuel: FuelKind) -> Option<&FuelPrice> {
        self.prices.iter().find(|p| p.fuel == fuel)
    }

    /// Most recent update across all grades.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.prices.iter().map(|p| p.updated_at).max()
    }
}

/// Result of a single station lookup.
pub type StationResult = std::result::Result<Option<StationPrices>, LoadError<CacheError>>;

/// Batched, cached access to station prices.
///
/// Holds `Rc`-based batch components, so it lives on one thread and must be
/// used inside a `tokio::task::LocalSet`.
pub struct StationPriceSource {
    loader: KeyedBatchLoader<StationId, Option<StationPrices>, CacheError>,
    windowed: WindowedRequestBatcher<Value, CacheError>,
    cache: RevalidatingCache,
    fetch_options: FetchOptions,
}

impl StationPriceSource {
    /// Build the source over an existing cache.
    pub fn new(config: &DataLayerConfig, cache: RevalidatingCache) -> Self {
        Self::build(config, cache, None)
    }

    /// Build the source and everything under it from configuration:
    /// a `reqwest` client, an in-memory store and the configured retry policy.
    pub fn from_config(config: &DataLayerConfig) -> Result<Self> {
        Self::from_config_with_metrics(config, None)
    }

    /// [`from_config`](Self::from_config), recording into `metrics`.
    pub fn from_config_with_metrics(
        config: &DataLayerConfig,
        metrics: Option<Arc<DataLayerMetrics>>,
    ) -> Result<Self> {
        config.validate()?;

        let client = ReqwestClient::new(&config.api.client)?;
        let mut transport =
            RetryingTransport::new(Arc::new(client)).with_policy(config.retry.policy());
        if let Some(metrics) = &metrics {
            transport = transport.with_metrics(Arc::clone(metrics));
        }

        let mut cache = RevalidatingCache::new(Arc::new(config.cache.store()), transport);
        if let Some(metrics) = &metrics {
            cache = cache.with_metrics(Arc::clone(metrics));
        }

        Ok(Self::build(config, cache, metrics))
    }

    fn build(
        config: &DataLayerConfig,
        cache: RevalidatingCache,
        metrics: Option<Arc<DataLayerMetrics>>,
    ) -> Self {
        let fetch_options = config.cache.fetch_options();
        let stations_url = format!("{}/stations", config.api.base_url.trim_end_matches('/'));

        let bulk_cache = cache.clone();
        let mut loader = KeyedBatchLoader::new(
            move |ids: Vec<StationId>| {
                let cache = bulk_cache.clone();
                let resource = stations_resource(&stations_url, &ids);
                async move {
                    debug!(stations = ids.len(), "fetching station prices");
                    let records: Vec<StationPrices> =
                        cache.fetch_optimized_as(&resource, fetch_options).await?;
                    Ok::<_, CacheError>(align_to_keys(&ids, records))
                }
            },
            config.loader,
        );
        let mut windowed = WindowedRequestBatcher::new(config.batcher.options());

        if let Some(metrics) = metrics {
            loader = loader.with_metrics(Arc::clone(&metrics));
            windowed = windowed.with_metrics(metrics);
        }

        Self {
            loader,
            windowed,
            cache,
            fetch_options,
        }
    }

    /// Prices for one station; `None` when the API does not know it.
    pub fn station(&self, id: StationId) -> Pending<Option<StationPrices>, LoadError<CacheError>> {
        self.loader.load(id)
    }

    /// Prices for several stations, in the order given.
    pub async fn stations<I>(&self, ids: I) -> Vec<StationResult>
    where
        I: IntoIterator<Item = StationId>,
    {
        self.loader.load_many(ids).await
    }

    /// Queue an arbitrary cached request on the windowed batcher.
    pub fn enqueue(&self, resource: Resource) -> Pending<Value, BatchError<CacheError>> {
        let cache = self.cache.clone();
        let options = self.fetch_options;
        self.windowed
            .add(move || async move { cache.fetch_optimized(&resource, options).await })
    }

    /// Forget the loader's memoized value for a station.
    ///
    /// The response cache is left alone; the next load still reads through it.
    pub fn forget(&self, id: &StationId) {
        self.loader.clear(id);
    }

    pub fn loader(&self) -> &KeyedBatchLoader<StationId, Option<StationPrices>, CacheError> {
        &self.loader
    }

    pub fn windowed(&self) -> &WindowedRequestBatcher<Value, CacheError> {
        &self.windowed
    }

    pub fn cache(&self) -> &RevalidatingCache {
        &self.cache
    }

    /// Wait for background cache refreshes to finish.
    pub async fn settle(&self) {
        self.cache.settle().await;
    }
}

impl fmt::Debug for StationPriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StationPriceSource")
            .field("loader", &self.loader)
            .field("windowed", &self.windowed)
            .field("fetch_options", &self.fetch_options)
            .finish_non_exhaustive()
    }
}

fn stations_resource(stations_url: &str, ids: &[StationId]) -> Resource {
    let joined = ids
        .iter()
        .map(StationId::as_str)
        .collect::<Vec<_>>()
        .join(",");
    Resource::new(stations_url).query("ids", joined)
}

/// One entry per requested id, in request order. Unknown ids map to `None`.
fn align_to_keys(ids: &[StationId], records: Vec<StationPrices>) -> Vec<Option<StationPrices>> {
    let by_id: HashMap<StationId, StationPrices> = records
        .into_iter()
        .map(|record| (record.station_id.clone(), record))
        .collect();
    ids.iter().map(|id| by_id.get(id).cloned()).collect()
}
