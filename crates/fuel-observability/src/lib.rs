//! Observability infrastructure for the fuel price data layer.
//!
//! This crate provides:
//! - `init_logging` - Installs a `tracing` subscriber from `LoggingConfig`
//! - `DataLayerMetrics` - Counters shared by loaders, batchers, caches and transports
//! - `MetricsSnapshot` - Serializable point-in-time view of the counters

mod logging;
mod metrics;

pub use logging::*;
pub use metrics::*;
