//! Public SDK for the fuel price data layer.
//!
//! This crate re-exports the data layer crates and wires them together:
//!
//! ```ignore
//! use fuel_sdk::prelude::*;
//!
//! let config = DataLayerConfig::load("fuel.toml")?;
//! init_logging(&config.logging)?;
//!
//! let source = StationPriceSource::from_config(&config)?;
//! tokio::task::LocalSet::new()
//!     .run_until(async {
//!         let (a, b) = tokio::join!(source.station("st-1".into()), source.station("st-2".into()));
//!         // both lookups went out as one `GET /stations?ids=st-1,st-2`
//!     })
//!     .await;
//! ```

mod config;
mod source;

pub use config::*;
pub use source::*;

pub use fuel_batch;
pub use fuel_cache;
pub use fuel_observability;
pub use fuel_transport;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::*;
    pub use crate::source::*;
    pub use fuel_batch::*;
    pub use fuel_cache::*;
    pub use fuel_observability::*;
    pub use fuel_transport::*;
}
