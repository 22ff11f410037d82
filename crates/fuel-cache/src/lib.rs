//! Caching infrastructure for the fuel price data layer.
//!
//! This crate provides:
//! - `CacheStore` - Collaborator trait for a string-keyed store with per-entry expiry
//! - `InMemoryStore` - Process-local `CacheStore`
//! - `Resource` / `CacheKey` - Request descriptors and the keys derived from them
//! - `RevalidatingCache` - Stale-while-revalidate fetching on top of a store
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use fuel_cache::{FetchOptions, InMemoryStore, Resource, RevalidatingCache};
//! use fuel_transport::{ClientOptions, ReqwestClient, RetryingTransport};
//!
//! let client = ReqwestClient::new(&ClientOptions::default())?;
//! let cache = RevalidatingCache::new(
//!     Arc::new(InMemoryStore::new()),
//!     RetryingTransport::new(Arc::new(client)),
//! );
//!
//! let resource = Resource::new("https://api.example.com/stations").query("ids", "st-1,st-2");
//! let stations = cache
//!     .fetch_optimized(&resource, FetchOptions::with_ttl(Duration::from_secs(300)))
//!     .await?;
//! ```

mod error;
mod key;
mod revalidate;
mod store;

pub use error::*;
pub use key::*;
pub use revalidate::*;
pub use store::*;
