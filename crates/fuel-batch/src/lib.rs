//! Request batching for the fuel price data layer.
//!
//! This crate provides:
//! - `KeyedBatchLoader` - Coalesces every `load(key)` made in one scheduler turn
//!   into a single bulk fetch
//! - `WindowedRequestBatcher` - Queues request thunks and runs them together
//!   after a delay or once a size threshold is reached
//!
//! Both are single-threaded: their state lives behind `Rc<RefCell<_>>` and
//! their background work is started with `tokio::task::spawn_local`, so they
//! must be used inside a `tokio::task::LocalSet`.

mod error;
mod loader;
mod slot;
mod windowed;

pub use error::*;
pub use loader::*;
pub use slot::*;
pub use windowed::*;
