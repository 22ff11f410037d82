//! HTTP transport for the fuel price data layer.
//!
//! This crate provides:
//! - `HttpClient` - Collaborator trait for issuing one HTTP request
//! - `HttpRequest` / `HttpResponse` - Transport-neutral request and response types
//! - `ReqwestClient` - `HttpClient` backed by `reqwest`
//! - `RetryPolicy` / `fetch_with_retry` - Bounded retry with exponential backoff
//! - `RetryingTransport` - An `HttpClient` paired with a `RetryPolicy`
//! - `AbortableRequest` - Cancellation handle for one logical operation
//! - `ContentEncoding` - gzip/deflate body decoding

mod abort;
mod client;
mod compression;
mod error;
mod message;
mod retry;

pub use abort::*;
pub use client::*;
pub use compression::*;
pub use error::*;
pub use message::*;
pub use retry::*;

/// URL type used to assemble request URLs.
pub use reqwest::Url;
