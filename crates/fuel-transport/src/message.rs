//! Request and response types, and the client collaborator trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use http::Method;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::compression::{ContentEncoding, ACCEPT_ENCODING};
use crate::error::FetchError;

/// An outbound HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL including the query string.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Option<Vec<u8>>,
    /// Cancellation handle the request is bound to.
    pub cancel: Option<CancellationToken>,
}

impl HttpRequest {
    /// Create a request with an explicit method.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            cancel: None,
        }
    }

    /// Create a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Add a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the body as raw bytes.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Ask the server for a compressed body.
    pub fn accept_compressed(self) -> Self {
        self.header("Accept-Encoding", ACCEPT_ENCODING)
    }

    /// Bind the request to a cancellation token.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Whether the bound token (if any) has already fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Get a header value (case-insensitive).
    pub fn header_value(&self, key: &str) -> Option<&str> {
        lookup(&self.headers, key)
    }
}

/// An HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: u16,
    /// The response headers.
    pub headers: HashMap<String, String>,
    /// The response body, exactly as received.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Create a new response.
    pub fn new(status: u16, headers: HashMap<String, String>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Check if the response was successful (2xx status).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if the response was a client error (4xx status).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if the response was a server error (5xx and above).
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Get a header value (case-insensitive).
    pub fn header(&self, key: &str) -> Option<&str> {
        lookup(&self.headers, key)
    }

    /// Encoding declared by the `Content-Encoding` header.
    pub fn content_encoding(&self) -> Result<ContentEncoding, FetchError> {
        match self.header("Content-Encoding") {
            Some(value) => value.parse(),
            None => Ok(ContentEncoding::Identity),
        }
    }

    /// The body after undoing any `Content-Encoding`.
    pub fn decoded_body(&self) -> Result<Vec<u8>, FetchError> {
        self.content_encoding()?.decode(&self.body)
    }

    /// Decode the body and parse it as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        let bytes = self.decoded_body()?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Decode the body as UTF-8 text.
    pub fn text(&self) -> Result<String, FetchError> {
        String::from_utf8(self.decoded_body()?)
            .map_err(|e| FetchError::Decode(format!("Invalid UTF-8: {}", e)))
    }

    /// Convert to a Result, returning an error for 4xx and 5xx statuses.
    pub fn error_for_status(self, url: &str) -> Result<Self, FetchError> {
        if self.status >= 400 {
            Err(FetchError::Http {
                status: self.status,
                url: url.to_string(),
            })
        } else {
            Ok(self)
        }
    }
}

fn lookup<'a>(headers: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// Collaborator that issues exactly one HTTP request.
///
/// Implementations must not retry and must not decompress bodies;
/// both concerns belong to this crate.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Send the request and return whatever status the server produced.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FetchError>;
}

#[async_trait]
impl<T: HttpClient + ?Sized> HttpClient for Arc<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        (**self).send(request).await
    }
}
