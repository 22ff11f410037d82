//! Resource descriptors and the cache keys derived from them.

use std::collections::BTreeMap;

use fuel_transport::{FetchError, HttpRequest, Url};
use serde::{Deserialize, Serialize};

/// A cache key uniquely identifying a fetched resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// The computed key string.
    key: String,
    /// Components that make up the key (for debugging).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    components: Vec<String>,
}

impl CacheKey {
    /// Prefix shared by every key this crate derives.
    pub const PREFIX: &'static str = "fetch";

    /// Create a cache key from a string.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            components: Vec::new(),
        }
    }

    /// Get the key string.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Get the key components (for debugging).
    pub fn components(&self) -> &[String] {
        &self.components
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// A GET-able resource: base URL, query parameters and extra headers.
///
/// Query parameters and headers are kept sorted, so two resources built in
/// a different order map to the same [`CacheKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    url: String,
    query: BTreeMap<String, String>,
    headers: BTreeMap<String, String>,
}

impl Resource {
    /// Create a resource for a base URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
        }
    }

    /// Add a query parameter. A repeated name replaces the earlier value.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Add a request header. Header names are case-insensitive and stored lowercased.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn query_params(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    /// Derive the cache key.
    ///
    /// Layout: `fetch|<url>|q:<name>=<value>|...|h:<name>=<value>|...`.
    /// `%` and `|` inside a part are percent-encoded, as is `=` inside a name.
    pub fn cache_key(&self) -> CacheKey {
        let pair = |tag: &str, name: &str, value: &str| {
            format!("{}:{}={}", tag, escape(name, true), escape(value, false))
        };

        let mut components = Vec::with_capacity(1 + self.query.len() + self.headers.len());
        components.push(escape(&self.url, false));
        components.extend(self.query.iter().map(|(k, v)| pair("q", k, v)));
        components.extend(self.headers.iter().map(|(k, v)| pair("h", k, v)));

        let mut key = String::from(CacheKey::PREFIX);
        for component in &components {
            key.push('|');
            key.push_str(component);
        }

        CacheKey { key, components }
    }

    /// Absolute URL with the query string encoded.
    pub fn full_url(&self) -> Result<String, FetchError> {
        let url = if self.query.is_empty() {
            Url::parse(&self.url)
        } else {
            Url::parse_with_params(&self.url, &self.query)
        }
        .map_err(|e| FetchError::Request(format!("invalid URL {}: {}", self.url, e)))?;
        Ok(url.into())
    }

    /// Build the GET request for this resource, asking for a compressed body.
    pub fn to_request(&self) -> Result<HttpRequest, FetchError> {
        let mut request = HttpRequest::get(self.full_url()?).accept_compressed();
        for (name, value) in &self.headers {
            request = request.header(name.clone(), value.clone());
        }
        Ok(request)
    }
}

fn escape(part: &str, in_name: bool) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        match c {
            '%' => out.push_str("%25"),
            '|' => out.push_str("%7C"),
            '=' if in_name => out.push_str("%3D"),
            _ => out.push(c),
        }
    }
    out
}
