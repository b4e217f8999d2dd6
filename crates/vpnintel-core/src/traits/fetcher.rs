// # Feed Fetcher Trait
//
// Defines the interface for downloading the upstream server list.
//
// ## Implementations
//
// - HTTP: `vpnintel-fetch-http` crate
// - Tests: in-memory fetchers returning canned payloads
//
// Retry, backoff, deadlines and cancellation are owned by the `Updater`.
// A fetcher performs exactly one request per call.

use async_trait::async_trait;

/// Hard cap on a feed response body (50 MiB)
pub const MAX_RESPONSE_SIZE: usize = 50 * 1024 * 1024;

/// A single feed download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Absolute http(s) URL
    pub url: String,
    /// Extra request headers, applied after the defaults
    pub headers: Vec<(String, String)>,
    /// Body size cap in bytes
    pub max_size: usize,
}

impl FetchRequest {
    /// Create a request with the default size cap and no extra headers
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            max_size: MAX_RESPONSE_SIZE,
        }
    }

    /// Add a request header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Override the size cap
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }
}

/// Trait for feed fetcher implementations
///
/// # Trust Level: Semi-Trusted
///
/// Fetchers perform network I/O only. They must not retry, sleep, touch the
/// classifier or the store, or decide when a refresh happens.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Download the feed body
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<u8>)`: The raw body, at most `request.max_size` bytes
    /// - `Err(Error::Http { .. })`: Non-success status
    /// - `Err(Error::ResponseTooLarge { .. })`: Body over the cap
    /// - `Err(Error::Fetch(..))`: Transport failure
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, crate::Error>;

    /// Name used in logs
    fn fetcher_name(&self) -> &'static str;
}
