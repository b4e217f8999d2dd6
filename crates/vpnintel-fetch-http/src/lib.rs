// # HTTP Feed Fetcher
//
// Downloads the upstream server list over HTTP(S).
//
// ## Behaviour
//
// - One GET per call; the `Updater` owns retry, backoff and deadlines
// - Request headers from `FetchRequest` are sent as given
// - Non-2xx responses map to `Error::Http`
// - Bodies are read chunk by chunk and rejected once they pass `max_size`,
//   or up front when Content-Length already announces more

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use vpnintel_core::traits::{FeedFetcher, FetchRequest};
use vpnintel_core::{Error, Result};

/// Default per-request timeout for the HTTP client
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP-based feed fetcher
#[derive(Debug, Clone)]
pub struct HttpFeedFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFeedFetcher {
    /// Create a new HTTP feed fetcher
    ///
    /// # Parameters
    ///
    /// - `timeout`: Client-level timeout covering connect and body read
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .user_agent(concat!("vpnintel-updater/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
            timeout,
        }
    }

    /// Create with a caller-supplied client
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn transport_error(&self, url: &str, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(self.timeout)
        } else {
            Error::fetch(format!("request to {} failed: {}", url, e))
        }
    }
}

impl Default for HttpFeedFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>> {
        let mut builder = self.client.get(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let mut response = builder
            .send()
            .await
            .map_err(|e| self.transport_error(&request.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
            });
        }

        // u64 -> usize saturates on 32-bit targets, which still trips the cap
        let content_length: usize = response
            .content_length()
            .unwrap_or(0)
            .try_into()
            .unwrap_or(usize::MAX);

        if content_length > request.max_size {
            return Err(Error::ResponseTooLarge {
                size: content_length,
                max: request.max_size,
            });
        }

        let mut body = Vec::with_capacity(content_length);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.transport_error(&request.url, e))?
        {
            if body.len() + chunk.len() > request.max_size {
                return Err(Error::ResponseTooLarge {
                    size: body.len() + chunk.len(),
                    max: request.max_size,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!("Fetched {} bytes from {}", body.len(), request.url);
        Ok(body)
    }

    fn fetcher_name(&self) -> &'static str {
        "http"
    }
}
