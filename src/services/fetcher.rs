//! Upstream source fetching (playlist and guide documents)

use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use crate::services::metrics::SOURCE_FETCHES;

/// Upstream source could not be fetched
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network/connection error, including timeouts
    #[error("network error: {0}")]
    Network(String),
    /// HTTP error (non-2xx status)
    #[error("HTTP error: {0}")]
    Http(u16),
    /// Body could not be read
    #[error("failed to read body: {0}")]
    Body(String),
}

/// HTTP client for playlist/guide sources. No retries: a failure surfaces
/// immediately to the request that triggered the fetch.
#[derive(Clone)]
pub struct SourceFetcher {
    http: Client,
}

impl SourceFetcher {
    pub fn new(user_agent: &str, max_redirects: usize) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(max_redirects))
            .gzip(true)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self { http })
    }

    /// GET `url` and return the body as text
    pub async fn fetch_text(&self, source: &str, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let result = self.fetch_inner(url, timeout).await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        SOURCE_FETCHES.with_label_values(&[source, outcome]).inc();

        match &result {
            Ok(text) => tracing::info!(source, bytes = text.len(), "Fetched source"),
            Err(e) => tracing::error!(source, url, "Source fetch failed: {}", e),
        }

        result
    }

    async fn fetch_inner(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http(status.as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))
    }
}
