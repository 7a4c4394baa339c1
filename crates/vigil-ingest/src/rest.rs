//! REST client for the degraded-mode fallback path.
//!
//! Polls venue depth endpoints at the configured cadence while the
//! WebSocket is down. Snapshots fetched here carry
//! `SnapshotSource::RestPoll` so downstream consumers can exclude them
//! from latency measurements.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::normalize::NormalizeError;

/// Errors raised on the REST fallback path.
#[derive(Debug, Error)]
pub enum RestError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    BadResponse(String),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

/// Thin wrapper around `reqwest::Client` bound to one venue base URL.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RestError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// GET a path (with query) relative to the venue base URL.
    pub async fn get_json(&self, path_and_query: &str) -> Result<Value, RestError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let response = self.http.get(&url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_construction() {
        let client = RestClient::new("https://fapi.binance.com", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "https://fapi.binance.com");
    }
}
