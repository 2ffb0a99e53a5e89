//! HTTP access for the providers.

use crate::error::CapabilityFailure;
use async_trait::async_trait;
use std::time::Duration;

/// One GET request returning the response body
///
/// Implementations make exactly one attempt; retries belong to the activity
/// retry policy.
#[async_trait]
pub trait HttpGetter: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String, CapabilityFailure>;
}

/// [`HttpGetter`] backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestGetter {
    client: reqwest::Client,
}

impl ReqwestGetter {
    pub fn new(timeout: Duration) -> Result<Self, CapabilityFailure> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("iplocate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CapabilityFailure::http("<client>", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpGetter for ReqwestGetter {
    async fn get_text(&self, url: &str) -> Result<String, CapabilityFailure> {
        tracing::debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CapabilityFailure::http(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CapabilityFailure::http(url, format!("status {}", status)));
        }

        response
            .text()
            .await
            .map_err(|e| CapabilityFailure::http(url, e))
    }
}
