//! Public address, geolocation and timezone lookups.

use crate::activities::http::HttpGetter;
use crate::config::ProviderConfig;
use crate::error::CapabilityFailure;
use serde::Deserialize;
use std::sync::Arc;

const TIMEZONE_FIELDS: &str = "status,message,timezone";

/// Body of an ip-api `/json/{ip}` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    region_name: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    timezone: String,
}

/// Client for ipify and ip-api
#[derive(Clone)]
pub struct IpLocator {
    http: Arc<dyn HttpGetter>,
    ipify_url: String,
    ip_api_url: String,
}

impl IpLocator {
    pub fn new(
        http: Arc<dyn HttpGetter>,
        ipify_url: impl Into<String>,
        ip_api_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            ipify_url: ipify_url.into(),
            ip_api_url: ip_api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(http: Arc<dyn HttpGetter>, config: &ProviderConfig) -> Self {
        Self::new(http, &config.ipify_url, &config.ip_api_url)
    }

    /// Public address of this host
    #[tracing::instrument(skip(self))]
    pub async fn get_ip(&self) -> Result<String, CapabilityFailure> {
        let body = self.http.get_text(&self.ipify_url).await?;
        let ip = body.trim();
        if ip.is_empty() {
            return Err(CapabilityFailure::decode(&self.ipify_url, "empty body"));
        }
        tracing::info!(ip, "resolved public address");
        Ok(ip.to_string())
    }

    /// Human readable location of `ip`
    #[tracing::instrument(skip(self))]
    pub async fn get_location_info(&self, ip: &str) -> Result<String, CapabilityFailure> {
        let url = format!("{}/json/{}", self.ip_api_url, ip);
        let response = self.fetch(&url).await?;
        let location = format!(
            "City: {}, Region: {}, Country: {}",
            response.city, response.region_name, response.country
        );
        tracing::info!(%location, "resolved location");
        Ok(location)
    }

    /// IANA timezone of `ip`
    #[tracing::instrument(skip(self))]
    pub async fn get_timezone(&self, ip: &str) -> Result<String, CapabilityFailure> {
        let url = format!("{}/json/{}?fields={}", self.ip_api_url, ip, TIMEZONE_FIELDS);
        let response = self.fetch(&url).await?;
        tracing::info!(timezone = %response.timezone, "resolved timezone");
        Ok(response.timezone)
    }

    async fn fetch(&self, url: &str) -> Result<IpApiResponse, CapabilityFailure> {
        let body = self.http.get_text(url).await?;
        let response: IpApiResponse =
            serde_json::from_str(&body).map_err(|e| CapabilityFailure::decode(url, e))?;
        if response.status == "fail" {
            return Err(CapabilityFailure::Provider(response.message));
        }
        Ok(response)
    }
}
