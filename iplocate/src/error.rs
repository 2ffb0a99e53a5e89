//! Application errors.

use iplocate_worker::ActivityError;
use thiserror::Error;

/// Failure of a single provider call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityFailure {
    #[error("HTTP request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    /// The provider answered and reported a failure
    #[error("API error: {0}")]
    Provider(String),
}

impl CapabilityFailure {
    pub fn http(url: &str, err: impl std::fmt::Display) -> Self {
        Self::Http {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    pub fn decode(url: &str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    /// Network and parse failures may succeed on another attempt; a failure
    /// reported by the provider will not
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CapabilityFailure::Provider(_))
    }
}

impl From<CapabilityFailure> for ActivityError {
    fn from(err: CapabilityFailure) -> Self {
        if err.is_retryable() {
            ActivityError::retryable(err.to_string())
        } else {
            ActivityError::non_retryable(err.to_string())
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_failures_are_not_retried() {
        let err: ActivityError = CapabilityFailure::Provider("reserved range".to_string()).into();
        assert!(!err.is_retryable());
        assert_eq!(err.message(), "API error: reserved range");

        let err: ActivityError = CapabilityFailure::http("http://ip-api.com", "connection reset").into();
        assert!(err.is_retryable());
        assert!(err.message().contains("connection reset"));
    }
}
