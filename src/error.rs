use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ResourceType;

/// Errors returned by a cloud session when talking to the provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Request throttled by provider: {0}")]
    Throttled(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Access denied: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether the call may succeed if repeated after a delay
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Throttled(_) | ProviderError::Network(_) | ProviderError::Timeout
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_connect() || err.is_request() {
            ProviderError::Network(err.to_string())
        } else if err.is_decode() || err.is_body() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// Errors raised while listing the resources of one type
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DiscoveryError {
    #[error("Transient discovery failure: {0}")]
    Transient(String),

    #[error("Permanent discovery failure: {0}")]
    Permanent(String),
}

impl DiscoveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DiscoveryError::Transient(_))
    }
}

impl From<ProviderError> for DiscoveryError {
    fn from(err: ProviderError) -> Self {
        if err.is_transient() {
            DiscoveryError::Transient(err.to_string())
        } else {
            DiscoveryError::Permanent(err.to_string())
        }
    }
}

/// Error marker attached to a resource whose collection did not fully succeed
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CollectionError {
    #[error("Collection timed out")]
    Timeout,

    #[error("Collection rate limited")]
    RateLimited,

    #[error("Collection not authorized")]
    Unauthorized,

    #[error("Collection failed: {0}")]
    Unknown(String),
}

/// Fatal errors for a whole diagnostic run
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Discovery failed for every configured resource type ({} types)", .failures.len())]
    AllDiscoveryFailed {
        failures: Vec<(ResourceType, DiscoveryError)>,
    },

    #[error("Invalid settings: {0}")]
    InvalidSettings(#[from] ConfigError),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Errors that can occur when writing report files
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to serialize report: {0}")]
    SerializeError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
