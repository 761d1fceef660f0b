//! Error types for the mesh registry gateway.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised while talking to the mesh registry.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MeshError {
    /// Raised when API credentials are missing.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the registry cannot be reached.
    #[error("cannot reach mesh registry: {0}")]
    Connectivity(String),
    /// Raised when the API key is rejected.
    #[error("mesh registry rejected the API key (HTTP {status}); check TAILSCALE_API_KEY")]
    Authentication {
        /// HTTP status returned by the API.
        status: u16,
    },
    /// Raised when an API call returns a non-success status.
    #[error("mesh registry call {path} failed with HTTP {status}: {message}")]
    Api {
        /// Request path relative to the API root.
        path: String,
        /// HTTP status returned by the API.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },
    /// Raised when a response body does not have the expected shape.
    #[error("unexpected response from {path}: {message}")]
    Decode {
        /// Request path relative to the API root.
        path: String,
        /// Decoder error text.
        message: String,
    },
}

impl From<ConfigError> for MeshError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
