//! Error types for the hypervisor gateway.

use thiserror::Error;

use crate::config::ConfigError;
use crate::placement::RequirementError;

/// Errors raised while talking to the hypervisor API.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HypervisorError {
    /// Raised when client configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when a container request is internally inconsistent.
    #[error("invalid container request: {0}")]
    Validation(String),
    /// Raised when the API cannot be reached at all.
    #[error("cannot reach Proxmox API at {host}: {message}")]
    Connectivity {
        /// Host the client was configured with.
        host: String,
        /// Transport error text.
        message: String,
    },
    /// Raised when the API token is rejected.
    #[error("Proxmox API rejected the API token (HTTP {status}); check PROXMOX_TOKEN_ID and PROXMOX_TOKEN_SECRET")]
    Authentication {
        /// HTTP status returned by the API.
        status: u16,
    },
    /// Raised when an API call returns a non-success status.
    #[error("Proxmox API call {path} failed with HTTP {status}: {message}")]
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

impl From<RequirementError> for HypervisorError {
    fn from(value: RequirementError) -> Self {
        Self::Validation(value.to_string())
    }
}

impl From<ConfigError> for HypervisorError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
