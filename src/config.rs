//! Configuration loading via `ortho-config`.
//!
//! Each struct merges defaults, `pxrun.toml` discovered on the usual search
//! path, and environment variables. Validation runs before any network call so
//! a missing credential fails fast with a message naming both the environment
//! variable and the TOML key.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::transport::RetryPolicy;

const DEFAULT_HTTPS_PORT: u16 = 443;

/// Proxmox VE API credentials and endpoint.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "PROXMOX",
    discovery(
        app_name = "pxrun",
        env_var = "PXRUN_CONFIG_PATH",
        config_file_name = "pxrun.toml",
        dotfile_name = ".pxrun.toml",
        project_file_name = "pxrun.toml"
    )
)]
pub struct ProxmoxConfig {
    /// API host, optionally with scheme and port (`pve.example.com:8006`).
    pub host: String,
    /// API token id in `user@realm!tokenname` form.
    pub token_id: String,
    /// API token secret.
    pub token_secret: String,
    /// Whether to verify the API's TLS certificate. Self-signed clusters are
    /// common, so verification is off unless requested.
    #[ortho_config(default = false)]
    pub verify_ssl: bool,
    /// Storage searched when a template is given by short name.
    #[ortho_config(default = "local".to_owned())]
    pub template_storage: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in pxrun.toml",
            metadata.description, metadata.env_var, metadata.toml_key, metadata.section
        )));
    }
    Ok(())
}

fn load_args() -> [OsString; 1] {
    [OsString::from("pxrun")]
}

impl ProxmoxConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails, which includes a
    /// required value being absent from every source.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(load_args()).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.host,
            &FieldMetadata::new("Proxmox API host", "PROXMOX_HOST", "host", "proxmox"),
        )?;
        require_field(
            &self.token_id,
            &FieldMetadata::new(
                "Proxmox API token id",
                "PROXMOX_TOKEN_ID",
                "token_id",
                "proxmox",
            ),
        )?;
        require_field(
            &self.token_secret,
            &FieldMetadata::new(
                "Proxmox API token secret",
                "PROXMOX_TOKEN_SECRET",
                "token_secret",
                "proxmox",
            ),
        )?;
        Ok(())
    }

    /// Host and port with any scheme or trailing slash removed. Port 443 is
    /// assumed when none is given.
    #[must_use]
    pub fn authority(&self) -> String {
        let trimmed = self.host.trim();
        let without_scheme = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(trimmed)
            .trim_end_matches('/');
        if without_scheme.contains(':') {
            without_scheme.to_owned()
        } else {
            format!("{without_scheme}:{DEFAULT_HTTPS_PORT}")
        }
    }

    /// Root URL of the JSON API.
    #[must_use]
    pub fn api_base_url(&self) -> String {
        format!("https://{}/api2/json", self.authority())
    }

    /// Host name without port, used for exec-via-host SSH sessions.
    #[must_use]
    pub fn ssh_host(&self) -> String {
        let authority = self.authority();
        authority
            .rsplit_once(':')
            .map_or(authority.clone(), |(host, _)| host.to_owned())
    }
}

/// Tailscale registry credentials and the optional node auth key.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "TAILSCALE",
    discovery(
        app_name = "pxrun",
        env_var = "PXRUN_CONFIG_PATH",
        config_file_name = "pxrun.toml",
        dotfile_name = ".pxrun.toml",
        project_file_name = "pxrun.toml"
    )
)]
pub struct MeshConfig {
    /// API access token for the registry.
    pub api_key: String,
    /// Tailnet name (organisation or `-` for the token's default tailnet).
    pub tailnet: String,
    /// Auth key used to join new containers. May be a `${ENV_VAR}` reference.
    pub auth_key: Option<String>,
}

impl MeshConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(load_args()).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.api_key,
            &FieldMetadata::new(
                "Tailscale API key",
                "TAILSCALE_API_KEY",
                "api_key",
                "tailscale",
            ),
        )?;
        require_field(
            &self.tailnet,
            &FieldMetadata::new("tailnet", "TAILSCALE_TAILNET", "tailnet", "tailscale"),
        )?;
        Ok(())
    }
}

/// How provisioning commands reach the container.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportMode {
    /// `pct exec` on the hypervisor host over SSH.
    HostExec,
    /// SSH straight to the container's address.
    DirectSsh,
}

/// Provisioning transport settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "PXRUN_PROVISION",
    discovery(
        app_name = "pxrun",
        env_var = "PXRUN_CONFIG_PATH",
        config_file_name = "pxrun.toml",
        dotfile_name = ".pxrun.toml",
        project_file_name = "pxrun.toml"
    )
)]
pub struct ProvisionConfig {
    /// `exec` (through the hypervisor host) or `ssh` (direct to the container).
    #[ortho_config(default = "exec".to_owned())]
    pub transport: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Private key used for SSH sessions. Supports `~/` expansion. When the
    /// file is absent, sessions fall back to password authentication.
    pub ssh_identity_file: Option<String>,
    /// Connection attempts before a container is declared unreachable.
    #[ortho_config(default = 12)]
    pub ssh_retry_attempts: u32,
    /// Seconds between connection attempts.
    #[ortho_config(default = 5)]
    pub ssh_retry_delay_secs: u64,
    /// Per-attempt SSH connect timeout, in seconds.
    #[ortho_config(default = 10)]
    pub ssh_connect_timeout_secs: u64,
    /// User for SSH sessions to the hypervisor host.
    #[ortho_config(default = "root".to_owned())]
    pub host_user: String,
}

impl ProvisionConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(load_args()).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks values that have no sensible interpretation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown transport or a zero
    /// retry budget, and [`ConfigError::MissingField`] for blank binaries.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transport_mode()?;
        require_field(
            &self.ssh_bin,
            &FieldMetadata::new(
                "ssh executable",
                "PXRUN_PROVISION_SSH_BIN",
                "ssh_bin",
                "provision",
            ),
        )?;
        require_field(
            &self.host_user,
            &FieldMetadata::new(
                "hypervisor SSH user",
                "PXRUN_PROVISION_HOST_USER",
                "host_user",
                "provision",
            ),
        )?;
        if self.ssh_retry_attempts == 0 {
            return Err(ConfigError::Invalid(String::from(
                "ssh_retry_attempts must be at least 1",
            )));
        }
        if let Some(path) = self.ssh_identity_file.as_deref()
            && path.trim().is_empty()
        {
            return Err(ConfigError::Invalid(String::from(
                "ssh_identity_file must not be blank when set",
            )));
        }
        Ok(())
    }

    /// Parses [`ProvisionConfig::transport`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for anything other than `exec` or `ssh`.
    pub fn transport_mode(&self) -> Result<TransportMode, ConfigError> {
        match self.transport.trim().to_ascii_lowercase().as_str() {
            "exec" | "pct" => Ok(TransportMode::HostExec),
            "ssh" => Ok(TransportMode::DirectSsh),
            other => Err(ConfigError::Invalid(format!(
                "unknown transport '{other}': expected 'exec' or 'ssh'"
            ))),
        }
    }

    /// Reachability retry policy for direct SSH sessions.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.ssh_retry_attempts,
            Duration::from_secs(self.ssh_retry_delay_secs),
        )
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds a value that cannot be used.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
