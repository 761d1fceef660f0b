//! Construction of provisioning transports for a freshly created container.

use std::net::IpAddr;
use std::time::Duration;

use crate::config::{ConfigError, ProvisionConfig, ProxmoxConfig, TransportMode};
use crate::transport::{
    CommandRunner, CommandTransport, DirectSshTransport, HostExecTransport, HostShellTransport,
    ProcessCommandRunner, RetryPolicy, SshAuth, SshEndpoint, SshOptions, TransportKind,
};

use super::LifecycleError;

/// User the direct transport logs in as.
pub const CONTAINER_USER: &str = "root";

/// Container a transport is built for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionTarget {
    /// Container id.
    pub vmid: u32,
    /// Node hosting the container.
    pub node: String,
    /// Address the container is reachable on, when known.
    pub address: Option<IpAddr>,
}

/// Builds the transport provisioning runs over.
pub trait TransportFactory {
    /// Variant this factory builds.
    fn kind(&self) -> TransportKind;

    /// Builds an unopened transport for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::MissingAddress`] when the variant needs an
    /// address and `target` has none.
    fn build(&self, target: &ProvisionTarget) -> Result<Box<dyn CommandTransport>, LifecycleError>;

    /// Builds an unopened transport running commands on the hypervisor host
    /// rather than in a guest.
    fn build_host(&self) -> Box<dyn CommandTransport>;

    /// How long to keep asking a new container for an address before direct
    /// provisioning gives up.
    fn address_retry(&self) -> RetryPolicy;
}

/// Builds SSH-backed transports: `pct exec` through the hypervisor host, or
/// direct sessions to the container.
#[derive(Clone, Debug)]
pub struct SshTransportFactory<R> {
    runner: R,
    mode: TransportMode,
    options: SshOptions,
    host: SshEndpoint,
    retry: RetryPolicy,
}

impl SshTransportFactory<ProcessCommandRunner> {
    /// Factory spawning the system `ssh` client, configured from `provision`
    /// and targeting the API host of `proxmox` for exec sessions.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the provisioning settings are invalid.
    pub fn from_config(
        provision: &ProvisionConfig,
        proxmox: &ProxmoxConfig,
    ) -> Result<Self, ConfigError> {
        provision.validate()?;
        let options = SshOptions {
            ssh_bin: provision.ssh_bin.clone(),
            connect_timeout: Duration::from_secs(provision.ssh_connect_timeout_secs),
            auth: SshAuth::detect(provision.ssh_identity_file.as_deref()),
        };
        Ok(Self::new(
            ProcessCommandRunner,
            provision.transport_mode()?,
            options,
            SshEndpoint::new(proxmox.ssh_host(), provision.host_user.clone()),
            provision.retry_policy(),
        ))
    }
}

impl<R> SshTransportFactory<R> {
    /// Factory running `ssh` through `runner`.
    pub const fn new(
        runner: R,
        mode: TransportMode,
        options: SshOptions,
        host: SshEndpoint,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            runner,
            mode,
            options,
            host,
            retry,
        }
    }
}

impl<R: CommandRunner + Clone + 'static> TransportFactory for SshTransportFactory<R> {
    fn kind(&self) -> TransportKind {
        match self.mode {
            TransportMode::HostExec => TransportKind::HostExec,
            TransportMode::DirectSsh => TransportKind::DirectSsh,
        }
    }

    fn build(&self, target: &ProvisionTarget) -> Result<Box<dyn CommandTransport>, LifecycleError> {
        match self.mode {
            TransportMode::HostExec => Ok(Box::new(HostExecTransport::new(
                self.runner.clone(),
                self.options.clone(),
                self.host.clone(),
                target.vmid,
            ))),
            TransportMode::DirectSsh => {
                let address = target
                    .address
                    .ok_or(LifecycleError::MissingAddress { vmid: target.vmid })?;
                Ok(Box::new(DirectSshTransport::new(
                    self.runner.clone(),
                    self.options.clone(),
                    SshEndpoint::new(address.to_string(), CONTAINER_USER),
                    self.retry,
                )))
            }
        }
    }

    fn build_host(&self) -> Box<dyn CommandTransport> {
        Box::new(HostShellTransport::new(
            self.runner.clone(),
            self.options.clone(),
            self.host.clone(),
        ))
    }

    fn address_retry(&self) -> RetryPolicy {
        self.retry
    }
}
