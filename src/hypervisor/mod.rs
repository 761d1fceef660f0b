//! Hypervisor gateway abstraction and its Proxmox VE implementation.
//!
//! The orchestration layer only talks to the cluster through
//! [`HypervisorGateway`], so tests can substitute an in-memory cluster.

mod api;
mod error;
mod proxmox;

use std::collections::BTreeSet;
use std::net::IpAddr;

use crate::gateway::GatewayFuture;
use crate::placement::ResourceRequirement;

pub use error::HypervisorError;
pub use proxmox::ProxmoxClient;

/// Cluster member as reported by the node listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClusterNode {
    /// Node name.
    pub name: String,
    /// Whether the cluster reports the node as online.
    pub online: bool,
    /// Physical core count.
    pub max_cores: u32,
    /// Installed memory, in bytes.
    pub max_memory_bytes: u64,
    /// Memory in use, in bytes.
    pub used_memory_bytes: u64,
}

/// Storage pool visible from a node.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StoragePool {
    /// Storage identifier (for example `local-lvm`).
    pub name: String,
    /// Content types the pool accepts (`rootdir`, `vztmpl`, `images`, ...).
    pub content: BTreeSet<String>,
    /// Whether the pool is currently active on the node.
    pub active: bool,
    /// Free space, in bytes.
    pub available_bytes: u64,
    /// Total size, in bytes.
    pub total_bytes: u64,
}

impl StoragePool {
    /// Returns `true` when the pool can hold container root filesystems.
    #[must_use]
    pub fn supports_containers(&self) -> bool {
        self.content.contains("rootdir")
    }

    /// Returns `true` when the pool stores container templates.
    #[must_use]
    pub fn supports_templates(&self) -> bool {
        self.content.contains("vztmpl")
    }
}

/// Container template stored on a pool.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Template {
    /// Volume identifier passed as `ostemplate` (for example
    /// `local:vztmpl/debian-12-standard_12.2-1_amd64.tar.zst`).
    pub volid: String,
    /// Size of the archive, in bytes.
    pub size_bytes: u64,
}

/// Power state of a container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContainerState {
    /// Container is running.
    Running,
    /// Container is stopped.
    Stopped,
    /// Any other state string reported by the cluster.
    Other(String),
}

impl From<&str> for ContainerState {
    fn from(value: &str) -> Self {
        match value {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// Container entry from a node's container listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerSummary {
    /// Numeric container id.
    pub vmid: u32,
    /// Node hosting the container.
    pub node: String,
    /// Configured hostname, when set.
    pub name: Option<String>,
    /// Power state.
    pub state: ContainerState,
    /// Allocated cores.
    pub cores: u32,
}

impl ContainerSummary {
    /// Hostname, falling back to `ct<vmid>` when the container has none.
    #[must_use]
    pub fn hostname(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("ct{}", self.vmid))
    }
}

/// Handle to a cluster-side asynchronous operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AsyncTask {
    /// Node running the task.
    pub node: String,
    /// Opaque task id (a Proxmox UPID).
    pub id: String,
}

/// Task lifecycle state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskState {
    /// Task is still executing.
    Running,
    /// Task has finished; see the exit status.
    Stopped,
}

/// Result of one task status poll.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskStatus {
    /// Lifecycle state.
    pub state: TaskState,
    /// Exit status once stopped (`OK` on success).
    pub exit_status: Option<String>,
}

impl TaskStatus {
    /// Status of a task that has not finished.
    #[must_use]
    pub const fn running() -> Self {
        Self {
            state: TaskState::Running,
            exit_status: None,
        }
    }

    /// Status of a finished task.
    #[must_use]
    pub fn stopped(exit_status: impl Into<String>) -> Self {
        Self {
            state: TaskState::Stopped,
            exit_status: Some(exit_status.into()),
        }
    }
}

/// Network configuration for the container's first interface.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum IpConfig {
    /// Address assigned by DHCP.
    #[default]
    Dhcp,
    /// Static address in CIDR form with an optional gateway.
    Static {
        /// Address with prefix length (for example `10.0.0.5/24`).
        cidr: String,
        /// Default gateway.
        gateway: Option<String>,
    },
}

impl IpConfig {
    /// Parses the operator's `--ip` value (`dhcp` or a CIDR address).
    #[must_use]
    pub fn parse(ip: Option<&str>, gateway: Option<&str>) -> Self {
        match ip.map(str::trim) {
            None | Some("") => Self::Dhcp,
            Some(value) if value.eq_ignore_ascii_case("dhcp") => Self::Dhcp,
            Some(value) => Self::Static {
                cidr: value.to_owned(),
                gateway: gateway.map(str::to_owned),
            },
        }
    }

    /// Address without its prefix length, when statically configured.
    #[must_use]
    pub fn static_address(&self) -> Option<IpAddr> {
        match self {
            Self::Dhcp => None,
            Self::Static { cidr, .. } => {
                let address = cidr.split('/').next().unwrap_or(cidr);
                address.parse().ok()
            }
        }
    }
}

/// Everything needed to create a container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerSpec {
    /// Numeric container id.
    pub vmid: u32,
    /// Hostname inside the container.
    pub hostname: String,
    /// Template volume id.
    pub template: String,
    /// Node that will host the container.
    pub node: String,
    /// Resource allocation, storage pool and bridge.
    pub resources: ResourceRequirement,
    /// Address configuration for `eth0`.
    pub ip: IpConfig,
    /// Whether to create an unprivileged container.
    pub unprivileged: bool,
    /// Whether to enable nesting (required for Docker inside LXC).
    pub nesting: bool,
    /// Public keys injected for `root` at creation time.
    pub ssh_public_keys: Vec<String>,
}

impl ContainerSpec {
    /// Checks the request before any mutating call is made.
    ///
    /// # Errors
    ///
    /// Returns [`HypervisorError::Validation`] when a field is unusable.
    pub fn validate(&self) -> Result<(), HypervisorError> {
        if self.vmid < MIN_VMID {
            return Err(HypervisorError::Validation(format!(
                "vmid {} is below the minimum of {MIN_VMID}",
                self.vmid
            )));
        }
        if !is_valid_hostname(&self.hostname) {
            return Err(HypervisorError::Validation(format!(
                "hostname '{}' is not a valid DNS label",
                self.hostname
            )));
        }
        if self.template.trim().is_empty() {
            return Err(HypervisorError::Validation(String::from(
                "template must not be empty",
            )));
        }
        if self.node.trim().is_empty() {
            return Err(HypervisorError::Validation(String::from(
                "node must not be empty",
            )));
        }
        self.resources.validate()?;
        Ok(())
    }
}

/// Smallest vmid Proxmox hands out.
pub const MIN_VMID: u32 = 100;

/// Returns `true` when `hostname` is a single DNS label.
#[must_use]
pub fn is_valid_hostname(hostname: &str) -> bool {
    !hostname.is_empty()
        && hostname.len() <= 63
        && !hostname.starts_with('-')
        && !hostname.ends_with('-')
        && hostname
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
}

/// Narrow request/response interface to the hypervisor API.
pub trait HypervisorGateway {
    /// Lists cluster nodes.
    fn list_nodes(&self) -> GatewayFuture<'_, Vec<ClusterNode>, HypervisorError>;

    /// Lists bridge interface names configured on `node`.
    fn node_bridges<'a>(&'a self, node: &'a str)
    -> GatewayFuture<'a, Vec<String>, HypervisorError>;

    /// Lists storage pools visible from `node`.
    fn storage_pools<'a>(
        &'a self,
        node: &'a str,
    ) -> GatewayFuture<'a, Vec<StoragePool>, HypervisorError>;

    /// Lists container templates held on `storage` as seen from `node`.
    fn templates<'a>(
        &'a self,
        node: &'a str,
        storage: &'a str,
    ) -> GatewayFuture<'a, Vec<Template>, HypervisorError>;

    /// Returns the next free container id.
    fn next_vmid(&self) -> GatewayFuture<'_, u32, HypervisorError>;

    /// Starts container creation.
    fn create_container<'a>(
        &'a self,
        spec: &'a ContainerSpec,
    ) -> GatewayFuture<'a, AsyncTask, HypervisorError>;

    /// Lists containers hosted on `node`.
    fn list_containers<'a>(
        &'a self,
        node: &'a str,
    ) -> GatewayFuture<'a, Vec<ContainerSummary>, HypervisorError>;

    /// Returns the container's power state, or `None` when it does not exist.
    fn container_state<'a>(
        &'a self,
        node: &'a str,
        vmid: u32,
    ) -> GatewayFuture<'a, Option<ContainerState>, HypervisorError>;

    /// Returns the non-loopback addresses the container reports.
    fn container_addresses<'a>(
        &'a self,
        node: &'a str,
        vmid: u32,
    ) -> GatewayFuture<'a, Vec<IpAddr>, HypervisorError>;

    /// Starts the container.
    fn start_container<'a>(
        &'a self,
        node: &'a str,
        vmid: u32,
    ) -> GatewayFuture<'a, AsyncTask, HypervisorError>;

    /// Stops the container.
    fn stop_container<'a>(
        &'a self,
        node: &'a str,
        vmid: u32,
    ) -> GatewayFuture<'a, AsyncTask, HypervisorError>;

    /// Destroys the container, optionally purging it from backup jobs and
    /// replication.
    fn destroy_container<'a>(
        &'a self,
        node: &'a str,
        vmid: u32,
        purge: bool,
    ) -> GatewayFuture<'a, AsyncTask, HypervisorError>;

    /// Polls the status of an asynchronous task.
    fn task_status<'a>(
        &'a self,
        task: &'a AsyncTask,
    ) -> GatewayFuture<'a, TaskStatus, HypervisorError>;
}

#[cfg(test)]
mod tests;
