//! Error types for container lifecycle flows.

use thiserror::Error;

use crate::hypervisor::HypervisorError;
use crate::placement::RequirementError;
use crate::provision::ProvisioningError;

/// Errors raised while creating or destroying a container.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Raised when a hypervisor call fails.
    #[error(transparent)]
    Hypervisor(#[from] HypervisorError),
    /// Raised when the resource request is malformed.
    #[error("invalid resource request: {0}")]
    Requirement(#[from] RequirementError),
    /// Raised when the request fails validation before any call is made.
    #[error("invalid request: {0}")]
    Invalid(String),
    /// Raised when no node satisfies the request.
    #[error("no node has enough free capacity with the requested storage pool and bridge; pass --node to choose one")]
    NoPlacement,
    /// Raised when a template short name matches nothing on the template
    /// storage.
    #[error("no template matching '{template}' on storage '{storage}' of node {node}")]
    TemplateNotFound {
        /// Name the operator gave.
        template: String,
        /// Storage searched.
        storage: String,
        /// Node the storage was listed from.
        node: String,
    },
    /// Raised when a cluster task stops with a failure status.
    #[error("{action} failed: {message}")]
    TaskFailed {
        /// What the task was doing (`create`, `destroy`, ...).
        action: &'static str,
        /// Outcome description.
        message: String,
    },
    /// Raised when a cluster task is still running after its budget.
    #[error("{action} of container {vmid} did not finish within {seconds} seconds; it may still be running")]
    TaskTimeout {
        /// What the task was doing.
        action: &'static str,
        /// Container the task acts on.
        vmid: u32,
        /// Budget that ran out.
        seconds: u64,
    },
    /// Raised when no node hosts the container.
    #[error("container {vmid} not found")]
    NotFound {
        /// Container id searched for.
        vmid: u32,
    },
    /// Raised when direct SSH provisioning has no address to connect to.
    #[error("container {vmid} reports no address; set a static --ip or use the exec transport")]
    MissingAddress {
        /// Container id.
        vmid: u32,
    },
    /// Raised when provisioning stops early.
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
    /// Raised when the operator declines to continue.
    #[error("cancelled")]
    Aborted,
}
