//! Core library for `pxrun`, a provisioning tool for LXC containers on a
//! Proxmox VE cluster.
//!
//! The crate places containers on the least loaded node that fits, tracks the
//! cluster's asynchronous tasks, provisions new containers over SSH (directly
//! or through `pct exec` on the host), and removes the matching Tailscale
//! entry when a container is destroyed. [`lifecycle::Orchestrator`] ties the
//! pieces together; every external system sits behind a trait so the flows
//! run against in-memory stand-ins in [`test_support`].

pub mod config;
pub mod gateway;
pub mod hypervisor;
pub mod lifecycle;
pub mod mesh;
pub mod placement;
pub mod prompt;
pub mod provision;
pub mod task;
pub mod test_support;
pub mod transport;

pub use config::{ConfigError, MeshConfig, ProvisionConfig, ProxmoxConfig, TransportMode};
pub use hypervisor::{HypervisorError, HypervisorGateway, ProxmoxClient};
pub use lifecycle::{
    CreateOutcome, CreateRequest, DestroyOutcome, DestroyRequest, LifecycleError, Orchestrator,
    ProvisioningStatus, SshTransportFactory,
};
pub use mesh::{MeshError, MeshNode, MeshRegistry, MeshRegistryReconciler, TailscaleClient};
pub use placement::{ResourceRequirement, SelectionStrategy};
pub use prompt::{Confirm, StdinConfirm};
pub use provision::{ProvisioningEngine, ProvisioningSpec};
pub use task::{TaskOutcome, TaskTracker};
pub use transport::{CommandTransport, TransportKind};
