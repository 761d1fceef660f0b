//! Command-line interface definitions for the `pxrun` binary.
//!
//! Kept free of crate imports so the build script can include this file and
//! render the manual page from the same parser.

use clap::{Parser, ValueEnum};

/// Top-level CLI for the `pxrun` binary.
#[derive(Debug, Parser)]
#[command(
    name = "pxrun",
    about = "Provision and decommission LXC containers on a Proxmox VE cluster",
    version,
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create, start and provision a container.
    #[command(name = "create", about = "Create, start and provision a container")]
    Create(CreateCommand),
    /// Destroy a container and remove its mesh entry.
    #[command(name = "destroy", about = "Destroy a container and remove its mesh entry")]
    Destroy(DestroyCommand),
    /// List machines joined to the mesh network.
    #[command(name = "mesh-nodes", about = "List machines joined to the mesh network")]
    MeshNodes(MeshNodesCommand),
}

/// Arguments for `pxrun create`.
#[derive(Debug, Parser)]
pub(crate) struct CreateCommand {
    /// Hostname inside the container.
    #[arg(long, value_name = "NAME")]
    pub(crate) hostname: String,
    /// Template volume id (`local:vztmpl/...`) or a file-name prefix looked
    /// up on the template storage.
    #[arg(long, value_name = "TEMPLATE")]
    pub(crate) template: String,
    /// Node to create on. Without it the least loaded node that fits is used.
    #[arg(long, value_name = "NODE")]
    pub(crate) node: Option<String>,
    /// CPU cores.
    #[arg(long, default_value_t = 2)]
    pub(crate) cores: u32,
    /// Memory in MiB.
    #[arg(long, value_name = "MIB", default_value_t = 2048)]
    pub(crate) memory: u64,
    /// Root disk size in GiB.
    #[arg(long, value_name = "GIB", default_value_t = 10)]
    pub(crate) storage: u64,
    /// Storage pool holding the root disk.
    #[arg(long, value_name = "POOL", default_value = "local-lvm")]
    pub(crate) storage_pool: String,
    /// Bridge the first interface attaches to.
    #[arg(long, value_name = "BRIDGE", default_value = "vmbr0")]
    pub(crate) network_bridge: String,
    /// Address in CIDR form, or `dhcp`.
    #[arg(long, value_name = "CIDR")]
    pub(crate) ip: Option<String>,
    /// Default gateway for a static address.
    #[arg(long, value_name = "ADDRESS", requires = "ip")]
    pub(crate) gateway: Option<String>,
    /// Public key authorised for root. Repeatable.
    #[arg(long = "ssh-key", value_name = "KEY")]
    pub(crate) ssh_keys: Vec<String>,
    /// Package installed after start. Repeatable.
    #[arg(long = "package", value_name = "PACKAGE")]
    pub(crate) packages: Vec<String>,
    /// Install Docker Engine (enables nesting).
    #[arg(long)]
    pub(crate) docker: bool,
    /// Join the mesh network with the configured auth key.
    #[arg(long)]
    pub(crate) tailscale: bool,
    /// Auth key used by `--tailscale`; `${VAR}` reads another variable.
    #[arg(long, value_name = "KEY", env = "TAILSCALE_AUTH_KEY", hide_env_values = true)]
    pub(crate) tailscale_auth_key: Option<String>,
    /// Create a privileged container.
    #[arg(long)]
    pub(crate) privileged: bool,
    /// Enable nesting.
    #[arg(long)]
    pub(crate) nesting: bool,
    /// Leave the container stopped after creation.
    #[arg(long)]
    pub(crate) no_start: bool,
    /// Skip post-start provisioning.
    #[arg(long)]
    pub(crate) no_provision: bool,
    /// Resolve node, template and id, print the plan, and change nothing.
    #[arg(long)]
    pub(crate) dry_run: bool,
}

/// Arguments for `pxrun destroy`.
#[derive(Debug, Parser)]
pub(crate) struct DestroyCommand {
    /// Container id.
    #[arg(value_name = "VMID")]
    pub(crate) vmid: u32,
    /// Skip every confirmation.
    #[arg(long, short)]
    pub(crate) force: bool,
    /// Keep backup job and replication entries for the container.
    #[arg(long)]
    pub(crate) no_purge: bool,
}

/// Arguments for `pxrun mesh-nodes`.
#[derive(Debug, Parser)]
pub(crate) struct MeshNodesCommand {
    /// Only list machines currently connected.
    #[arg(long)]
    pub(crate) online_only: bool,
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub(crate) format: OutputFormat,
}

/// Rendering of listings.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Aligned columns.
    Table,
    /// Pretty-printed JSON array.
    Json,
}
