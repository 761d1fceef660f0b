//! Binary entry point for the `pxrun` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use pxrun::hypervisor::{ContainerSpec, IpConfig};
use pxrun::lifecycle::{
    CreateOutcome, CreateRequest, DestroyOutcome, DestroyRequest, LifecycleError, Orchestrator,
    ProvisioningStatus, SshTransportFactory,
};
use pxrun::mesh::{MeshError, MeshNode, MeshRegistryReconciler, RemovalOutcome, TailscaleClient};
use pxrun::placement::ResourceRequirement;
use pxrun::provision::{self, ProvisioningSpec};
use pxrun::transport::{ProcessCommandRunner, TransportKind};
use pxrun::{
    ConfigError, HypervisorError, MeshConfig, ProvisionConfig, ProxmoxClient, ProxmoxConfig,
    StdinConfirm,
};

mod cli;

use cli::{Cli, CreateCommand, DestroyCommand, MeshNodesCommand, OutputFormat};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Hypervisor(#[from] HypervisorError),
    #[error(transparent)]
    Mesh(#[from] MeshError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("cannot write output: {0}")]
    Output(#[from] io::Error),
    #[error("cannot render JSON: {0}")]
    Json(#[from] serde_json::Error),
}

type CliOrchestrator = Orchestrator<
    ProxmoxClient,
    SshTransportFactory<ProcessCommandRunner>,
    StdinConfirm,
    TailscaleClient,
>;

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Create(args) => create_command(&args).await,
        Cli::Destroy(args) => destroy_command(&args).await,
        Cli::MeshNodes(args) => mesh_nodes_command(&args).await,
    }
}

fn load_proxmox() -> Result<ProxmoxConfig, CliError> {
    let config = ProxmoxConfig::load_without_cli_args()?;
    config.validate()?;
    Ok(config)
}

fn build_orchestrator(mesh: Option<TailscaleClient>) -> Result<CliOrchestrator, CliError> {
    let proxmox = load_proxmox()?;
    let provision = ProvisionConfig::load_without_cli_args()?;
    let factory = SshTransportFactory::from_config(&provision, &proxmox)?;
    let storage = proxmox.template_storage.clone();
    let gateway = ProxmoxClient::new(&proxmox)?;
    Ok(Orchestrator::new(gateway, factory, StdinConfirm, mesh).with_template_storage(storage))
}

async fn create_command(args: &CreateCommand) -> Result<i32, CliError> {
    let request = create_request(args)?;
    let orchestrator = build_orchestrator(None)?;

    if args.dry_run {
        let spec = orchestrator.plan_create(&request).await?;
        let kind = orchestrator.transport_kind();
        write_plan(&mut io::stdout().lock(), &spec, &request, kind)?;
        return Ok(0);
    }

    let outcome = orchestrator.create(&request).await?;
    write_create_outcome(&mut io::stdout().lock(), &outcome)?;
    Ok(match outcome.provisioning {
        ProvisioningStatus::Failed(_) => 1,
        ProvisioningStatus::Skipped | ProvisioningStatus::Completed(_) => 0,
    })
}

async fn destroy_command(args: &DestroyCommand) -> Result<i32, CliError> {
    let mut orchestrator = build_orchestrator(mesh_client())?;
    orchestrator.gateway().version().await?;
    let request = DestroyRequest {
        vmid: args.vmid,
        force: args.force,
        purge: !args.no_purge,
    };
    let outcome = orchestrator.destroy(&request).await?;
    write_destroy_outcome(&mut io::stdout().lock(), &outcome)?;
    Ok(0)
}

async fn mesh_nodes_command(args: &MeshNodesCommand) -> Result<i32, CliError> {
    let config = MeshConfig::load_without_cli_args()?;
    config.validate()?;
    let mut reconciler = MeshRegistryReconciler::new(TailscaleClient::new(&config)?, StdinConfirm);
    let nodes = reconciler.list(args.online_only).await?;
    let mut stdout = io::stdout().lock();
    match args.format {
        OutputFormat::Table => write_node_table(&mut stdout, &nodes)?,
        OutputFormat::Json => writeln!(stdout, "{}", serde_json::to_string_pretty(&nodes)?)?,
    }
    Ok(0)
}

/// Mesh cleanup is best effort: without usable registry credentials destroy
/// proceeds and only logs why.
fn mesh_client() -> Option<TailscaleClient> {
    let client = MeshConfig::load_without_cli_args()
        .and_then(|config| config.validate().map(|()| config))
        .map_err(|err| err.to_string())
        .and_then(|config| TailscaleClient::new(&config).map_err(|err| err.to_string()));
    match client {
        Ok(client) => Some(client),
        Err(reason) => {
            tracing::info!(reason = %reason, "mesh cleanup disabled");
            None
        }
    }
}

fn create_request(args: &CreateCommand) -> Result<CreateRequest, CliError> {
    let resources = ResourceRequirement::builder()
        .cores(args.cores)
        .memory_mb(args.memory)
        .storage_gb(args.storage)
        .storage_pool(args.storage_pool.as_str())
        .network_bridge(args.network_bridge.as_str())
        .build()
        .map_err(LifecycleError::from)?;
    let ip = IpConfig::parse(args.ip.as_deref(), args.gateway.as_deref());
    if args.gateway.is_some() && ip == IpConfig::Dhcp {
        return Err(CliError::InvalidArgument(String::from(
            "--gateway needs a static --ip address",
        )));
    }

    Ok(CreateRequest {
        hostname: args.hostname.clone(),
        template: args.template.clone(),
        node: args.node.clone(),
        resources,
        ip,
        unprivileged: !args.privileged,
        nesting: args.nesting || args.docker,
        ssh_public_keys: args.ssh_keys.clone(),
        start: !args.no_start,
        provisioning: provisioning_spec(args)?,
    })
}

fn provisioning_spec(args: &CreateCommand) -> Result<Option<ProvisioningSpec>, CliError> {
    if args.no_provision {
        return Ok(None);
    }
    let mesh_auth_key = if args.tailscale {
        Some(tailscale_auth_key(args)?)
    } else {
        None
    };
    Ok(Some(ProvisioningSpec {
        ssh_keys: args.ssh_keys.clone(),
        packages: args.packages.clone(),
        install_docker: args.docker,
        mesh_auth_key,
    }))
}

fn tailscale_auth_key(args: &CreateCommand) -> Result<String, CliError> {
    args.tailscale_auth_key
        .clone()
        .or_else(|| {
            MeshConfig::load_without_cli_args()
                .ok()
                .and_then(|config| config.auth_key)
        })
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            CliError::InvalidArgument(String::from(
                "--tailscale needs an auth key; pass --tailscale-auth-key or set TAILSCALE_AUTH_KEY",
            ))
        })
}

fn describe_network(ip: &IpConfig) -> String {
    match ip {
        IpConfig::Dhcp => String::from("dhcp"),
        IpConfig::Static {
            cidr,
            gateway: Some(gateway),
        } => format!("{cidr} via {gateway}"),
        IpConfig::Static { cidr, gateway: None } => cidr.clone(),
    }
}

fn write_plan(
    out: &mut impl Write,
    spec: &ContainerSpec,
    request: &CreateRequest,
    kind: TransportKind,
) -> io::Result<()> {
    let resources = &spec.resources;
    writeln!(out, "Dry run: nothing was changed.")?;
    writeln!(out, "  vmid:      {}", spec.vmid)?;
    writeln!(out, "  hostname:  {}", spec.hostname)?;
    writeln!(out, "  node:      {}", spec.node)?;
    writeln!(out, "  template:  {}", spec.template)?;
    writeln!(
        out,
        "  resources: {} cores, {} MiB memory, {} GiB on {}",
        resources.cores, resources.memory_mb, resources.storage_gb, resources.storage_pool
    )?;
    writeln!(
        out,
        "  network:   {} on {}",
        describe_network(&spec.ip),
        resources.network_bridge
    )?;

    let Some(provisioning) = request
        .provisioning
        .as_ref()
        .filter(|provisioning| !provisioning.is_empty())
    else {
        return Ok(());
    };
    if provisioning.mesh_auth_key.is_some() {
        writeln!(out, "Before start: pass /dev/net/tun through for Tailscale")?;
    }
    writeln!(out, "Provisioning over {kind}:")?;
    for (position, step) in provision::plan(provisioning, kind).iter().enumerate() {
        writeln!(out, "  {}. {}", position + 1, step.description)?;
    }
    Ok(())
}

fn write_create_outcome(out: &mut impl Write, outcome: &CreateOutcome) -> io::Result<()> {
    let spec = &outcome.spec;
    writeln!(
        out,
        "Created container {} (VMID {}) on {}",
        spec.hostname, spec.vmid, spec.node
    )?;
    let state = if outcome.started { "running" } else { "stopped" };
    writeln!(out, "  state:   {state}")?;
    match outcome.address {
        Some(address) => writeln!(out, "  address: {address}")?,
        None => writeln!(out, "  address: unknown")?,
    }
    for warning in &outcome.warnings {
        writeln!(out, "warning: {warning}")?;
    }
    match &outcome.provisioning {
        ProvisioningStatus::Skipped => {}
        ProvisioningStatus::Completed(report) => {
            writeln!(out, "Provisioning completed ({} steps).", report.executed.len())?;
        }
        ProvisioningStatus::Failed(err) => {
            writeln!(out, "Provisioning failed: {err}")?;
            writeln!(
                out,
                "The container was kept; finish by hand with `pct enter {}` on {}.",
                spec.vmid, spec.node
            )?;
        }
    }
    Ok(())
}

fn write_destroy_outcome(out: &mut impl Write, outcome: &DestroyOutcome) -> io::Result<()> {
    let container = &outcome.container;
    writeln!(
        out,
        "Destroyed container {} (VMID {}) on {}",
        container.hostname(),
        container.vmid,
        container.node
    )?;
    match &outcome.mesh {
        None => {}
        Some(RemovalOutcome::NotFound) => writeln!(out, "  mesh:    no entry found")?,
        Some(RemovalOutcome::Removed(node)) => writeln!(out, "  mesh:    removed {}", node.name)?,
        Some(RemovalOutcome::Declined(node)) => writeln!(out, "  mesh:    kept {}", node.name)?,
        Some(RemovalOutcome::Failed { .. }) => writeln!(out, "  mesh:    cleanup failed")?,
    }
    for warning in &outcome.warnings {
        writeln!(out, "warning: {warning}")?;
    }
    Ok(())
}

const TABLE_HEADER: [&str; 5] = ["NAME", "ADDRESS", "OS", "STATUS", "LAST SEEN"];

fn node_row(node: &MeshNode) -> [String; 5] {
    let or_dash = |value: Option<&String>| value.map_or_else(|| String::from("-"), Clone::clone);
    [
        node.name.clone(),
        or_dash(node.addresses.first()),
        or_dash(node.os.as_ref()),
        String::from(if node.online { "online" } else { "offline" }),
        or_dash(node.last_seen.as_ref()),
    ]
}

fn write_node_table(out: &mut impl Write, nodes: &[MeshNode]) -> io::Result<()> {
    if nodes.is_empty() {
        return writeln!(out, "No mesh nodes found.");
    }
    let rows: Vec<[String; 5]> = nodes.iter().map(node_row).collect();
    let mut widths = TABLE_HEADER.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    write_row(out, &TABLE_HEADER.map(String::from), &widths)?;
    for row in &rows {
        write_row(out, row, &widths)?;
    }
    Ok(())
}

fn write_row(out: &mut impl Write, cells: &[String], widths: &[usize]) -> io::Result<()> {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ");
    writeln!(out, "{}", line.trim_end())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
