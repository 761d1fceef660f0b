//! Create and destroy flows composed from placement, task tracking,
//! provisioning and mesh reconciliation.
//!
//! [`Orchestrator::create`] leaves the container in place when provisioning
//! fails; the outcome carries the error so the operator can finish by hand.
//! [`Orchestrator::destroy`] treats mesh cleanup and stopping as best effort.

mod error;
mod factory;

use std::net::IpAddr;
use std::time::Duration;

use shell_escape::unix::escape;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::hypervisor::{
    AsyncTask, ContainerSpec, ContainerState, ContainerSummary, HypervisorGateway, IpConfig,
    Template, is_valid_hostname,
};
use crate::mesh::{MeshRegistry, MeshRegistryReconciler, RemovalOutcome};
use crate::placement::{self, ResourceRequirement, SelectionStrategy};
use crate::prompt::Confirm;
use crate::provision::{ProvisioningEngine, ProvisioningReport, ProvisioningSpec};
use crate::task::{TaskOutcome, TaskTracker};
use crate::transport::{CommandTransport, RetryPolicy, TransportKind};

pub use error::LifecycleError;
pub use factory::{CONTAINER_USER, ProvisionTarget, SshTransportFactory, TransportFactory};

/// Storage searched for templates given by short name when none is set.
pub const DEFAULT_TEMPLATE_STORAGE: &str = "local";

/// Container config lines that pass the host's TUN device through for
/// Tailscale.
pub const TUN_DEVICE_CONFIG: [&str; 2] = [
    "lxc.cgroup2.devices.allow: c 10:200 rwm",
    "lxc.mount.entry: /dev/net/tun dev/net/tun none bind,create=file",
];

/// Time allowed for each kind of cluster task.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TaskTimeouts {
    /// Container creation.
    pub create: Duration,
    /// Container start.
    pub start: Duration,
    /// Container stop.
    pub stop: Duration,
    /// Container destruction.
    pub destroy: Duration,
}

impl Default for TaskTimeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(120),
            start: Duration::from_secs(60),
            stop: Duration::from_secs(30),
            destroy: Duration::from_secs(60),
        }
    }
}

/// Everything the operator asked for when creating a container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateRequest {
    /// Hostname inside the container.
    pub hostname: String,
    /// Template volume id, or a short name resolved on the template storage.
    pub template: String,
    /// Node to create on; chosen by placement when `None`.
    pub node: Option<String>,
    /// Resources, storage pool and bridge.
    pub resources: ResourceRequirement,
    /// Address configuration.
    pub ip: IpConfig,
    /// Whether to create an unprivileged container.
    pub unprivileged: bool,
    /// Whether to enable nesting.
    pub nesting: bool,
    /// Keys injected for root at creation time.
    pub ssh_public_keys: Vec<String>,
    /// Whether to start the container once created.
    pub start: bool,
    /// Post-start provisioning, if any.
    pub provisioning: Option<ProvisioningSpec>,
}

/// How provisioning ended for a new container.
#[derive(Debug)]
pub enum ProvisioningStatus {
    /// Nothing to provision, or the container was not started.
    Skipped,
    /// Every fatal step succeeded.
    Completed(ProvisioningReport),
    /// Provisioning stopped early; the container was kept.
    Failed(LifecycleError),
}

/// Result of [`Orchestrator::create`].
#[derive(Debug)]
pub struct CreateOutcome {
    /// The created container.
    pub spec: ContainerSpec,
    /// Whether the container reached the running state.
    pub started: bool,
    /// Address the container is reachable on, when known.
    pub address: Option<IpAddr>,
    /// Non-fatal problems encountered on the way.
    pub warnings: Vec<String>,
    /// Provisioning result.
    pub provisioning: ProvisioningStatus,
}

/// Parameters of [`Orchestrator::destroy`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DestroyRequest {
    /// Container to remove.
    pub vmid: u32,
    /// Skip every confirmation.
    pub force: bool,
    /// Also remove the container from backup jobs and replication.
    pub purge: bool,
}

/// Result of [`Orchestrator::destroy`].
#[derive(Debug)]
pub struct DestroyOutcome {
    /// The destroyed container as it was found.
    pub container: ContainerSummary,
    /// Mesh cleanup result, when a registry is configured.
    pub mesh: Option<RemovalOutcome>,
    /// Non-fatal problems encountered on the way.
    pub warnings: Vec<String>,
}

/// Runs container lifecycle flows against one cluster.
#[derive(Debug)]
pub struct Orchestrator<G, F, C, R> {
    gateway: G,
    transports: F,
    confirm: C,
    mesh: Option<MeshRegistryReconciler<R, C>>,
    tracker: TaskTracker,
    timeouts: TaskTimeouts,
    engine: ProvisioningEngine,
    template_storage: String,
}

impl<G, F, C, R> Orchestrator<G, F, C, R>
where
    G: HypervisorGateway,
    F: TransportFactory,
    C: Confirm + Clone,
    R: MeshRegistry,
{
    /// Creates an orchestrator. Mesh cleanup is skipped when `mesh` is `None`.
    pub fn new(gateway: G, transports: F, confirm: C, mesh: Option<R>) -> Self {
        let mesh_reconciler =
            mesh.map(|registry| MeshRegistryReconciler::new(registry, confirm.clone()));
        Self {
            gateway,
            transports,
            confirm,
            mesh: mesh_reconciler,
            tracker: TaskTracker::default(),
            timeouts: TaskTimeouts::default(),
            engine: ProvisioningEngine::default(),
            template_storage: String::from(DEFAULT_TEMPLATE_STORAGE),
        }
    }

    /// Replaces the task tracker.
    #[must_use]
    pub const fn with_tracker(mut self, tracker: TaskTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Replaces the task time budgets.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: TaskTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the storage searched for templates given by short name.
    #[must_use]
    pub fn with_template_storage(mut self, storage: impl Into<String>) -> Self {
        self.template_storage = storage.into();
        self
    }

    /// Underlying hypervisor gateway.
    #[must_use]
    pub const fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Transport variant provisioning will use.
    #[must_use]
    pub fn transport_kind(&self) -> TransportKind {
        self.transports.kind()
    }

    /// Resolves everything [`Orchestrator::create`] would send to the
    /// cluster without changing it: node, template and vmid.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when the request is invalid, no node fits,
    /// the template cannot be resolved, or a cluster call fails.
    pub async fn plan_create(&self, request: &CreateRequest) -> Result<ContainerSpec, LifecycleError> {
        validate_request(request)?;
        let node = self.place(request).await?;
        let template = self.resolve_template(&request.template, &node).await?;
        let vmid = self.gateway.next_vmid().await?;
        let spec = ContainerSpec {
            vmid,
            hostname: request.hostname.trim().to_owned(),
            template,
            node,
            resources: request.resources.clone(),
            ip: request.ip.clone(),
            unprivileged: request.unprivileged,
            nesting: request.nesting,
            ssh_public_keys: request.ssh_public_keys.clone(),
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Creates, optionally starts, and optionally provisions a container.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when planning fails or the creation task
    /// does not complete. Start and provisioning problems are reported in
    /// the outcome instead.
    pub async fn create(&self, request: &CreateRequest) -> Result<CreateOutcome, LifecycleError> {
        let spec = self.plan_create(request).await?;
        info!(vmid = spec.vmid, node = %spec.node, hostname = %spec.hostname, "creating container");
        let task = self.gateway.create_container(&spec).await?;
        self.await_task(&task, "create", spec.vmid, self.timeouts.create)
            .await?;
        info!(vmid = spec.vmid, node = %spec.node, "container created");

        let mut warnings = Vec::new();
        let wanted = request
            .provisioning
            .as_ref()
            .filter(|provisioning| !provisioning.is_empty());
        if wanted.is_some_and(|provisioning| provisioning.mesh_auth_key.is_some()) {
            self.prepare_tun_device(&spec, &mut warnings);
        }
        let started = request.start && self.start_container(&spec, &mut warnings).await;
        let address = if started {
            let wait = wanted.is_some() && self.transports.kind() == TransportKind::DirectSsh;
            self.resolve_address(&spec, wait, &mut warnings).await
        } else {
            spec.ip.static_address()
        };
        let provisioning = self.provision(request, &spec, started, address, &mut warnings);

        Ok(CreateOutcome {
            spec,
            started,
            address,
            warnings,
            provisioning,
        })
    }

    /// Finds the container hosting `vmid` on any online node.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`] when no node hosts it, or
    /// [`LifecycleError::Hypervisor`] when the node listing fails.
    pub async fn locate(&self, vmid: u32) -> Result<ContainerSummary, LifecycleError> {
        let nodes = self.gateway.list_nodes().await?;
        for node in nodes.iter().filter(|node| node.online) {
            match self.gateway.list_containers(&node.name).await {
                Ok(containers) => {
                    if let Some(found) = containers.into_iter().find(|ct| ct.vmid == vmid) {
                        return Ok(found);
                    }
                }
                Err(err) => warn!(node = %node.name, error = %err, "cannot list containers on node"),
            }
        }
        Err(LifecycleError::NotFound { vmid })
    }

    /// Removes a container and its mesh entry.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotFound`] for an unknown vmid,
    /// [`LifecycleError::Aborted`] when the operator declines, or a task error
    /// when destruction does not complete.
    pub async fn destroy(&mut self, request: &DestroyRequest) -> Result<DestroyOutcome, LifecycleError> {
        let container = self.locate(request.vmid).await?;
        let hostname = container.hostname();
        info!(vmid = container.vmid, node = %container.node, hostname = %hostname, "found container");

        if !request.force {
            let question = format!(
                "Destroy container {hostname} (VMID {}) on {}?",
                container.vmid, container.node
            );
            if !self.confirm.confirm(&question) {
                return Err(LifecycleError::Aborted);
            }
        }

        let mut warnings = Vec::new();
        let mut mesh = None;
        if let Some(reconciler) = self.mesh.as_mut() {
            let outcome = reconciler
                .reconcile(&hostname, Some(container.vmid), request.force)
                .await;
            if let RemovalOutcome::Failed { message, .. } = &outcome {
                warnings.push(format!("mesh cleanup failed: {message}"));
            }
            mesh = Some(outcome);
        }

        if container.state == ContainerState::Running {
            self.stop_before_destroy(&container, request.force, &mut warnings)
                .await?;
        }

        info!(vmid = container.vmid, node = %container.node, purge = request.purge, "destroying container");
        let task = self
            .gateway
            .destroy_container(&container.node, container.vmid, request.purge)
            .await?;
        self.await_task(&task, "destroy", container.vmid, self.timeouts.destroy)
            .await?;
        info!(vmid = container.vmid, "container destroyed");

        Ok(DestroyOutcome {
            container,
            mesh,
            warnings,
        })
    }

    /// Mesh reconciler, when a registry is configured.
    pub const fn mesh(&mut self) -> Option<&mut MeshRegistryReconciler<R, C>> {
        self.mesh.as_mut()
    }

    async fn place(&self, request: &CreateRequest) -> Result<String, LifecycleError> {
        if let Some(node) = request.node.as_deref() {
            return Ok(node.trim().to_owned());
        }
        let candidates = placement::snapshot(&self.gateway).await?;
        placement::select(&request.resources, &candidates, SelectionStrategy::LeastLoaded)
            .map(|candidate| candidate.name.clone())
            .ok_or(LifecycleError::NoPlacement)
    }

    async fn resolve_template(&self, template: &str, node: &str) -> Result<String, LifecycleError> {
        let wanted = template.trim();
        if wanted.contains(':') {
            return Ok(wanted.to_owned());
        }
        let templates = self.gateway.templates(node, &self.template_storage).await?;
        pick_template(&templates, wanted).ok_or_else(|| LifecycleError::TemplateNotFound {
            template: wanted.to_owned(),
            storage: self.template_storage.clone(),
            node: node.to_owned(),
        })
    }

    async fn await_task(
        &self,
        task: &AsyncTask,
        action: &'static str,
        vmid: u32,
        timeout: Duration,
    ) -> Result<(), LifecycleError> {
        match self.tracker.wait(&self.gateway, task, timeout).await {
            TaskOutcome::Completed => Ok(()),
            TaskOutcome::TimedOut(limit) => Err(LifecycleError::TaskTimeout {
                action,
                vmid,
                seconds: limit.as_secs(),
            }),
            outcome @ (TaskOutcome::Failed(_) | TaskOutcome::Error(_)) => {
                Err(LifecycleError::TaskFailed {
                    action,
                    message: outcome.message(),
                })
            }
        }
    }

    async fn start_container(&self, spec: &ContainerSpec, warnings: &mut Vec<String>) -> bool {
        let result = match self.gateway.start_container(&spec.node, spec.vmid).await {
            Ok(task) => {
                self.await_task(&task, "start", spec.vmid, self.timeouts.start)
                    .await
            }
            Err(err) => Err(err.into()),
        };
        match result {
            Ok(()) => {
                info!(vmid = spec.vmid, "container started");
                true
            }
            Err(err) => {
                warn!(vmid = spec.vmid, error = %err, "container did not start");
                warnings.push(format!("failed to start container: {err}"));
                false
            }
        }
    }

    /// Reads the container's address. With `wait`, keeps asking under the
    /// transport's retry policy until one appears, since a DHCP lease can
    /// lag behind the start task.
    async fn resolve_address(
        &self,
        spec: &ContainerSpec,
        wait: bool,
        warnings: &mut Vec<String>,
    ) -> Option<IpAddr> {
        if let Some(address) = spec.ip.static_address() {
            return Some(address);
        }
        let policy = if wait {
            self.transports.address_retry()
        } else {
            RetryPolicy::once()
        };
        let attempts = policy.attempts.max(1);
        for attempt in 1..=attempts {
            match self.gateway.container_addresses(&spec.node, spec.vmid).await {
                Ok(addresses) => {
                    if let Some(address) = preferred_address(&addresses) {
                        return Some(address);
                    }
                    debug!(vmid = spec.vmid, attempt, attempts, "container reports no address yet");
                }
                Err(err) => {
                    warn!(vmid = spec.vmid, error = %err, "cannot read container addresses");
                    warnings.push(format!("cannot read container addresses: {err}"));
                    return None;
                }
            }
            if attempt < attempts {
                sleep(policy.delay).await;
            }
        }
        None
    }

    fn prepare_tun_device(&self, spec: &ContainerSpec, warnings: &mut Vec<String>) {
        let mut transport = self.transports.build_host();
        let result = transport
            .open()
            .and_then(|()| transport.execute(&tun_device_command(spec.vmid)));
        transport.close();
        let problem = match result {
            Ok(output) if output.success => {
                info!(vmid = spec.vmid, "TUN device configured for Tailscale");
                return;
            }
            Ok(output) => output.output.trim().to_owned(),
            Err(err) => err.to_string(),
        };
        warn!(vmid = spec.vmid, error = %problem, "cannot configure TUN device for Tailscale");
        warnings.push(format!("failed to configure LXC for Tailscale: {problem}"));
    }

    fn provision(
        &self,
        request: &CreateRequest,
        spec: &ContainerSpec,
        started: bool,
        address: Option<IpAddr>,
        warnings: &mut Vec<String>,
    ) -> ProvisioningStatus {
        let Some(wanted) = request
            .provisioning
            .as_ref()
            .filter(|provisioning| !provisioning.is_empty())
        else {
            return ProvisioningStatus::Skipped;
        };
        if !started {
            warnings.push(String::from(
                "container is not running; provisioning skipped",
            ));
            return ProvisioningStatus::Skipped;
        }

        let target = ProvisionTarget {
            vmid: spec.vmid,
            node: spec.node.clone(),
            address,
        };
        let result = self.transports.build(&target).and_then(|mut transport| {
            self.engine
                .run(wanted, &mut transport)
                .map_err(LifecycleError::from)
        });
        match result {
            Ok(report) => {
                warnings.extend(report.warnings.iter().cloned());
                ProvisioningStatus::Completed(report)
            }
            Err(err) => {
                warn!(vmid = spec.vmid, error = %err, "provisioning failed; container kept");
                ProvisioningStatus::Failed(err)
            }
        }
    }

    async fn stop_before_destroy(
        &self,
        container: &ContainerSummary,
        force: bool,
        warnings: &mut Vec<String>,
    ) -> Result<(), LifecycleError> {
        info!(vmid = container.vmid, "stopping container");
        let result = match self
            .gateway
            .stop_container(&container.node, container.vmid)
            .await
        {
            Ok(task) => {
                self.await_task(&task, "stop", container.vmid, self.timeouts.stop)
                    .await
            }
            Err(err) => Err(err.into()),
        };
        let Err(err) = result else {
            info!(vmid = container.vmid, "container stopped");
            return Ok(());
        };
        warn!(vmid = container.vmid, error = %err, "container did not stop");
        warnings.push(format!("failed to stop container: {err}"));
        if !force && !self.confirm.confirm("Continue with destruction anyway?") {
            return Err(LifecycleError::Aborted);
        }
        Ok(())
    }
}

fn preferred_address(addresses: &[IpAddr]) -> Option<IpAddr> {
    addresses
        .iter()
        .find(|address| address.is_ipv4())
        .or_else(|| addresses.first())
        .copied()
}

/// Host command appending [`TUN_DEVICE_CONFIG`] to the container's config,
/// skipping lines already present.
fn tun_device_command(vmid: u32) -> String {
    let config = format!("/etc/pve/lxc/{vmid}.conf");
    TUN_DEVICE_CONFIG
        .iter()
        .map(|line| {
            let quoted = escape((*line).into());
            format!("(grep -qxF {quoted} {config} || echo {quoted} >> {config})")
        })
        .collect::<Vec<_>>()
        .join(" && ")
}

fn validate_request(request: &CreateRequest) -> Result<(), LifecycleError> {
    let hostname = request.hostname.trim();
    if !is_valid_hostname(hostname) {
        return Err(LifecycleError::Invalid(format!(
            "hostname '{hostname}' must be 1-63 letters, digits or hyphens and must not start or end with a hyphen"
        )));
    }
    if request.template.trim().is_empty() {
        return Err(LifecycleError::Invalid(String::from(
            "template must not be empty",
        )));
    }
    if request
        .node
        .as_deref()
        .is_some_and(|node| node.trim().is_empty())
    {
        return Err(LifecycleError::Invalid(String::from(
            "node must not be empty when given",
        )));
    }
    request.resources.validate()?;
    Ok(())
}

/// Exact file-name match first, otherwise the newest name starting with
/// `wanted`.
fn pick_template(templates: &[Template], wanted: &str) -> Option<String> {
    let file_name = |volid: &str| -> String {
        volid
            .rsplit_once('/')
            .map_or(volid, |(_, name)| name)
            .to_owned()
    };
    templates
        .iter()
        .find(|template| file_name(&template.volid) == wanted)
        .or_else(|| {
            templates
                .iter()
                .filter(|template| file_name(&template.volid).starts_with(wanted))
                .max_by(|left, right| left.volid.cmp(&right.volid))
        })
        .map(|template| template.volid.clone())
}
