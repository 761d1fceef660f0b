//! Test support utilities shared across unit and integration tests.
//!
//! In-memory stand-ins for every external collaborator: the SSH client, a
//! command transport, the hypervisor API, the mesh registry, and the operator.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::future::ready;
use std::net::IpAddr;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::gateway::GatewayFuture;
use crate::hypervisor::{
    AsyncTask, ClusterNode, ContainerSpec, ContainerState, ContainerSummary, HypervisorError,
    HypervisorGateway, StoragePool, TaskStatus, Template,
};
use crate::lifecycle::{LifecycleError, ProvisionTarget, TransportFactory};
use crate::mesh::{MeshError, MeshNode, MeshRegistry};
use crate::prompt::Confirm;
use crate::transport::{
    CommandOutput, CommandRunner, CommandTransport, RemoteOutput, RetryPolicy, TransportError,
    TransportKind,
};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic SSH client outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Last argument, which is the remote command for `ssh` invocations.
    #[must_use]
    pub fn last_arg(&self) -> Option<String> {
        self.args
            .last()
            .map(|arg| arg.to_string_lossy().into_owned())
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, TransportError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| TransportError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

#[derive(Debug, Default)]
struct TransportState {
    open_error: Option<TransportError>,
    failures: Vec<(String, String)>,
    commands: Vec<String>,
    opened: u32,
    closed: u32,
    is_open: bool,
}

/// Command transport that records commands and fails those matching a
/// configured pattern. Clones share state, so a copy handed to the code under
/// test can be inspected afterwards.
#[derive(Clone, Debug)]
pub struct RecordingTransport {
    kind: TransportKind,
    state: Rc<RefCell<TransportState>>,
}

impl RecordingTransport {
    /// Creates a transport reporting `kind`.
    #[must_use]
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            state: Rc::default(),
        }
    }

    /// Makes every command containing `pattern` exit 1 with `stderr`.
    pub fn fail_when_contains(&self, pattern: &str, stderr: &str) {
        self.state
            .borrow_mut()
            .failures
            .push((pattern.to_owned(), stderr.to_owned()));
    }

    /// Makes `open` fail with `error`.
    pub fn fail_open(&self, error: TransportError) {
        self.state.borrow_mut().open_error = Some(error);
    }

    /// Commands executed so far.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    /// Number of `open` calls.
    #[must_use]
    pub fn open_count(&self) -> u32 {
        self.state.borrow().opened
    }

    /// Number of `close` calls.
    #[must_use]
    pub fn close_count(&self) -> u32 {
        self.state.borrow().closed
    }

    /// Whether the session is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.borrow().is_open
    }
}

impl CommandTransport for RecordingTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn open(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        state.opened = state.opened.saturating_add(1);
        if let Some(error) = state.open_error.take() {
            return Err(error);
        }
        state.is_open = true;
        Ok(())
    }

    fn execute(&mut self, command: &str) -> Result<RemoteOutput, TransportError> {
        let mut state = self.state.borrow_mut();
        if !state.is_open {
            return Err(TransportError::NotOpen {
                target: String::from("recording"),
            });
        }
        state.commands.push(command.to_owned());
        let failure = state
            .failures
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, stderr)| stderr.clone());
        Ok(match failure {
            Some(stderr) => RemoteOutput {
                success: false,
                exit_code: Some(1),
                output: stderr,
            },
            None => RemoteOutput {
                success: true,
                exit_code: Some(0),
                output: String::new(),
            },
        })
    }

    fn close(&mut self) {
        let mut state = self.state.borrow_mut();
        state.closed = state.closed.saturating_add(1);
        state.is_open = false;
    }
}

/// Transport factory handing out clones of one [`RecordingTransport`] and
/// remembering every target it was asked for.
#[derive(Clone, Debug)]
pub struct RecordingFactory {
    transport: RecordingTransport,
    host: RecordingTransport,
    address_retry: RetryPolicy,
    targets: Rc<RefCell<Vec<ProvisionTarget>>>,
}

impl RecordingFactory {
    /// Factory whose transports share state with `transport`. Host-side
    /// commands go to a separate recorder; address lookups are tried once.
    #[must_use]
    pub fn new(transport: RecordingTransport) -> Self {
        Self {
            transport,
            host: RecordingTransport::new(TransportKind::HostExec),
            address_retry: RetryPolicy::once(),
            targets: Rc::default(),
        }
    }

    /// Replaces the address lookup policy.
    #[must_use]
    pub const fn with_address_retry(mut self, policy: RetryPolicy) -> Self {
        self.address_retry = policy;
        self
    }

    /// The shared transport.
    #[must_use]
    pub const fn transport(&self) -> &RecordingTransport {
        &self.transport
    }

    /// The transport handed out for host-side commands.
    #[must_use]
    pub const fn host_transport(&self) -> &RecordingTransport {
        &self.host
    }

    /// Targets transports were built for.
    #[must_use]
    pub fn targets(&self) -> Vec<ProvisionTarget> {
        self.targets.borrow().clone()
    }
}

impl TransportFactory for RecordingFactory {
    fn kind(&self) -> TransportKind {
        self.transport.kind
    }

    fn build(&self, target: &ProvisionTarget) -> Result<Box<dyn CommandTransport>, LifecycleError> {
        self.targets.borrow_mut().push(target.clone());
        if self.transport.kind == TransportKind::DirectSsh && target.address.is_none() {
            return Err(LifecycleError::MissingAddress { vmid: target.vmid });
        }
        Ok(Box::new(self.transport.clone()))
    }

    fn build_host(&self) -> Box<dyn CommandTransport> {
        Box::new(self.host.clone())
    }

    fn address_retry(&self) -> RetryPolicy {
        self.address_retry
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct FakeCluster {
    nodes: Vec<ClusterNode>,
    bridges: HashMap<String, Vec<String>>,
    pools: HashMap<String, Vec<StoragePool>>,
    templates: Vec<(String, Template)>,
    containers: Vec<ContainerSummary>,
    addresses: BTreeMap<u32, Vec<IpAddr>>,
    addresses_pending: BTreeMap<u32, u32>,
    created: Vec<ContainerSpec>,
    task_statuses: VecDeque<Result<TaskStatus, HypervisorError>>,
    failures: HashMap<&'static str, HypervisorError>,
    calls: Vec<String>,
    next_vmid: u32,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            bridges: HashMap::new(),
            pools: HashMap::new(),
            templates: Vec::new(),
            containers: Vec::new(),
            addresses: BTreeMap::new(),
            addresses_pending: BTreeMap::new(),
            created: Vec::new(),
            task_statuses: VecDeque::new(),
            failures: HashMap::new(),
            calls: Vec::new(),
            next_vmid: 100,
        }
    }
}

impl FakeCluster {
    fn enter(&mut self, op: &'static str, detail: String) -> Result<(), HypervisorError> {
        self.calls.push(if detail.is_empty() {
            op.to_owned()
        } else {
            format!("{op} {detail}")
        });
        self.failures.get(op).cloned().map_or(Ok(()), Err)
    }

    fn task(node: &str, action: &str, vmid: u32) -> AsyncTask {
        AsyncTask {
            node: node.to_owned(),
            id: format!("UPID:{node}:{action}:{vmid}"),
        }
    }

    fn set_state(&mut self, vmid: u32, state: ContainerState) {
        if let Some(container) = self
            .containers
            .iter_mut()
            .find(|container| container.vmid == vmid)
        {
            container.state = state;
        }
    }
}

/// In-memory hypervisor cluster.
///
/// Calls are logged as `"<operation> <args>"`. Tasks finish with `OK` unless
/// statuses are queued with [`FakeHypervisor::push_task_status`]. Failures
/// injected with [`FakeHypervisor::fail`] apply to every later call of that
/// operation.
#[derive(Clone, Debug, Default)]
pub struct FakeHypervisor {
    cluster: Arc<Mutex<FakeCluster>>,
}

impl FakeHypervisor {
    /// Empty cluster handing out vmids from 100.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a cluster node.
    pub fn add_node(&self, node: ClusterNode) {
        lock(&self.cluster).nodes.push(node);
    }

    /// Adds an online node with the usual `local-lvm` pool and `vmbr0` bridge.
    pub fn add_standard_node(&self, name: &str, cores: u32, memory_gib: u64) {
        self.add_node(ClusterNode {
            name: name.to_owned(),
            online: true,
            max_cores: cores,
            max_memory_bytes: memory_gib << 30,
            used_memory_bytes: 0,
        });
        self.set_bridges(name, &["vmbr0"]);
        self.set_pools(
            name,
            vec![StoragePool {
                name: String::from("local-lvm"),
                content: BTreeSet::from([String::from("rootdir"), String::from("images")]),
                active: true,
                available_bytes: 100 << 30,
                total_bytes: 200 << 30,
            }],
        );
    }

    /// Sets the bridges reported for `node`.
    pub fn set_bridges(&self, node: &str, bridges: &[&str]) {
        lock(&self.cluster).bridges.insert(
            node.to_owned(),
            bridges.iter().map(|bridge| (*bridge).to_owned()).collect(),
        );
    }

    /// Sets the storage pools reported for `node`.
    pub fn set_pools(&self, node: &str, pools: Vec<StoragePool>) {
        lock(&self.cluster).pools.insert(node.to_owned(), pools);
    }

    /// Adds a template held on `storage`.
    pub fn add_template(&self, storage: &str, volid: &str) {
        lock(&self.cluster).templates.push((
            storage.to_owned(),
            Template {
                volid: volid.to_owned(),
                size_bytes: 0,
            },
        ));
    }

    /// Adds an existing container.
    pub fn add_container(&self, container: ContainerSummary) {
        lock(&self.cluster).containers.push(container);
    }

    /// Sets the addresses reported for container `vmid`.
    pub fn set_addresses(&self, vmid: u32, addresses: Vec<IpAddr>) {
        lock(&self.cluster).addresses.insert(vmid, addresses);
    }

    /// Like [`FakeHypervisor::set_addresses`], but the first `empty_polls`
    /// lookups for `vmid` report nothing, as before a DHCP lease arrives.
    pub fn set_addresses_after(&self, vmid: u32, empty_polls: u32, addresses: Vec<IpAddr>) {
        let mut cluster = lock(&self.cluster);
        cluster.addresses.insert(vmid, addresses);
        cluster.addresses_pending.insert(vmid, empty_polls);
    }

    /// Sets the next vmid handed out.
    pub fn set_next_vmid(&self, vmid: u32) {
        lock(&self.cluster).next_vmid = vmid;
    }

    /// Queues the result of the next task status poll.
    pub fn push_task_status(&self, status: Result<TaskStatus, HypervisorError>) {
        lock(&self.cluster).task_statuses.push_back(status);
    }

    /// Makes every later call of `operation` fail with `error`.
    pub fn fail(&self, operation: &'static str, error: HypervisorError) {
        lock(&self.cluster).failures.insert(operation, error);
    }

    /// Calls made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.cluster).calls.clone()
    }

    /// Calls whose operation name equals `operation`.
    #[must_use]
    pub fn calls_to(&self, operation: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.split(' ').next() == Some(operation))
            .collect()
    }

    /// Containers currently present.
    #[must_use]
    pub fn containers(&self) -> Vec<ContainerSummary> {
        lock(&self.cluster).containers.clone()
    }

    /// Specs passed to `create_container`.
    #[must_use]
    pub fn created(&self) -> Vec<ContainerSpec> {
        lock(&self.cluster).created.clone()
    }

    fn with_cluster<T>(
        &self,
        f: impl FnOnce(&mut FakeCluster) -> Result<T, HypervisorError>,
    ) -> Result<T, HypervisorError> {
        f(&mut lock(&self.cluster))
    }
}

impl HypervisorGateway for FakeHypervisor {
    fn list_nodes(&self) -> GatewayFuture<'_, Vec<ClusterNode>, HypervisorError> {
        let result = self.with_cluster(|cluster| {
            cluster.enter("list_nodes", String::new())?;
            Ok(cluster.nodes.clone())
        });
        Box::pin(ready(result))
    }

    fn node_bridges<'a>(
        &'a self,
        node: &'a str,
    ) -> GatewayFuture<'a, Vec<String>, HypervisorError> {
        let result = self.with_cluster(|cluster| {
            cluster.enter("node_bridges", node.to_owned())?;
            Ok(cluster.bridges.get(node).cloned().unwrap_or_default())
        });
        Box::pin(ready(result))
    }

    fn storage_pools<'a>(
        &'a self,
        node: &'a str,
    ) -> GatewayFuture<'a, Vec<StoragePool>, HypervisorError> {
        let result = self.with_cluster(|cluster| {
            cluster.enter("storage_pools", node.to_owned())?;
            Ok(cluster.pools.get(node).cloned().unwrap_or_default())
        });
        Box::pin(ready(result))
    }

    fn templates<'a>(
        &'a self,
        node: &'a str,
        storage: &'a str,
    ) -> GatewayFuture<'a, Vec<Template>, HypervisorError> {
        let result = self.with_cluster(|cluster| {
            cluster.enter("templates", format!("{node} {storage}"))?;
            Ok(cluster
                .templates
                .iter()
                .filter(|(held_on, _)| held_on == storage)
                .map(|(_, template)| template.clone())
                .collect())
        });
        Box::pin(ready(result))
    }

    fn next_vmid(&self) -> GatewayFuture<'_, u32, HypervisorError> {
        let result = self.with_cluster(|cluster| {
            cluster.enter("next_vmid", String::new())?;
            let vmid = cluster.next_vmid;
            cluster.next_vmid = vmid.saturating_add(1);
            Ok(vmid)
        });
        Box::pin(ready(result))
    }

    fn create_container<'a>(
        &'a self,
        spec: &'a ContainerSpec,
    ) -> GatewayFuture<'a, AsyncTask, HypervisorError> {
        let result = self.with_cluster(|cluster| {
            cluster.enter("create_container", format!("{} {}", spec.node, spec.vmid))?;
            spec.validate()?;
            cluster.containers.push(ContainerSummary {
                vmid: spec.vmid,
                node: spec.node.clone(),
                name: Some(spec.hostname.clone()),
                state: ContainerState::Stopped,
                cores: spec.resources.cores,
            });
            cluster.created.push(spec.clone());
            Ok(FakeCluster::task(&spec.node, "vzcreate", spec.vmid))
        });
        Box::pin(ready(result))
    }

    fn list_containers<'a>(
        &'a self,
        node: &'a str,
    ) -> GatewayFuture<'a, Vec<ContainerSummary>, HypervisorError> {
        let result = self.with_cluster(|cluster| {
            cluster.enter("list_containers", node.to_owned())?;
            Ok(cluster
                .containers
                .iter()
                .filter(|container| container.node == node)
                .cloned()
                .collect())
        });
        Box::pin(ready(result))
    }

    fn container_state<'a>(
        &'a self,
        node: &'a str,
        vmid: u32,
    ) -> GatewayFuture<'a, Option<ContainerState>, HypervisorError> {
        let result = self.with_cluster(|cluster| {
            cluster.enter("container_state", format!("{node} {vmid}"))?;
            Ok(cluster
                .containers
                .iter()
                .find(|container| container.node == node && container.vmid == vmid)
                .map(|container| container.state.clone()))
        });
        Box::pin(ready(result))
    }

    fn container_addresses<'a>(
        &'a self,
        node: &'a str,
        vmid: u32,
    ) -> GatewayFuture<'a, Vec<IpAddr>, HypervisorError> {
        let result = self.with_cluster(|cluster| {
            cluster.enter("container_addresses", format!("{node} {vmid}"))?;
            if let Some(pending) = cluster.addresses_pending.get_mut(&vmid)
                && *pending > 0
            {
                *pending = pending.saturating_sub(1);
                return Ok(Vec::new());
            }
            Ok(cluster.addresses.get(&vmid).cloned().unwrap_or_default())
        });
        Box::pin(ready(result))
    }

    fn start_container<'a>(
        &'a self,
        node: &'a str,
        vmid: u32,
    ) -> GatewayFuture<'a, AsyncTask, HypervisorError> {
        let result = self.with_cluster(|cluster| {
            cluster.enter("start_container", format!("{node} {vmid}"))?;
            cluster.set_state(vmid, ContainerState::Running);
            Ok(FakeCluster::task(node, "vzstart", vmid))
        });
        Box::pin(ready(result))
    }

    fn stop_container<'a>(
        &'a self,
        node: &'a str,
        vmid: u32,
    ) -> GatewayFuture<'a, AsyncTask, HypervisorError> {
        let result = self.with_cluster(|cluster| {
            cluster.enter("stop_container", format!("{node} {vmid}"))?;
            cluster.set_state(vmid, ContainerState::Stopped);
            Ok(FakeCluster::task(node, "vzstop", vmid))
        });
        Box::pin(ready(result))
    }

    fn destroy_container<'a>(
        &'a self,
        node: &'a str,
        vmid: u32,
        purge: bool,
    ) -> GatewayFuture<'a, AsyncTask, HypervisorError> {
        let result = self.with_cluster(|cluster| {
            cluster.enter("destroy_container", format!("{node} {vmid} purge={purge}"))?;
            cluster
                .containers
                .retain(|container| !(container.node == node && container.vmid == vmid));
            Ok(FakeCluster::task(node, "vzdestroy", vmid))
        });
        Box::pin(ready(result))
    }

    fn task_status<'a>(
        &'a self,
        task: &'a AsyncTask,
    ) -> GatewayFuture<'a, TaskStatus, HypervisorError> {
        let result = self.with_cluster(|cluster| {
            cluster.enter("task_status", task.id.clone())?;
            cluster
                .task_statuses
                .pop_front()
                .unwrap_or_else(|| Ok(TaskStatus::stopped("OK")))
        });
        Box::pin(ready(result))
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    nodes: Vec<MeshNode>,
    list_calls: u32,
    deleted: Vec<String>,
    key_expiry: Vec<(String, bool)>,
    authorized: Vec<(String, bool)>,
    list_error: Option<MeshError>,
    delete_error: Option<MeshError>,
}

/// In-memory mesh registry.
#[derive(Clone, Debug, Default)]
pub struct FakeRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl FakeRegistry {
    /// Registry holding `nodes`.
    #[must_use]
    pub fn with_nodes(nodes: Vec<MeshNode>) -> Self {
        let registry = Self::default();
        lock(&registry.state).nodes = nodes;
        registry
    }

    /// Builds a minimal entry.
    #[must_use]
    pub fn node(id: &str, name: &str, hostname: &str, online: bool) -> MeshNode {
        MeshNode {
            id: id.to_owned(),
            name: name.to_owned(),
            hostname: hostname.to_owned(),
            addresses: vec![String::from("100.64.0.1")],
            online,
            ..MeshNode::default()
        }
    }

    /// Makes listing fail with `error`.
    pub fn fail_list(&self, error: MeshError) {
        lock(&self.state).list_error = Some(error);
    }

    /// Makes deletion fail with `error`.
    pub fn fail_delete(&self, error: MeshError) {
        lock(&self.state).delete_error = Some(error);
    }

    /// Number of listing calls made.
    #[must_use]
    pub fn list_calls(&self) -> u32 {
        lock(&self.state).list_calls
    }

    /// Ids passed to delete.
    #[must_use]
    pub fn deleted(&self) -> Vec<String> {
        lock(&self.state).deleted.clone()
    }

    /// Key-expiry updates made, as `(id, expiry_disabled)`.
    #[must_use]
    pub fn key_expiry_updates(&self) -> Vec<(String, bool)> {
        lock(&self.state).key_expiry.clone()
    }

    /// Authorisation updates made, as `(id, authorized)`.
    #[must_use]
    pub fn authorization_updates(&self) -> Vec<(String, bool)> {
        lock(&self.state).authorized.clone()
    }
}

impl MeshRegistry for FakeRegistry {
    fn list_devices(&self) -> GatewayFuture<'_, Vec<MeshNode>, MeshError> {
        let mut state = lock(&self.state);
        state.list_calls = state.list_calls.saturating_add(1);
        let result = state
            .list_error
            .clone()
            .map_or_else(|| Ok(state.nodes.clone()), Err);
        drop(state);
        Box::pin(ready(result))
    }

    fn get_device<'a>(&'a self, id: &'a str) -> GatewayFuture<'a, Option<MeshNode>, MeshError> {
        let found = lock(&self.state)
            .nodes
            .iter()
            .find(|node| node.id == id)
            .cloned();
        Box::pin(ready(Ok(found)))
    }

    fn delete_device<'a>(&'a self, id: &'a str) -> GatewayFuture<'a, (), MeshError> {
        let mut state = lock(&self.state);
        state.deleted.push(id.to_owned());
        let result = match state.delete_error.clone() {
            Some(error) => Err(error),
            None => {
                state.nodes.retain(|node| node.id != id);
                Ok(())
            }
        };
        drop(state);
        Box::pin(ready(result))
    }

    fn set_key_expiry<'a>(
        &'a self,
        id: &'a str,
        expiry_disabled: bool,
    ) -> GatewayFuture<'a, (), MeshError> {
        lock(&self.state)
            .key_expiry
            .push((id.to_owned(), expiry_disabled));
        Box::pin(ready(Ok(())))
    }

    fn set_authorized<'a>(
        &'a self,
        id: &'a str,
        authorized: bool,
    ) -> GatewayFuture<'a, (), MeshError> {
        lock(&self.state)
            .authorized
            .push((id.to_owned(), authorized));
        Box::pin(ready(Ok(())))
    }
}

/// Operator stand-in answering from a script; refuses once it runs out.
#[derive(Clone, Debug, Default)]
pub struct ScriptedConfirm {
    answers: Rc<RefCell<VecDeque<bool>>>,
    questions: Rc<RefCell<Vec<String>>>,
}

impl ScriptedConfirm {
    /// Operator who gives `answers` in order.
    #[must_use]
    pub fn answering(answers: &[bool]) -> Self {
        let confirm = Self::default();
        confirm.answers.borrow_mut().extend(answers.iter().copied());
        confirm
    }

    /// Questions asked so far.
    #[must_use]
    pub fn questions(&self) -> Vec<String> {
        self.questions.borrow().clone()
    }
}

impl Confirm for ScriptedConfirm {
    fn confirm(&self, question: &str) -> bool {
        self.questions.borrow_mut().push(question.to_owned());
        self.answers.borrow_mut().pop_front().unwrap_or(false)
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
