//! BDD step definitions for container creation and destruction.

use pxrun::hypervisor::{ContainerState, ContainerSummary};
use pxrun::lifecycle::{DestroyRequest, ProvisioningStatus};
use pxrun::mesh::RemovalOutcome;
use pxrun::test_support::{FakeRegistry, ScriptedConfirm};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{FlowResult, LifecycleContext, ProvisioningResult};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

const TEMPLATE: &str = "local:vztmpl/debian-12-standard_12.2-1_amd64.tar.zst";

#[given("a cluster with a busy node \"{busy}\" and an idle node \"{idle}\"")]
fn busy_and_idle_cluster(
    lifecycle_context: LifecycleContext,
    busy: String,
    idle: String,
) -> LifecycleContext {
    let hypervisor = &lifecycle_context.hypervisor;
    hypervisor.add_standard_node(&busy, 8, 16);
    hypervisor.add_standard_node(&idle, 8, 16);
    hypervisor.add_container(ContainerSummary {
        vmid: 100,
        node: busy,
        name: Some(String::from("build")),
        state: ContainerState::Running,
        cores: 6,
    });
    hypervisor.add_template("local", TEMPLATE);
    hypervisor.set_next_vmid(101);
    lifecycle_context
}

#[given("the request needs {cores:u32} cores")]
fn request_needs_cores(mut lifecycle_context: LifecycleContext, cores: u32) -> LifecycleContext {
    lifecycle_context.request.resources.cores = cores;
    lifecycle_context
}

#[given("package installation fails")]
fn package_installation_fails(lifecycle_context: LifecycleContext) -> LifecycleContext {
    lifecycle_context
        .factory
        .transport()
        .fail_when_contains("apt-get install", "E: Unable to locate package git");
    lifecycle_context
}

#[given("a running container {vmid:u32} named \"{name}\" on \"{node}\"")]
fn running_container(
    lifecycle_context: LifecycleContext,
    vmid: u32,
    name: String,
    node: String,
) -> LifecycleContext {
    lifecycle_context.hypervisor.add_standard_node(&node, 8, 16);
    lifecycle_context.hypervisor.add_container(ContainerSummary {
        vmid,
        node,
        name: Some(name),
        state: ContainerState::Running,
        cores: 2,
    });
    lifecycle_context
}

#[given("the mesh network lists \"{name}\"")]
fn mesh_lists(mut lifecycle_context: LifecycleContext, name: String) -> LifecycleContext {
    let hostname = name.split('.').next().unwrap_or(&name).to_owned();
    lifecycle_context.registry =
        FakeRegistry::with_nodes(vec![FakeRegistry::node("n1", &name, &hostname, true)]);
    lifecycle_context
}

#[given("the operator answers yes then no")]
fn operator_answers_yes_then_no(mut lifecycle_context: LifecycleContext) -> LifecycleContext {
    lifecycle_context.confirm = ScriptedConfirm::answering(&[true, false]);
    lifecycle_context
}

#[when("I create the container \"{hostname}\"")]
fn create_container(
    mut lifecycle_context: LifecycleContext,
    hostname: String,
) -> Result<LifecycleContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    lifecycle_context.request.hostname = hostname;
    let orchestrator = lifecycle_context.orchestrator();
    let request = lifecycle_context.request.clone();

    let result = runtime.block_on(async move { orchestrator.create(&request).await });
    lifecycle_context.outcome = Some(match result {
        Ok(outcome) => FlowResult::Created {
            node: outcome.spec.node.clone(),
            vmid: outcome.spec.vmid,
            provisioning: match outcome.provisioning {
                ProvisioningStatus::Skipped => ProvisioningResult::Skipped,
                ProvisioningStatus::Completed(_) => ProvisioningResult::Completed,
                ProvisioningStatus::Failed(err) => ProvisioningResult::Failed(err.to_string()),
            },
        },
        Err(err) => FlowResult::Failed(err.to_string()),
    });
    Ok(lifecycle_context)
}

fn destroy(
    mut lifecycle_context: LifecycleContext,
    vmid: u32,
    force: bool,
) -> Result<LifecycleContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let mut orchestrator = lifecycle_context.orchestrator();
    let request = DestroyRequest {
        vmid,
        force,
        purge: true,
    };

    let result = runtime.block_on(async move { orchestrator.destroy(&request).await });
    lifecycle_context.outcome = Some(match result {
        Ok(outcome) => FlowResult::Destroyed { mesh: outcome.mesh },
        Err(err) => FlowResult::Failed(err.to_string()),
    });
    Ok(lifecycle_context)
}

#[when("I force destroy container {vmid:u32}")]
fn force_destroy(
    lifecycle_context: LifecycleContext,
    vmid: u32,
) -> Result<LifecycleContext, StepError> {
    destroy(lifecycle_context, vmid, true)
}

#[when("I destroy container {vmid:u32}")]
fn confirmed_destroy(
    lifecycle_context: LifecycleContext,
    vmid: u32,
) -> Result<LifecycleContext, StepError> {
    destroy(lifecycle_context, vmid, false)
}

fn created(lifecycle_context: &LifecycleContext) -> Result<(&str, u32, &ProvisioningResult), StepError> {
    match lifecycle_context.outcome.as_ref() {
        Some(FlowResult::Created {
            node,
            vmid,
            provisioning,
        }) => Ok((node.as_str(), *vmid, provisioning)),
        other => Err(StepError::Assertion(format!(
            "expected a created container, got {other:?}"
        ))),
    }
}

#[then("the container is created on \"{node}\"")]
fn created_on(lifecycle_context: &LifecycleContext, node: String) -> Result<(), StepError> {
    let (actual, _, _) = created(lifecycle_context)?;
    if actual != node {
        return Err(StepError::Assertion(format!(
            "expected node {node}, got {actual}"
        )));
    }
    let specs = lifecycle_context.hypervisor.created();
    match specs.first() {
        Some(spec) if spec.template == TEMPLATE => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected the short template name to resolve to {TEMPLATE}, got {other:?}"
        ))),
    }
}

#[then("provisioning completes")]
fn provisioning_completes(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let (_, _, provisioning) = created(lifecycle_context)?;
    if *provisioning != ProvisioningResult::Completed {
        return Err(StepError::Assertion(format!(
            "expected completed provisioning, got {provisioning:?}"
        )));
    }
    let commands = lifecycle_context.factory.transport().commands();
    if commands.last().is_some_and(|command| command.ends_with("install -y git")) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected the package install to run last, got {commands:?}"
        )))
    }
}

#[then("provisioning fails")]
fn provisioning_fails(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    match created(lifecycle_context)? {
        (_, _, ProvisioningResult::Failed(message)) if message.contains("Install packages") => {
            Ok(())
        }
        (_, _, other) => Err(StepError::Assertion(format!(
            "expected the package step to fail, got {other:?}"
        ))),
    }
}

#[then("creation fails mentioning \"{text}\"")]
fn creation_fails(lifecycle_context: &LifecycleContext, text: String) -> Result<(), StepError> {
    match lifecycle_context.outcome.as_ref() {
        Some(FlowResult::Failed(message)) if message.contains(&text) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a failure mentioning '{text}', got {other:?}"
        ))),
    }
}

#[then("no container is created")]
fn no_container_created(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let calls = lifecycle_context.hypervisor.calls_to("create_container");
    if calls.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no create call, got {calls:?}"
        )))
    }
}

fn container_present(lifecycle_context: &LifecycleContext, vmid: u32) -> bool {
    lifecycle_context
        .hypervisor
        .containers()
        .iter()
        .any(|container| container.vmid == vmid)
}

#[then("container {vmid:u32} still exists")]
fn container_still_exists(lifecycle_context: &LifecycleContext, vmid: u32) -> Result<(), StepError> {
    if container_present(lifecycle_context, vmid) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("container {vmid} was removed")))
    }
}

#[then("container {vmid:u32} is gone")]
fn container_gone(lifecycle_context: &LifecycleContext, vmid: u32) -> Result<(), StepError> {
    if !matches!(lifecycle_context.outcome, Some(FlowResult::Destroyed { .. })) {
        return Err(StepError::Assertion(format!(
            "expected destruction to succeed, got {:?}",
            lifecycle_context.outcome
        )));
    }
    if container_present(lifecycle_context, vmid) {
        return Err(StepError::Assertion(format!("container {vmid} still exists")));
    }
    let stops = lifecycle_context.hypervisor.calls_to("stop_container");
    if stops.len() == 1 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected the running container to be stopped once, got {stops:?}"
        )))
    }
}

#[then("the mesh entry \"{name}\" is removed")]
fn mesh_entry_removed(lifecycle_context: &LifecycleContext, name: String) -> Result<(), StepError> {
    match lifecycle_context.outcome.as_ref() {
        Some(FlowResult::Destroyed {
            mesh: Some(RemovalOutcome::Removed(node)),
        }) if node.name == name => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected mesh entry {name} to be removed, got {other:?}"
        ))),
    }
}

#[then("no mesh entry is removed")]
fn no_mesh_entry_removed(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let deleted = lifecycle_context.registry.deleted();
    if !deleted.is_empty() {
        return Err(StepError::Assertion(format!(
            "expected no deletions, got {deleted:?}"
        )));
    }
    match lifecycle_context.outcome.as_ref() {
        Some(FlowResult::Destroyed {
            mesh: Some(RemovalOutcome::Declined(_)),
        }) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a declined mesh removal, got {other:?}"
        ))),
    }
}
