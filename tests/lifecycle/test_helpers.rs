//! Shared fixtures for lifecycle BDD scenarios.

use std::time::Duration;

use pxrun::hypervisor::IpConfig;
use pxrun::lifecycle::{CreateRequest, Orchestrator};
use pxrun::mesh::RemovalOutcome;
use pxrun::placement::ResourceRequirement;
use pxrun::provision::ProvisioningSpec;
use pxrun::task::TaskTracker;
use pxrun::test_support::{
    FakeHypervisor, FakeRegistry, RecordingFactory, RecordingTransport, ScriptedConfirm,
};
use pxrun::transport::TransportKind;
use rstest::fixture;

pub type ScenarioOrchestrator =
    Orchestrator<FakeHypervisor, RecordingFactory, ScriptedConfirm, FakeRegistry>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProvisioningResult {
    Skipped,
    Completed,
    Failed(String),
}

#[derive(Clone, Debug)]
pub enum FlowResult {
    Created {
        node: String,
        vmid: u32,
        provisioning: ProvisioningResult,
    },
    Destroyed {
        mesh: Option<RemovalOutcome>,
    },
    Failed(String),
}

#[derive(Clone, Debug)]
pub struct LifecycleContext {
    pub hypervisor: FakeHypervisor,
    pub registry: FakeRegistry,
    pub confirm: ScriptedConfirm,
    pub factory: RecordingFactory,
    pub request: CreateRequest,
    pub outcome: Option<FlowResult>,
}

impl LifecycleContext {
    pub fn orchestrator(&self) -> ScenarioOrchestrator {
        Orchestrator::new(
            self.hypervisor.clone(),
            self.factory.clone(),
            self.confirm.clone(),
            Some(self.registry.clone()),
        )
        .with_tracker(TaskTracker::new(Duration::from_millis(1)))
    }
}

#[fixture]
pub fn lifecycle_context() -> LifecycleContext {
    LifecycleContext {
        hypervisor: FakeHypervisor::new(),
        registry: FakeRegistry::default(),
        confirm: ScriptedConfirm::default(),
        factory: RecordingFactory::new(RecordingTransport::new(TransportKind::HostExec)),
        request: base_request(),
        outcome: None,
    }
}

fn base_request() -> CreateRequest {
    CreateRequest {
        hostname: String::new(),
        template: String::from("debian-12"),
        node: None,
        resources: ResourceRequirement::builder()
            .cores(2)
            .memory_mb(2048)
            .storage_gb(20)
            .storage_pool("local-lvm")
            .network_bridge("vmbr0")
            .build()
            .unwrap_or_else(|err| panic!("fixture resources should be valid: {err}")),
        ip: IpConfig::parse(Some("10.0.0.5/24"), Some("10.0.0.1")),
        unprivileged: true,
        nesting: false,
        ssh_public_keys: Vec::new(),
        start: true,
        provisioning: Some(ProvisioningSpec {
            packages: vec![String::from("git")],
            ..ProvisioningSpec::default()
        }),
    }
}
