//! Unit tests for node placement.

use std::collections::BTreeSet;

use rstest::{fixture, rstest};

use super::*;
use crate::hypervisor::{
    ClusterNode, ContainerState, ContainerSummary, HypervisorError, StoragePool,
};
use crate::test_support::FakeHypervisor;

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|item| (*item).to_owned()).collect()
}

fn candidate(name: &str, free_cores: u32, free_memory_mb: u64) -> NodeCandidate {
    NodeCandidate {
        name: name.to_owned(),
        total_cores: 8,
        used_cores: 8_u32.saturating_sub(free_cores),
        total_memory_mb: 16_384,
        used_memory_mb: 16_384_u64.saturating_sub(free_memory_mb),
        storage_pools: names(&["local-lvm"]),
        bridges: names(&["vmbr0"]),
    }
}

#[fixture]
fn requirement() -> ResourceRequirement {
    ResourceRequirement::builder()
        .cores(2)
        .memory_mb(2048)
        .storage_gb(20)
        .storage_pool("local-lvm")
        .network_bridge("vmbr0")
        .build()
        .expect("requirement should validate")
}

#[rstest]
fn least_loaded_skips_node_that_fails_constraints(requirement: ResourceRequirement) {
    let node_a = candidate("A", 4, 8192);
    let node_b = NodeCandidate {
        storage_pools: BTreeSet::new(),
        ..candidate("B", 1, 512)
    };
    let candidates = [node_b, node_a];

    let chosen = select(&requirement, &candidates, SelectionStrategy::LeastLoaded);
    assert_eq!(chosen.map(|node| node.name.as_str()), Some("A"));
}

#[rstest]
fn least_loaded_prefers_lower_utilisation(requirement: ResourceRequirement) {
    let candidates = [candidate("busy", 3, 4096), candidate("idle", 7, 15_000)];
    let chosen = select(&requirement, &candidates, SelectionStrategy::LeastLoaded);
    assert_eq!(chosen.map(|node| node.name.as_str()), Some("idle"));
}

#[rstest]
fn ties_break_by_name(requirement: ResourceRequirement) {
    let candidates = [candidate("pve2", 6, 8192), candidate("pve1", 6, 8192)];
    for strategy in [SelectionStrategy::LeastLoaded, SelectionStrategy::FirstAvailable] {
        let chosen = select(&requirement, &candidates, strategy);
        assert_eq!(chosen.map(|node| node.name.as_str()), Some("pve1"));
    }
}

#[rstest]
fn first_available_ignores_load(requirement: ResourceRequirement) {
    let candidates = [candidate("zeta", 8, 16_000), candidate("alpha", 2, 2048)];
    let chosen = select(&requirement, &candidates, SelectionStrategy::FirstAvailable);
    assert_eq!(chosen.map(|node| node.name.as_str()), Some("alpha"));
}

#[rstest]
fn returns_none_when_nothing_fits(requirement: ResourceRequirement) {
    let candidates = [
        candidate("small", 1, 8192),
        NodeCandidate {
            bridges: names(&["vmbr1"]),
            ..candidate("isolated", 8, 16_000)
        },
    ];
    assert!(select(&requirement, &candidates, SelectionStrategy::LeastLoaded).is_none());
    assert!(select(&requirement, &[], SelectionStrategy::FirstAvailable).is_none());
}

#[rstest]
fn chosen_node_always_satisfies_requirement(requirement: ResourceRequirement) {
    let candidates: Vec<NodeCandidate> = (0_u32..8)
        .map(|index| candidate(&format!("pve{index}"), index, u64::from(index) * 1024))
        .collect();
    let chosen = select(&requirement, &candidates, SelectionStrategy::LeastLoaded)
        .expect("a node with enough capacity exists");
    assert!(chosen.satisfies(&requirement));
}

#[rstest]
fn unmet_constraints_lists_every_failure(requirement: ResourceRequirement) {
    let node = NodeCandidate {
        name: String::from("empty"),
        ..NodeCandidate::default()
    };
    assert_eq!(
        node.unmet_constraints(&requirement),
        vec![
            Constraint::Cores,
            Constraint::Memory,
            Constraint::StoragePool,
            Constraint::NetworkBridge,
        ]
    );
}

#[test]
fn zero_capacity_scores_as_fully_used() {
    let empty = NodeCandidate::default();
    let idle = candidate("idle", 8, 16_384);
    assert!(idle.load_score() < empty.load_score());
}

#[rstest]
#[case(ResourceRequirement::builder().memory_mb(512).storage_gb(8).storage_pool("p").network_bridge("b"), RequirementError::Zero("cores"))]
#[case(ResourceRequirement::builder().cores(1).memory_mb(8).storage_gb(8).storage_pool("p").network_bridge("b"), RequirementError::MemoryTooSmall { requested: 8, minimum: MIN_MEMORY_MB })]
#[case(ResourceRequirement::builder().cores(1).memory_mb(512).storage_gb(8).storage_pool("  ").network_bridge("b"), RequirementError::Empty("storage_pool"))]
fn builder_rejects_malformed_requirements(
    #[case] builder: ResourceRequirementBuilder,
    #[case] expected: RequirementError,
) {
    assert_eq!(builder.build(), Err(expected));
}

fn pool(name: &str, content: &[&str], active: bool) -> StoragePool {
    StoragePool {
        name: name.to_owned(),
        content: names(content),
        active,
        ..StoragePool::default()
    }
}

#[tokio::test]
async fn snapshot_collects_online_nodes_only() {
    let gateway = FakeHypervisor::new();
    gateway.add_node(ClusterNode {
        name: String::from("pve1"),
        online: true,
        max_cores: 8,
        max_memory_bytes: 16 << 30,
        used_memory_bytes: 4 << 30,
    });
    gateway.add_node(ClusterNode {
        name: String::from("pve2"),
        online: false,
        max_cores: 8,
        max_memory_bytes: 16 << 30,
        used_memory_bytes: 0,
    });
    gateway.set_bridges("pve1", &["vmbr0"]);
    gateway.set_pools(
        "pve1",
        vec![
            pool("local", &["vztmpl", "iso"], true),
            pool("local-lvm", &["rootdir", "images"], true),
            pool("offline-zfs", &["rootdir"], false),
        ],
    );
    for (vmid, cores) in [(101, 2), (102, 1)] {
        gateway.add_container(ContainerSummary {
            vmid,
            node: String::from("pve1"),
            name: None,
            state: ContainerState::Running,
            cores,
        });
    }

    let candidates = snapshot(&gateway).await.expect("snapshot");

    assert_eq!(
        candidates,
        vec![NodeCandidate {
            name: String::from("pve1"),
            total_cores: 8,
            used_cores: 3,
            total_memory_mb: 16_384,
            used_memory_mb: 4096,
            storage_pools: names(&["local-lvm"]),
            bridges: names(&["vmbr0"]),
        }]
    );
}

#[tokio::test]
async fn snapshot_leaves_sets_empty_when_lookups_fail() {
    let gateway = FakeHypervisor::new();
    gateway.add_node(ClusterNode {
        name: String::from("pve1"),
        online: true,
        max_cores: 4,
        max_memory_bytes: 8 << 30,
        used_memory_bytes: 0,
    });
    gateway.fail("node_bridges", HypervisorError::Validation(String::from("boom")));

    let candidates = snapshot(&gateway).await.expect("snapshot");
    let node = candidates.first().expect("one candidate");
    assert!(node.bridges.is_empty());
}

#[rstest]
#[tokio::test]
async fn snapshot_excludes_node_whose_containers_cannot_be_listed(
    requirement: ResourceRequirement,
) {
    let gateway = FakeHypervisor::new();
    gateway.add_standard_node("pve1", 4, 16);
    gateway.add_container(ContainerSummary {
        vmid: 100,
        node: String::from("pve1"),
        name: Some(String::from("build")),
        state: ContainerState::Running,
        cores: 4,
    });
    gateway.fail(
        "list_containers",
        HypervisorError::Connectivity {
            host: String::from("pve.example.com"),
            message: String::from("connection reset"),
        },
    );

    let candidates = snapshot(&gateway).await.expect("snapshot");
    let node = candidates.first().expect("one candidate");

    assert_eq!(node.free_cores(), 0);
    assert_eq!(select(&requirement, &candidates, SelectionStrategy::LeastLoaded), None);
}

#[tokio::test]
async fn snapshot_propagates_node_listing_failure() {
    let gateway = FakeHypervisor::new();
    gateway.fail(
        "list_nodes",
        HypervisorError::Authentication { status: 401 },
    );
    let err = snapshot(&gateway).await.expect_err("listing fails");
    assert_eq!(err, HypervisorError::Authentication { status: 401 });
}
