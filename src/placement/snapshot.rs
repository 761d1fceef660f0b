//! Builds placement candidates from live cluster state.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::hypervisor::{HypervisorError, HypervisorGateway};

use super::NodeCandidate;

/// Collects a capacity snapshot of every online node.
///
/// Allocated cores are the sum of cores assigned to the node's containers,
/// running or not. A node whose bridges or pools cannot be listed is still
/// returned with the affected set left empty, and one whose containers cannot
/// be listed is reported fully allocated, so it fails the matching constraint.
///
/// # Errors
///
/// Returns [`HypervisorError`] when the node listing itself fails.
pub async fn snapshot<G>(gateway: &G) -> Result<Vec<NodeCandidate>, HypervisorError>
where
    G: HypervisorGateway + ?Sized,
{
    let nodes = gateway.list_nodes().await?;
    let mut candidates = Vec::with_capacity(nodes.len());

    for node in nodes.into_iter().filter(|node| node.online) {
        let bridges = match gateway.node_bridges(&node.name).await {
            Ok(bridges) => bridges.into_iter().collect(),
            Err(err) => {
                warn!(node = %node.name, error = %err, "cannot list network bridges");
                BTreeSet::new()
            }
        };
        let storage_pools = match gateway.storage_pools(&node.name).await {
            Ok(pools) => pools
                .into_iter()
                .filter(|pool| pool.active && pool.supports_containers())
                .map(|pool| pool.name)
                .collect(),
            Err(err) => {
                warn!(node = %node.name, error = %err, "cannot list storage pools");
                BTreeSet::new()
            }
        };
        let used_cores = match gateway.list_containers(&node.name).await {
            Ok(containers) => containers
                .iter()
                .fold(0_u32, |total, container| total.saturating_add(container.cores)),
            Err(err) => {
                warn!(
                    node = %node.name,
                    error = %err,
                    "cannot list containers; treating node as fully allocated"
                );
                node.max_cores
            }
        };

        let candidate = NodeCandidate {
            total_cores: node.max_cores,
            used_cores,
            total_memory_mb: node.max_memory_bytes >> 20,
            used_memory_mb: node.used_memory_bytes >> 20,
            storage_pools,
            bridges,
            name: node.name,
        };
        debug!(
            node = %candidate.name,
            free_cores = candidate.free_cores(),
            free_memory_mb = candidate.free_memory_mb(),
            "placement candidate"
        );
        candidates.push(candidate);
    }

    Ok(candidates)
}
