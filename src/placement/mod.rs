//! Node placement for new containers.
//!
//! Selection is a pure decision over a snapshot of cluster capacity supplied by
//! the caller. Nothing is reserved: two creations racing against the same
//! snapshot may both pick the same node.

mod requirement;
mod snapshot;

use std::collections::BTreeSet;

use tracing::debug;

pub use requirement::{
    MIN_MEMORY_MB, RequirementError, ResourceRequirement, ResourceRequirementBuilder,
};
pub use snapshot::snapshot;

/// Capacity snapshot of one cluster node at selection time.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NodeCandidate {
    /// Node name as known to the cluster.
    pub name: String,
    /// Physical cores on the node.
    pub total_cores: u32,
    /// Cores already allocated to guests.
    pub used_cores: u32,
    /// Node memory, in MiB.
    pub total_memory_mb: u64,
    /// Memory in use, in MiB.
    pub used_memory_mb: u64,
    /// Storage pools reachable from the node.
    pub storage_pools: BTreeSet<String>,
    /// Network bridges configured on the node.
    pub bridges: BTreeSet<String>,
}

/// A single placement constraint a candidate can fail.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Constraint {
    /// Not enough unallocated cores.
    Cores,
    /// Not enough free memory.
    Memory,
    /// Requested storage pool missing.
    StoragePool,
    /// Requested bridge missing.
    NetworkBridge,
}

impl NodeCandidate {
    /// Cores not yet allocated.
    #[must_use]
    pub const fn free_cores(&self) -> u32 {
        self.total_cores.saturating_sub(self.used_cores)
    }

    /// Memory not yet in use, in MiB.
    #[must_use]
    pub const fn free_memory_mb(&self) -> u64 {
        self.total_memory_mb.saturating_sub(self.used_memory_mb)
    }

    /// Lists every constraint this node fails for `requirement`.
    #[must_use]
    pub fn unmet_constraints(&self, requirement: &ResourceRequirement) -> Vec<Constraint> {
        let mut unmet = Vec::new();
        if self.free_cores() < requirement.cores {
            unmet.push(Constraint::Cores);
        }
        if self.free_memory_mb() < requirement.memory_mb {
            unmet.push(Constraint::Memory);
        }
        if !self.storage_pools.contains(&requirement.storage_pool) {
            unmet.push(Constraint::StoragePool);
        }
        if !self.bridges.contains(&requirement.network_bridge) {
            unmet.push(Constraint::NetworkBridge);
        }
        unmet
    }

    /// Returns `true` when the node satisfies every constraint.
    #[must_use]
    pub fn satisfies(&self, requirement: &ResourceRequirement) -> bool {
        self.unmet_constraints(requirement).is_empty()
    }

    /// Combined CPU and memory utilisation with equal weight.
    #[must_use]
    pub fn load_score(&self) -> LoadScore {
        LoadScore::new(
            utilisation_ppb(u64::from(self.used_cores), u64::from(self.total_cores)),
            utilisation_ppb(self.used_memory_mb, self.total_memory_mb),
        )
    }
}

const PARTS_PER_BILLION: u128 = 1_000_000_000;

/// Utilisation ratio in parts per billion. An empty capacity counts as fully
/// used so it never looks attractive.
fn utilisation_ppb(used: u64, total: u64) -> u128 {
    u128::from(used)
        .saturating_mul(PARTS_PER_BILLION)
        .checked_div(u128::from(total))
        .unwrap_or(PARTS_PER_BILLION)
}

/// Load score used by [`SelectionStrategy::LeastLoaded`]; lower is better.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct LoadScore(u128);

impl LoadScore {
    const fn new(cpu_ppb: u128, memory_ppb: u128) -> Self {
        Self(cpu_ppb.saturating_add(memory_ppb))
    }
}

/// Strategy for ranking candidates that pass every constraint.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SelectionStrategy {
    /// Lowest combined CPU and memory utilisation, ties broken by name.
    #[default]
    LeastLoaded,
    /// First eligible node in name order.
    FirstAvailable,
}

/// Picks a node for `requirement` from `candidates`.
///
/// Returns `None` when no candidate satisfies every constraint; callers fall
/// back to asking the operator for a node.
#[must_use]
pub fn select<'a>(
    requirement: &ResourceRequirement,
    candidates: &'a [NodeCandidate],
    strategy: SelectionStrategy,
) -> Option<&'a NodeCandidate> {
    let eligible = candidates.iter().filter(|candidate| {
        let unmet = candidate.unmet_constraints(requirement);
        if !unmet.is_empty() {
            debug!(node = %candidate.name, ?unmet, "node excluded from placement");
        }
        unmet.is_empty()
    });

    let chosen = match strategy {
        SelectionStrategy::LeastLoaded => eligible.min_by(|left, right| {
            left.load_score()
                .cmp(&right.load_score())
                .then_with(|| left.name.cmp(&right.name))
        }),
        SelectionStrategy::FirstAvailable => {
            eligible.min_by(|left, right| left.name.cmp(&right.name))
        }
    };

    match chosen {
        Some(node) => debug!(node = %node.name, ?strategy, "placement decided"),
        None => debug!(?strategy, "no node satisfies the placement requirement"),
    }
    chosen
}

#[cfg(test)]
mod tests;
