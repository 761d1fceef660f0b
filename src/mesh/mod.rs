//! Mesh network registry gateway and container reconciliation.
//!
//! When a container is destroyed its mesh entry would otherwise linger as an
//! offline ghost. [`MeshRegistryReconciler`] locates the entry for a container
//! with the fuzzy rules in [`matching`] and removes it, caching the registry
//! listing for [`LISTING_TTL`].

mod cache;
mod error;
pub mod matching;
mod tailscale;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::gateway::GatewayFuture;
use crate::prompt::Confirm;

pub use cache::{LISTING_TTL, ListingCache};
pub use error::MeshError;
pub use matching::{SuffixPattern, find_match};
pub use tailscale::{DEFAULT_API_BASE, TailscaleClient};

/// Machine joined to the mesh network.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct MeshNode {
    /// Registry id.
    pub id: String,
    /// Fully-qualified mesh name (for example `web1.tail1234.ts.net`).
    pub name: String,
    /// Host name the machine reported.
    pub hostname: String,
    /// Mesh addresses in registry order.
    pub addresses: Vec<String>,
    /// Whether the machine is currently connected.
    pub online: bool,
    /// Last time the registry saw the machine.
    pub last_seen: Option<String>,
    /// Operating system the machine reported.
    pub os: Option<String>,
    /// Whether the machine is authorised to join.
    pub authorized: bool,
    /// Whether key expiry is disabled.
    pub key_expiry_disabled: bool,
}

/// Narrow request/response interface to the mesh registry API.
pub trait MeshRegistry {
    /// Lists every machine in the network.
    fn list_devices(&self) -> GatewayFuture<'_, Vec<MeshNode>, MeshError>;

    /// Fetches one machine, or `None` when the id is unknown.
    fn get_device<'a>(&'a self, id: &'a str) -> GatewayFuture<'a, Option<MeshNode>, MeshError>;

    /// Removes a machine.
    fn delete_device<'a>(&'a self, id: &'a str) -> GatewayFuture<'a, (), MeshError>;

    /// Enables or disables key expiry for a machine.
    fn set_key_expiry<'a>(
        &'a self,
        id: &'a str,
        expiry_disabled: bool,
    ) -> GatewayFuture<'a, (), MeshError>;

    /// Authorises or deauthorises a machine.
    fn set_authorized<'a>(&'a self, id: &'a str, authorized: bool)
    -> GatewayFuture<'a, (), MeshError>;
}

/// What happened when removing a container's mesh entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RemovalOutcome {
    /// No entry matched; nothing to clean up.
    NotFound,
    /// The entry was deleted.
    Removed(MeshNode),
    /// The operator declined the deletion.
    Declined(MeshNode),
    /// Lookup or deletion failed.
    Failed {
        /// Entry that was matched, when the lookup succeeded.
        node: Option<MeshNode>,
        /// Error text.
        message: String,
    },
}

impl RemovalOutcome {
    /// `true` when no entry remains to clean up.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::NotFound | Self::Removed(_))
    }
}

/// Finds and removes mesh entries belonging to containers.
#[derive(Debug)]
pub struct MeshRegistryReconciler<R, C> {
    registry: R,
    confirm: C,
    cache: ListingCache<Vec<MeshNode>>,
}

impl<R: MeshRegistry, C: Confirm> MeshRegistryReconciler<R, C> {
    /// Creates a reconciler with an empty listing cache.
    pub fn new(registry: R, confirm: C) -> Self {
        Self {
            registry,
            confirm,
            cache: ListingCache::default(),
        }
    }

    /// Underlying registry gateway.
    #[must_use]
    pub const fn registry(&self) -> &R {
        &self.registry
    }

    async fn listing(&mut self) -> Result<&[MeshNode], MeshError> {
        if self.cache.fresh().is_none() {
            let nodes = self.registry.list_devices().await?;
            return Ok(self.cache.store(nodes).as_slice());
        }
        Ok(self.cache.fresh().map(Vec::as_slice).unwrap_or_default())
    }

    /// Lists registry entries, optionally only those online.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError`] when the listing cannot be fetched.
    pub async fn list(&mut self, online_only: bool) -> Result<Vec<MeshNode>, MeshError> {
        let nodes = self.listing().await?;
        Ok(nodes
            .iter()
            .filter(|node| !online_only || node.online)
            .cloned()
            .collect())
    }

    /// Finds the entry belonging to a container.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError`] when the listing cannot be fetched. An unmatched
    /// hostname is `Ok(None)`.
    pub async fn find(
        &mut self,
        hostname: &str,
        vmid: Option<u32>,
    ) -> Result<Option<MeshNode>, MeshError> {
        let wanted = hostname.trim();
        if wanted.is_empty() {
            return Ok(None);
        }
        let nodes = self.listing().await?;
        Ok(find_match(nodes, wanted, vmid).cloned())
    }

    /// Removes the container's entry, returning `true` when nothing remains to
    /// clean up.
    pub async fn remove(&mut self, hostname: &str, vmid: Option<u32>, force: bool) -> bool {
        self.reconcile(hostname, vmid, force).await.is_success()
    }

    /// Removes the container's entry and reports what happened.
    ///
    /// Unless `force` is set, the operator is asked before deleting. The
    /// listing cache is dropped after a delete attempt.
    pub async fn reconcile(
        &mut self,
        hostname: &str,
        vmid: Option<u32>,
        force: bool,
    ) -> RemovalOutcome {
        let node = match self.find(hostname, vmid).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                info!(hostname, ?vmid, "no mesh entry for container");
                return RemovalOutcome::NotFound;
            }
            Err(err) => {
                error!(hostname, error = %err, "cannot look up mesh entry");
                return RemovalOutcome::Failed {
                    node: None,
                    message: err.to_string(),
                };
            }
        };
        info!(hostname, node = %node.name, id = %node.id, "found mesh entry");

        if !force {
            let question = format!(
                "Remove mesh node '{}' (id {}) from the network?",
                node.name, node.id
            );
            if !self.confirm.confirm(&question) {
                info!(node = %node.name, "mesh entry removal declined");
                return RemovalOutcome::Declined(node);
            }
        }

        let result = self.registry.delete_device(&node.id).await;
        self.cache.invalidate();
        match result {
            Ok(()) => {
                info!(node = %node.name, "removed mesh entry");
                RemovalOutcome::Removed(node)
            }
            Err(err) => {
                warn!(node = %node.name, error = %err, "failed to remove mesh entry");
                RemovalOutcome::Failed {
                    message: err.to_string(),
                    node: Some(node),
                }
            }
        }
    }

    /// Re-enables key expiry on an entry so its key lapses normally.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError`] when the registry call fails.
    pub async fn expire_key(&mut self, id: &str) -> Result<(), MeshError> {
        let result = self.registry.set_key_expiry(id, false).await;
        self.cache.invalidate();
        result
    }

    /// Authorises or deauthorises an entry.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError`] when the registry call fails.
    pub async fn set_authorized(&mut self, id: &str, authorized: bool) -> Result<(), MeshError> {
        let result = self.registry.set_authorized(id, authorized).await;
        self.cache.invalidate();
        result
    }
}
