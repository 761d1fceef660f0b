//! Placement constraints for a new container.

use thiserror::Error;

/// Resources a new container needs from its host node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceRequirement {
    /// CPU cores allocated to the container.
    pub cores: u32,
    /// Memory allocated to the container, in MiB.
    pub memory_mb: u64,
    /// Root filesystem size, in GiB.
    pub storage_gb: u64,
    /// Storage pool that will hold the root filesystem (for example `local-lvm`).
    pub storage_pool: String,
    /// Network bridge the container attaches to (for example `vmbr0`).
    pub network_bridge: String,
}

impl ResourceRequirement {
    /// Starts a builder for a [`ResourceRequirement`].
    #[must_use]
    pub fn builder() -> ResourceRequirementBuilder {
        ResourceRequirementBuilder::default()
    }

    /// Checks the requirement is internally consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RequirementError`] naming the first offending field.
    pub fn validate(&self) -> Result<(), RequirementError> {
        if self.cores == 0 {
            return Err(RequirementError::Zero("cores"));
        }
        if self.memory_mb < MIN_MEMORY_MB {
            return Err(RequirementError::MemoryTooSmall {
                requested: self.memory_mb,
                minimum: MIN_MEMORY_MB,
            });
        }
        if self.storage_gb == 0 {
            return Err(RequirementError::Zero("storage_gb"));
        }
        if self.storage_pool.is_empty() {
            return Err(RequirementError::Empty("storage_pool"));
        }
        if self.network_bridge.is_empty() {
            return Err(RequirementError::Empty("network_bridge"));
        }
        Ok(())
    }
}

/// Smallest memory allocation Proxmox accepts for an LXC container.
pub const MIN_MEMORY_MB: u64 = 16;

/// Builder for [`ResourceRequirement`] that trims names and validates on build.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResourceRequirementBuilder {
    cores: u32,
    memory_mb: u64,
    storage_gb: u64,
    storage_pool: String,
    network_bridge: String,
}

impl ResourceRequirementBuilder {
    /// Sets the core count.
    #[must_use]
    pub const fn cores(mut self, value: u32) -> Self {
        self.cores = value;
        self
    }

    /// Sets the memory allocation in MiB.
    #[must_use]
    pub const fn memory_mb(mut self, value: u64) -> Self {
        self.memory_mb = value;
        self
    }

    /// Sets the root filesystem size in GiB.
    #[must_use]
    pub const fn storage_gb(mut self, value: u64) -> Self {
        self.storage_gb = value;
        self
    }

    /// Sets the storage pool.
    #[must_use]
    pub fn storage_pool(mut self, value: impl Into<String>) -> Self {
        self.storage_pool = value.into();
        self
    }

    /// Sets the network bridge.
    #[must_use]
    pub fn network_bridge(mut self, value: impl Into<String>) -> Self {
        self.network_bridge = value.into();
        self
    }

    /// Builds and validates the requirement.
    ///
    /// # Errors
    ///
    /// Returns [`RequirementError`] when a field is zero, empty or too small.
    pub fn build(self) -> Result<ResourceRequirement, RequirementError> {
        let requirement = ResourceRequirement {
            cores: self.cores,
            memory_mb: self.memory_mb,
            storage_gb: self.storage_gb,
            storage_pool: self.storage_pool.trim().to_owned(),
            network_bridge: self.network_bridge.trim().to_owned(),
        };
        requirement.validate()?;
        Ok(requirement)
    }
}

/// Raised when a placement request is malformed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RequirementError {
    /// A numeric field must be positive.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    /// A name field must not be blank.
    #[error("{0} must not be empty")]
    Empty(&'static str),
    /// Memory is below the hypervisor's floor.
    #[error("memory of {requested} MiB is below the minimum of {minimum} MiB")]
    MemoryTooSmall {
        /// Requested allocation.
        requested: u64,
        /// Smallest accepted allocation.
        minimum: u64,
    },
}
