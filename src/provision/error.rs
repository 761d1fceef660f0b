//! Error type for provisioning runs.

use thiserror::Error;

use crate::transport::TransportError;

/// Reasons a provisioning run stops early.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ProvisioningError {
    /// A fatal step exited non-zero.
    #[error("provisioning step '{step}' failed: {output}")]
    StepFailed {
        /// Description of the failing step.
        step: String,
        /// Error output from the container.
        output: String,
    },
    /// The session could not be opened or a command could not be delivered.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The auth key references an unset environment variable.
    #[error("mesh auth key references ${{{variable}}}, which is not set")]
    MissingAuthKey {
        /// Referenced variable name.
        variable: String,
    },
}
