//! Post-creation configuration of a container.
//!
//! [`ProvisioningEngine::run`] opens a [`CommandTransport`] and runs a fixed
//! sequence: authorised keys (direct SSH only), package index refresh,
//! requested packages, Docker, and the Tailscale client. The order is not
//! configurable. The session is closed on every exit path.

mod auth_key;
mod error;
mod steps;

use tracing::{info, warn};

use crate::transport::{CommandTransport, TransportKind};

pub use auth_key::{referenced_variable, resolve_auth_key};
pub use error::ProvisioningError;
pub use steps::ProvisioningStep;

/// What to install in a new container.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProvisioningSpec {
    /// Public keys appended to root's `authorized_keys`.
    pub ssh_keys: Vec<String>,
    /// Distribution packages to install.
    pub packages: Vec<String>,
    /// Whether to install Docker CE.
    pub install_docker: bool,
    /// Tailscale auth key, or a `${VAR}` reference to one.
    pub mesh_auth_key: Option<String>,
}

impl ProvisioningSpec {
    /// `true` when a run would do no more than refresh the package index.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ssh_keys.is_empty()
            && self.packages.is_empty()
            && !self.install_docker
            && self.mesh_auth_key.is_none()
    }
}

/// Record of a completed run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProvisioningReport {
    /// Descriptions of the steps that ran, in order.
    pub executed: Vec<String>,
    /// Failures of non-fatal steps.
    pub warnings: Vec<String>,
}

/// Closes the transport when dropped.
struct OpenSession<'t, T: CommandTransport + ?Sized> {
    transport: &'t mut T,
}

impl<'t, T: CommandTransport + ?Sized> OpenSession<'t, T> {
    fn open(transport: &'t mut T) -> Result<Self, ProvisioningError> {
        transport.open()?;
        Ok(Self { transport })
    }
}

impl<T: CommandTransport + ?Sized> Drop for OpenSession<'_, T> {
    fn drop(&mut self) {
        self.transport.close();
    }
}

/// Looks a variable up in the process environment.
#[must_use]
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Runs the provisioning sequence.
///
/// `lookup` resolves `${VAR}` references in the auth key.
#[derive(Clone, Debug)]
pub struct ProvisioningEngine<L = fn(&str) -> Option<String>> {
    lookup: L,
}

impl Default for ProvisioningEngine {
    fn default() -> Self {
        Self::new(process_env)
    }
}

impl<L: Fn(&str) -> Option<String>> ProvisioningEngine<L> {
    /// Engine resolving auth key references through `lookup`.
    pub const fn new(lookup: L) -> Self {
        Self { lookup }
    }

    /// Runs the sequence over `transport`.
    ///
    /// Stops at the first failing fatal step. Failures of non-fatal steps are
    /// recorded in the report.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::StepFailed`] naming the failing step,
    /// [`ProvisioningError::MissingAuthKey`] when the auth key reference
    /// cannot be resolved, or [`ProvisioningError::Transport`] when the
    /// session fails.
    pub fn run<T>(
        &self,
        spec: &ProvisioningSpec,
        transport: &mut T,
    ) -> Result<ProvisioningReport, ProvisioningError>
    where
        T: CommandTransport + ?Sized,
    {
        let auth_key = spec
            .mesh_auth_key
            .as_deref()
            .map(|raw| resolve_auth_key(raw, &self.lookup))
            .transpose()?;
        let kind = transport.kind();
        info!(transport = %kind, "starting provisioning");
        let mut session = OpenSession::open(transport)?;
        let mut report = ProvisioningReport::default();

        for step in base_steps(spec, kind) {
            run_step(&mut session, &step, &mut report)?;
        }

        if let Some(key) = auth_key.as_deref() {
            for step in steps::mesh_steps(key) {
                run_step(&mut session, &step, &mut report)?;
            }
        }

        info!(steps = report.executed.len(), warnings = report.warnings.len(), "provisioning complete");
        Ok(report)
    }

    /// Runs the sequence and reports only overall success.
    #[must_use]
    pub fn succeeded<T>(&self, spec: &ProvisioningSpec, transport: &mut T) -> bool
    where
        T: CommandTransport + ?Sized,
    {
        match self.run(spec, transport) {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "provisioning failed");
                false
            }
        }
    }
}

/// Steps that would run for `spec` over a `kind` transport, with the auth key
/// left unresolved.
#[must_use]
pub fn plan(spec: &ProvisioningSpec, kind: TransportKind) -> Vec<ProvisioningStep> {
    let mut planned = base_steps(spec, kind);
    if let Some(raw) = spec.mesh_auth_key.as_deref() {
        planned.extend(steps::mesh_steps(raw));
    }
    planned
}

fn base_steps(spec: &ProvisioningSpec, kind: TransportKind) -> Vec<ProvisioningStep> {
    let mut planned = Vec::new();
    if kind == TransportKind::DirectSsh {
        planned.extend(steps::authorized_key_steps(&spec.ssh_keys));
    }
    planned.push(steps::package_index_step());
    planned.extend(steps::package_install_step(&spec.packages));
    if spec.install_docker {
        planned.extend(steps::docker_steps());
    }
    planned
}

fn run_step<T: CommandTransport + ?Sized>(
    session: &mut OpenSession<'_, T>,
    step: &ProvisioningStep,
    report: &mut ProvisioningReport,
) -> Result<(), ProvisioningError> {
    info!(step = %step.description, "provisioning step");
    let output = session.transport.execute(&step.command)?;
    report.executed.push(step.description.clone());
    if output.success {
        return Ok(());
    }
    let detail = output.output.trim().to_owned();
    if step.fatal {
        warn!(step = %step.description, output = %detail, "provisioning step failed");
        return Err(ProvisioningError::StepFailed {
            step: step.description.clone(),
            output: detail,
        });
    }
    warn!(step = %step.description, output = %detail, "non-fatal provisioning step failed; continuing");
    report
        .warnings
        .push(format!("{}: {detail}", step.description));
    Ok(())
}

#[cfg(test)]
mod tests;
