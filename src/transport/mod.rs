//! Command transports that run shell commands inside a container.
//!
//! Two implementations share the [`CommandTransport`] contract:
//! [`DirectSshTransport`] connects to the container's own address, while
//! [`HostExecTransport`] connects to the hypervisor node and enters the guest
//! with `pct exec`. [`HostShellTransport`] runs commands on the node itself
//! for configuration the guest cannot do. All drive the system OpenSSH
//! client through a [`CommandRunner`] and multiplex every command over one
//! control master connection.

mod host_exec;
mod runner;
mod ssh;

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub use host_exec::{HostExecTransport, HostShellTransport};
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner};
pub use ssh::{DirectSshTransport, SshAuth, SshEndpoint, SshOptions, SshSession};

/// Which transport variant is in use.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportKind {
    /// SSH straight into the container.
    DirectSsh,
    /// SSH to the hypervisor host, then `pct exec` into the guest.
    HostExec,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectSsh => f.write_str("direct ssh"),
            Self::HostExec => f.write_str("host exec"),
        }
    }
}

/// Outcome of one command run inside the container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteOutput {
    /// Whether the command exited with status zero.
    pub success: bool,
    /// Exit code reported by the remote side, if any.
    pub exit_code: Option<i32>,
    /// Standard output on success, standard error on failure.
    pub output: String,
}

impl From<CommandOutput> for RemoteOutput {
    fn from(value: CommandOutput) -> Self {
        let success = value.is_success();
        let output = if success || value.stderr.trim().is_empty() {
            value.stdout
        } else {
            value.stderr
        };
        Self {
            success,
            exit_code: value.code,
            output,
        }
    }
}

/// Bounded reachability retry: `attempts` tries with `delay` between them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total connection attempts, including the first.
    pub attempts: u32,
    /// Pause between consecutive attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// A single attempt with no waiting.
    #[must_use]
    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(12, Duration::from_secs(5))
    }
}

/// Errors raised by command transports.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum TransportError {
    /// Raised when the SSH client binary cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error text.
        message: String,
    },
    /// Raised when no session could be established within the retry budget.
    #[error("{target} unreachable after {attempts} attempt(s): {message}")]
    Unreachable {
        /// Address the session was aimed at.
        target: String,
        /// Attempts made before giving up.
        attempts: u32,
        /// Last error reported by the SSH client.
        message: String,
    },
    /// Raised when a command is issued before `open` or after `close`.
    #[error("transport session to {target} is not open")]
    NotOpen {
        /// Address the session was aimed at.
        target: String,
    },
}

/// Narrow contract the provisioning engine depends on.
pub trait CommandTransport {
    /// Variant in use; the engine skips key installation for host exec.
    fn kind(&self) -> TransportKind;

    /// Establishes the session.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the session cannot be established.
    fn open(&mut self) -> Result<(), TransportError>;

    /// Runs one shell command in the container.
    ///
    /// A non-zero exit is reported through [`RemoteOutput::success`], not as
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the command could not be delivered.
    fn execute(&mut self, command: &str) -> Result<RemoteOutput, TransportError>;

    /// Tears the session down. Safe to call when not open.
    fn close(&mut self);
}

impl<T: CommandTransport + ?Sized> CommandTransport for Box<T> {
    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    fn open(&mut self) -> Result<(), TransportError> {
        (**self).open()
    }

    fn execute(&mut self, command: &str) -> Result<RemoteOutput, TransportError> {
        (**self).execute(command)
    }

    fn close(&mut self) {
        (**self).close();
    }
}
