//! Runs commands on the hypervisor host, either there or inside a guest.

use shell_escape::unix::escape;

use super::{
    CommandRunner, CommandTransport, RemoteOutput, RetryPolicy, SshEndpoint, SshOptions,
    SshSession, TransportError, TransportKind,
};

/// Transport that opens SSH to the hypervisor node and wraps each command in
/// `pct exec <vmid>`.
///
/// The host is assumed reachable, so opening makes a single attempt.
#[derive(Debug)]
pub struct HostExecTransport<R: CommandRunner> {
    session: SshSession<R>,
    vmid: u32,
}

impl<R: CommandRunner> HostExecTransport<R> {
    /// Creates a transport for container `vmid` hosted behind `host`.
    pub const fn new(runner: R, options: SshOptions, host: SshEndpoint, vmid: u32) -> Self {
        Self {
            session: SshSession::new(runner, options, host),
            vmid,
        }
    }

    /// Host-level command that runs `command` inside the guest.
    #[must_use]
    pub fn wrap(&self, command: &str) -> String {
        format!("pct exec {} -- sh -c {}", self.vmid, escape(command.into()))
    }
}

impl<R: CommandRunner> CommandTransport for HostExecTransport<R> {
    fn kind(&self) -> TransportKind {
        TransportKind::HostExec
    }

    fn open(&mut self) -> Result<(), TransportError> {
        self.session.connect(RetryPolicy::once())
    }

    fn execute(&mut self, command: &str) -> Result<RemoteOutput, TransportError> {
        let wrapped = self.wrap(command);
        self.session.run(&wrapped)
    }

    fn close(&mut self) {
        self.session.disconnect();
    }
}

/// Transport that runs commands on the hypervisor node itself, for host-side
/// container configuration.
#[derive(Debug)]
pub struct HostShellTransport<R: CommandRunner> {
    session: SshSession<R>,
}

impl<R: CommandRunner> HostShellTransport<R> {
    /// Creates a transport for `host`.
    pub const fn new(runner: R, options: SshOptions, host: SshEndpoint) -> Self {
        Self {
            session: SshSession::new(runner, options, host),
        }
    }
}

impl<R: CommandRunner> CommandTransport for HostShellTransport<R> {
    fn kind(&self) -> TransportKind {
        TransportKind::HostExec
    }

    fn open(&mut self) -> Result<(), TransportError> {
        self.session.connect(RetryPolicy::once())
    }

    fn execute(&mut self, command: &str) -> Result<RemoteOutput, TransportError> {
        self.session.run(command)
    }

    fn close(&mut self) {
        self.session.disconnect();
    }
}
