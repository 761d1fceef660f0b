//! OpenSSH sessions multiplexed over a control master socket.

use std::ffi::OsString;
use std::io;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    CommandRunner, CommandTransport, RemoteOutput, RetryPolicy, TransportError, TransportKind,
};

/// Where a session connects to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshEndpoint {
    /// Host name or address.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Login user.
    pub user: String,
}

impl SshEndpoint {
    /// Endpoint on the default SSH port.
    #[must_use]
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
        }
    }

    /// `user@host` as passed to the SSH client.
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Credential mode for a session. Exactly one mode is attempted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SshAuth {
    /// Private key file, non-interactive.
    KeyFile(Utf8PathBuf),
    /// Interactive password prompt on the controlling terminal.
    Password,
}

impl SshAuth {
    /// Uses the key file when it exists, otherwise falls back to password
    /// entry. A leading `~/` is expanded against `HOME`.
    #[must_use]
    pub fn detect(identity_file: Option<&str>) -> Self {
        let Some(raw) = identity_file.map(str::trim).filter(|path| !path.is_empty()) else {
            return Self::Password;
        };
        let path = Utf8PathBuf::from(expand_tilde(raw));
        match key_file_exists(&path) {
            Ok(true) => Self::KeyFile(path),
            Ok(false) => {
                warn!(path = %path, "SSH key file not found; falling back to password authentication");
                Self::Password
            }
            Err(err) => {
                warn!(path = %path, error = %err, "cannot inspect SSH key file; falling back to password authentication");
                Self::Password
            }
        }
    }

    fn args(&self) -> Vec<OsString> {
        match self {
            Self::KeyFile(path) => vec![
                OsString::from("-i"),
                OsString::from(path.as_str()),
                OsString::from("-o"),
                OsString::from("BatchMode=yes"),
                OsString::from("-o"),
                OsString::from("IdentitiesOnly=yes"),
            ],
            Self::Password => vec![
                OsString::from("-o"),
                OsString::from("PreferredAuthentications=password,keyboard-interactive"),
                OsString::from("-o"),
                OsString::from("PubkeyAuthentication=no"),
            ],
        }
    }
}

fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

fn key_file_exists(path: &Utf8Path) -> io::Result<bool> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let Some(file_name) = path.file_name() else {
        return Ok(false);
    };
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir.try_exists(file_name),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Client-side settings shared by every session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshOptions {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Per-attempt connection timeout.
    pub connect_timeout: Duration,
    /// Credential mode.
    pub auth: SshAuth,
}

impl SshOptions {
    fn common_args(&self, port: u16) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(port.to_string()),
            OsString::from("-o"),
            OsString::from(format!(
                "ConnectTimeout={}",
                self.connect_timeout.as_secs().max(1)
            )),
            OsString::from("-o"),
            OsString::from("StrictHostKeyChecking=no"),
            OsString::from("-o"),
            OsString::from("UserKnownHostsFile=/dev/null"),
            OsString::from("-o"),
            OsString::from("LogLevel=ERROR"),
        ];
        args.extend(self.auth.args());
        args
    }
}

/// One SSH connection, kept alive as an OpenSSH control master so every
/// command reuses it.
#[derive(Debug)]
pub struct SshSession<R: CommandRunner> {
    runner: R,
    options: SshOptions,
    endpoint: SshEndpoint,
    control_path: Option<Utf8PathBuf>,
}

impl<R: CommandRunner> SshSession<R> {
    /// Creates a closed session.
    pub const fn new(runner: R, options: SshOptions, endpoint: SshEndpoint) -> Self {
        Self {
            runner,
            options,
            endpoint,
            control_path: None,
        }
    }

    /// Endpoint this session connects to.
    #[must_use]
    pub const fn endpoint(&self) -> &SshEndpoint {
        &self.endpoint
    }

    /// Returns `true` between a successful connect and disconnect.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.control_path.is_some()
    }

    /// Connects, retrying up to `policy.attempts` times with `policy.delay`
    /// between attempts.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Spawn`] at once when the client cannot be
    /// started, or [`TransportError::Unreachable`] when every attempt fails.
    pub fn connect(&mut self, policy: RetryPolicy) -> Result<(), TransportError> {
        if self.is_open() {
            return Ok(());
        }
        let attempts = policy.attempts.max(1);
        let target = self.endpoint.target();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let control_path = fresh_control_path();
            let output = self
                .runner
                .run(&self.options.ssh_bin, &self.master_args(&control_path))?;
            if output.is_success() {
                info!(destination = %target, attempt, "SSH session established");
                self.control_path = Some(control_path);
                return Ok(());
            }
            last_error = output.stderr.trim().to_owned();
            warn!(destination = %target, attempt, attempts, error = %last_error, "SSH connection attempt failed");
            if attempt < attempts {
                thread::sleep(policy.delay);
            }
        }

        Err(TransportError::Unreachable {
            target,
            attempts,
            message: last_error,
        })
    }

    /// Runs `command` through the open connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotOpen`] before [`SshSession::connect`], or
    /// [`TransportError::Spawn`] when the client cannot be started.
    pub fn run(&self, command: &str) -> Result<RemoteOutput, TransportError> {
        let control_path = self
            .control_path
            .as_deref()
            .ok_or_else(|| TransportError::NotOpen {
                target: self.endpoint.target(),
            })?;
        debug!(host = %self.endpoint.host, "running remote command");
        let mut args = control_args(control_path);
        args.push(OsString::from("-p"));
        args.push(OsString::from(self.endpoint.port.to_string()));
        args.push(OsString::from(self.endpoint.target()));
        args.push(OsString::from(command));
        let output = self.runner.run(&self.options.ssh_bin, &args)?;
        Ok(RemoteOutput::from(output))
    }

    /// Closes the control master. Failures are logged and ignored.
    pub fn disconnect(&mut self) {
        let Some(control_path) = self.control_path.take() else {
            return;
        };
        let mut args = control_args(&control_path);
        args.push(OsString::from("-O"));
        args.push(OsString::from("exit"));
        args.push(OsString::from(self.endpoint.target()));
        match self.runner.run(&self.options.ssh_bin, &args) {
            Ok(output) if output.is_success() => {
                debug!(host = %self.endpoint.host, "SSH session closed");
            }
            Ok(output) => {
                debug!(host = %self.endpoint.host, stderr = %output.stderr.trim(), "SSH control master did not exit cleanly");
            }
            Err(err) => debug!(host = %self.endpoint.host, error = %err, "cannot close SSH session"),
        }
    }

    fn master_args(&self, control_path: &Utf8Path) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-o"),
            OsString::from("ControlMaster=yes"),
            OsString::from("-o"),
            OsString::from(format!("ControlPath={control_path}")),
            OsString::from("-o"),
            OsString::from("ControlPersist=yes"),
            OsString::from("-f"),
            OsString::from("-N"),
        ];
        args.extend(self.options.common_args(self.endpoint.port));
        args.push(OsString::from(self.endpoint.target()));
        args
    }
}

fn control_args(control_path: &Utf8Path) -> Vec<OsString> {
    vec![
        OsString::from("-o"),
        OsString::from(format!("ControlPath={control_path}")),
    ]
}

fn fresh_control_path() -> Utf8PathBuf {
    let dir = Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
    dir.join(format!("pxrun-{}.sock", Uuid::new_v4().simple()))
}

/// Transport that connects straight to the container's address, waiting for
/// it to become reachable.
#[derive(Debug)]
pub struct DirectSshTransport<R: CommandRunner> {
    session: SshSession<R>,
    retry: RetryPolicy,
}

impl<R: CommandRunner> DirectSshTransport<R> {
    /// Creates a transport for `endpoint` using `retry` while opening.
    pub const fn new(
        runner: R,
        options: SshOptions,
        endpoint: SshEndpoint,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            session: SshSession::new(runner, options, endpoint),
            retry,
        }
    }
}

impl<R: CommandRunner> CommandTransport for DirectSshTransport<R> {
    fn kind(&self) -> TransportKind {
        TransportKind::DirectSsh
    }

    fn open(&mut self) -> Result<(), TransportError> {
        info!(
            destination = %self.session.endpoint().target(),
            attempts = self.retry.attempts,
            delay_secs = self.retry.delay.as_secs(),
            "waiting for container SSH"
        );
        self.session.connect(self.retry)
    }

    fn execute(&mut self, command: &str) -> Result<RemoteOutput, TransportError> {
        self.session.run(command)
    }

    fn close(&mut self) {
        self.session.disconnect();
    }
}
