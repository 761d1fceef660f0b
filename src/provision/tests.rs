//! Unit tests for the provisioning engine.

use rstest::{fixture, rstest};

use super::*;
use crate::test_support::RecordingTransport;
use crate::transport::TransportError;

fn lookup(name: &str) -> Option<String> {
    (name == "TS_AUTH").then(|| String::from("tskey-auth-xyz"))
}

#[fixture]
fn engine() -> ProvisioningEngine {
    ProvisioningEngine::new(lookup as fn(&str) -> Option<String>)
}

fn spec() -> ProvisioningSpec {
    ProvisioningSpec {
        ssh_keys: vec![String::from("ssh-ed25519 AAAAC3Nz operator@laptop")],
        packages: vec![String::from("git"), String::from("htop")],
        install_docker: false,
        mesh_auth_key: None,
    }
}

#[rstest]
fn direct_ssh_runs_keys_then_packages(engine: ProvisioningEngine) {
    let mut transport = RecordingTransport::new(TransportKind::DirectSsh);

    let report = engine.run(&spec(), &mut transport).expect("run succeeds");

    assert_eq!(
        report.executed,
        [
            "Install SSH key 1",
            "Update package index",
            "Install packages: git, htop",
        ]
    );
    let commands = transport.commands();
    let key_command = commands.first().expect("key step ran");
    assert!(key_command.contains("grep -qxF 'ssh-ed25519 AAAAC3Nz operator@laptop'"));
    assert!(key_command.contains("chmod 700 ~/.ssh"));
    assert_eq!(
        commands.get(2).map(String::as_str),
        Some("DEBIAN_FRONTEND=noninteractive apt-get install -y git htop")
    );
    assert_eq!(transport.open_count(), 1);
    assert_eq!(transport.close_count(), 1);
}

#[rstest]
fn host_exec_skips_key_installation(engine: ProvisioningEngine) {
    let mut transport = RecordingTransport::new(TransportKind::HostExec);

    let report = engine.run(&spec(), &mut transport).expect("run succeeds");

    assert_eq!(
        report.executed,
        ["Update package index", "Install packages: git, htop"]
    );
    assert!(
        transport
            .commands()
            .iter()
            .all(|command| !command.contains("authorized_keys"))
    );
}

#[rstest]
fn index_refresh_failure_is_only_a_warning(engine: ProvisioningEngine) {
    let mut transport = RecordingTransport::new(TransportKind::HostExec);
    transport.fail_when_contains("apt-get update", "Temporary failure resolving 'deb.debian.org'");

    let report = engine.run(&spec(), &mut transport).expect("run succeeds");

    assert_eq!(report.executed.len(), 2);
    assert_eq!(
        report.warnings,
        ["Update package index: Temporary failure resolving 'deb.debian.org'"]
    );
}

#[rstest]
fn package_failure_is_fatal(engine: ProvisioningEngine) {
    let mut transport = RecordingTransport::new(TransportKind::HostExec);
    transport.fail_when_contains("install -y git", "E: Unable to locate package git");
    let with_docker = ProvisioningSpec {
        install_docker: true,
        ..spec()
    };

    let err = engine
        .run(&with_docker, &mut transport)
        .expect_err("package install fails");

    assert_eq!(
        err,
        ProvisioningError::StepFailed {
            step: String::from("Install packages: git, htop"),
            output: String::from("E: Unable to locate package git"),
        }
    );
    assert_eq!(transport.commands().len(), 2);
    assert_eq!(transport.close_count(), 1);
}

#[rstest]
fn docker_halts_at_first_failing_sub_step(engine: ProvisioningEngine) {
    let mut transport = RecordingTransport::new(TransportKind::HostExec);
    transport.fail_when_contains("install -m 0755 -d /etc/apt/keyrings", "permission denied");
    let with_docker = ProvisioningSpec {
        install_docker: true,
        mesh_auth_key: Some(String::from("${TS_AUTH}")),
        ..spec()
    };

    let err = engine
        .run(&with_docker, &mut transport)
        .expect_err("keyrings directory fails");

    assert_eq!(
        err,
        ProvisioningError::StepFailed {
            step: String::from("Docker: create keyrings directory"),
            output: String::from("permission denied"),
        }
    );
    let commands = transport.commands();
    assert_eq!(commands.len(), 4);
    assert!(
        commands
            .get(1)
            .is_some_and(|command| command.ends_with("install -y git htop"))
    );
    assert!(commands.iter().all(|command| !command.contains("docker.asc")));
    assert!(commands.iter().all(|command| !command.contains("tailscale")));
    assert!(!engine.succeeded(&with_docker, &mut transport));
    assert_eq!(transport.close_count(), 2);
}

#[rstest]
fn full_sequence_follows_fixed_order(engine: ProvisioningEngine) {
    let mut transport = RecordingTransport::new(TransportKind::DirectSsh);
    let everything = ProvisioningSpec {
        install_docker: true,
        mesh_auth_key: Some(String::from("${TS_AUTH}")),
        ..spec()
    };

    let report = engine.run(&everything, &mut transport).expect("run succeeds");

    assert_eq!(
        report.executed,
        [
            "Install SSH key 1",
            "Update package index",
            "Install packages: git, htop",
            "Docker: install prerequisites",
            "Docker: create keyrings directory",
            "Docker: add signing key",
            "Docker: add repository",
            "Docker: update package index",
            "Docker: install packages",
            "Tailscale: install client",
            "Tailscale: join network",
        ]
    );
    assert_eq!(
        transport.commands().last().map(String::as_str),
        Some("tailscale up --auth-key=tskey-auth-xyz")
    );
}

#[rstest]
fn unset_auth_key_reference_fails_before_the_session_opens(engine: ProvisioningEngine) {
    let mut transport = RecordingTransport::new(TransportKind::HostExec);
    let missing = ProvisioningSpec {
        packages: vec![String::from("git")],
        install_docker: true,
        mesh_auth_key: Some(String::from("${NOT_SET}")),
        ..ProvisioningSpec::default()
    };

    let err = engine.run(&missing, &mut transport).expect_err("variable unset");

    assert_eq!(
        err,
        ProvisioningError::MissingAuthKey {
            variable: String::from("NOT_SET"),
        }
    );
    assert!(transport.commands().is_empty());
    assert_eq!(transport.open_count(), 0);
    assert_eq!(transport.close_count(), 0);
}

#[rstest]
fn failed_open_runs_nothing(engine: ProvisioningEngine) {
    let mut transport = RecordingTransport::new(TransportKind::DirectSsh);
    transport.fail_open(TransportError::Unreachable {
        target: String::from("root@10.0.0.5"),
        attempts: 12,
        message: String::from("Connection timed out"),
    });

    let err = engine.run(&spec(), &mut transport).expect_err("unreachable");

    assert!(matches!(
        err,
        ProvisioningError::Transport(TransportError::Unreachable { attempts: 12, .. })
    ));
    assert!(transport.commands().is_empty());
    assert_eq!(transport.close_count(), 0);
}

#[test]
fn plan_lists_mesh_steps_without_resolving_key() {
    let planned = plan(
        &ProvisioningSpec {
            mesh_auth_key: Some(String::from("${TS_AUTH}")),
            ..ProvisioningSpec::default()
        },
        TransportKind::HostExec,
    );
    let descriptions: Vec<&str> = planned
        .iter()
        .map(|step| step.description.as_str())
        .collect();
    assert_eq!(
        descriptions,
        [
            "Update package index",
            "Tailscale: install client",
            "Tailscale: join network",
        ]
    );
    assert!(planned.first().is_some_and(|step| !step.fatal));
}
