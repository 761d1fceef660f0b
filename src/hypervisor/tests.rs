//! Unit tests for hypervisor types and Proxmox wire decoding.

use std::net::{IpAddr, Ipv4Addr};

use rstest::{fixture, rstest};

use super::api::{
    ContainerEntry, Envelope, InterfaceEntry, NodeEntry, StorageEntry, TaskEntry, create_params,
};
use super::*;

#[fixture]
fn spec() -> ContainerSpec {
    ContainerSpec {
        vmid: 101,
        hostname: String::from("web1"),
        template: String::from("local:vztmpl/debian-12-standard_12.2-1_amd64.tar.zst"),
        node: String::from("pve1"),
        resources: ResourceRequirement::builder()
            .cores(2)
            .memory_mb(2048)
            .storage_gb(20)
            .storage_pool("local-lvm")
            .network_bridge("vmbr0")
            .build()
            .expect("requirement should validate"),
        ip: IpConfig::Dhcp,
        unprivileged: true,
        nesting: false,
        ssh_public_keys: Vec::new(),
    }
}

fn param<'a>(params: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, value)| value.as_str())
}

#[rstest]
fn create_params_render_rootfs_and_dhcp_network(spec: ContainerSpec) {
    let params = create_params(&spec);
    assert_eq!(param(&params, "rootfs"), Some("local-lvm:20"));
    assert_eq!(
        param(&params, "net0"),
        Some("name=eth0,bridge=vmbr0,ip=dhcp")
    );
    assert_eq!(param(&params, "unprivileged"), Some("1"));
    assert_eq!(param(&params, "start"), Some("0"));
    assert_eq!(param(&params, "features"), None);
}

#[rstest]
fn create_params_render_static_network_with_gateway(spec: ContainerSpec) {
    let static_spec = ContainerSpec {
        ip: IpConfig::parse(Some("10.0.0.5/24"), Some("10.0.0.1")),
        nesting: true,
        ssh_public_keys: vec![String::from("ssh-ed25519 AAAA one")],
        ..spec
    };
    let params = create_params(&static_spec);
    assert_eq!(
        param(&params, "net0"),
        Some("name=eth0,bridge=vmbr0,ip=10.0.0.5/24,gw=10.0.0.1")
    );
    assert_eq!(param(&params, "features"), Some("nesting=1"));
    assert_eq!(
        param(&params, "ssh-public-keys"),
        Some("ssh-ed25519 AAAA one")
    );
}

#[rstest]
#[case(None, IpConfig::Dhcp)]
#[case(Some("DHCP"), IpConfig::Dhcp)]
#[case(Some(" "), IpConfig::Dhcp)]
#[case(
    Some("192.168.1.20/24"),
    IpConfig::Static { cidr: String::from("192.168.1.20/24"), gateway: None }
)]
fn ip_config_parses_operator_input(#[case] raw: Option<&str>, #[case] expected: IpConfig) {
    assert_eq!(IpConfig::parse(raw, None), expected);
}

#[test]
fn static_address_strips_prefix_length() {
    let ip = IpConfig::parse(Some("192.168.1.20/24"), None);
    assert_eq!(
        ip.static_address(),
        Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)))
    );
    assert_eq!(IpConfig::Dhcp.static_address(), None);
}

#[rstest]
#[case("web_1")]
#[case("-web")]
#[case("")]
fn validate_rejects_bad_hostnames(spec: ContainerSpec, #[case] hostname: &str) {
    let invalid = ContainerSpec {
        hostname: hostname.to_owned(),
        ..spec
    };
    assert!(matches!(
        invalid.validate(),
        Err(HypervisorError::Validation(_))
    ));
}

#[rstest]
fn validate_rejects_reserved_vmid(spec: ContainerSpec) {
    let reserved = ContainerSpec { vmid: 99, ..spec };
    let err = reserved.validate().expect_err("vmid below 100 is reserved");
    assert!(err.to_string().contains("vmid 99"), "{err}");
}

#[test]
fn node_entry_maps_online_status_and_capacity() {
    let raw = r#"{"data":[{"node":"pve1","status":"online","maxcpu":8,"maxmem":17179869184,"mem":4294967296},{"node":"pve2","status":"offline"}]}"#;
    let envelope: Envelope<Vec<NodeEntry>> = serde_json::from_str(raw).expect("decode nodes");
    let nodes: Vec<ClusterNode> = envelope.data.into_iter().map(ClusterNode::from).collect();

    assert_eq!(
        nodes.first(),
        Some(&ClusterNode {
            name: String::from("pve1"),
            online: true,
            max_cores: 8,
            max_memory_bytes: 17_179_869_184,
            used_memory_bytes: 4_294_967_296,
        })
    );
    assert_eq!(nodes.get(1).map(|node| node.online), Some(false));
}

#[test]
fn storage_entry_splits_content_types() {
    let raw = r#"{"storage":"local","content":"vztmpl,iso, backup","active":1,"avail":100,"total":200}"#;
    let entry: StorageEntry = serde_json::from_str(raw).expect("decode storage");
    let pool = StoragePool::from(entry);

    assert!(pool.supports_templates());
    assert!(!pool.supports_containers());
    assert!(pool.content.contains("backup"));
    assert!(pool.active);
}

#[test]
fn container_entry_accepts_string_vmid() {
    let raw = r#"{"vmid":"105","name":"db","status":"running","cpus":4}"#;
    let entry: ContainerEntry = serde_json::from_str(raw).expect("decode container");
    let summary = entry.into_summary("pve2").expect("valid vmid");

    assert_eq!(summary.vmid, 105);
    assert_eq!(summary.node, "pve2");
    assert_eq!(summary.state, ContainerState::Running);
    assert_eq!(summary.cores, 4);
    assert_eq!(summary.hostname(), "db");
}

#[test]
fn hostname_falls_back_to_ct_prefix() {
    let raw = r#"{"vmid":106,"status":"stopped"}"#;
    let entry: ContainerEntry = serde_json::from_str(raw).expect("decode container");
    let summary = entry.into_summary("pve1").expect("valid vmid");
    assert_eq!(summary.hostname(), "ct106");
}

#[test]
fn interface_entry_skips_loopback() {
    let raw = r#"[{"name":"lo","inet":"127.0.0.1/8"},{"name":"eth0","inet":"10.0.0.7/24","inet6":"fe80::1/64"}]"#;
    let entries: Vec<InterfaceEntry> = serde_json::from_str(raw).expect("decode interfaces");
    let addresses: Vec<IpAddr> = entries.iter().flat_map(InterfaceEntry::addresses).collect();

    assert_eq!(addresses.len(), 2);
    assert_eq!(
        addresses.first(),
        Some(&IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)))
    );
}

#[rstest]
#[case(r#"{"status":"running"}"#, TaskStatus::running())]
#[case(r#"{"status":"stopped","exitstatus":"OK"}"#, TaskStatus::stopped("OK"))]
#[case(
    r#"{"status":"stopped","exitstatus":"TASK ERROR"}"#,
    TaskStatus::stopped("TASK ERROR")
)]
fn task_entry_maps_state(#[case] raw: &str, #[case] expected: TaskStatus) {
    let entry: TaskEntry = serde_json::from_str(raw).expect("decode task");
    assert_eq!(TaskStatus::from(entry), expected);
}
