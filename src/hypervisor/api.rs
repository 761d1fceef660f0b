//! Wire types for the Proxmox VE JSON API.

use std::collections::BTreeSet;
use std::net::IpAddr;

use serde::Deserialize;

use super::{
    ClusterNode, ContainerState, ContainerSpec, ContainerSummary, IpConfig, StoragePool,
    TaskState, TaskStatus, Template,
};

/// Every Proxmox response wraps its payload in `{"data": ...}`.
#[derive(Debug, Deserialize)]
pub(super) struct Envelope<T> {
    pub(super) data: T,
}

/// Proxmox returns some integers as strings depending on the endpoint and
/// version.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum Lenient {
    Number(u64),
    Text(String),
}

impl Lenient {
    pub(super) fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(text) => text.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct NodeEntry {
    node: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    maxcpu: Option<u32>,
    #[serde(default)]
    maxmem: Option<u64>,
    #[serde(default)]
    mem: Option<u64>,
}

impl From<NodeEntry> for ClusterNode {
    fn from(value: NodeEntry) -> Self {
        Self {
            online: value.status.as_deref() == Some("online"),
            name: value.node,
            max_cores: value.maxcpu.unwrap_or_default(),
            max_memory_bytes: value.maxmem.unwrap_or_default(),
            used_memory_bytes: value.mem.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct NetworkEntry {
    pub(super) iface: String,
    #[serde(default, rename = "type")]
    pub(super) kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct StorageEntry {
    storage: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    active: Option<u8>,
    #[serde(default)]
    avail: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
}

impl From<StorageEntry> for StoragePool {
    fn from(value: StorageEntry) -> Self {
        let content = value
            .content
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_owned)
            .collect::<BTreeSet<_>>();
        Self {
            name: value.storage,
            content,
            active: value.active.unwrap_or(1) == 1,
            available_bytes: value.avail.unwrap_or_default(),
            total_bytes: value.total.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ContentEntry {
    pub(super) volid: String,
    #[serde(default)]
    pub(super) content: Option<String>,
    #[serde(default)]
    pub(super) size: Option<u64>,
}

impl From<ContentEntry> for Template {
    fn from(value: ContentEntry) -> Self {
        Self {
            volid: value.volid,
            size_bytes: value.size.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ContainerEntry {
    vmid: Lenient,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    cpus: Option<Lenient>,
}

impl ContainerEntry {
    pub(super) fn into_summary(self, node: &str) -> Option<ContainerSummary> {
        let vmid = u32::try_from(self.vmid.as_u64()?).ok()?;
        let cores = self
            .cpus
            .as_ref()
            .and_then(Lenient::as_u64)
            .and_then(|value| u32::try_from(value).ok())
            .unwrap_or_default();
        Some(ContainerSummary {
            vmid,
            node: node.to_owned(),
            name: self.name.filter(|name| !name.is_empty()),
            state: ContainerState::from(self.status.as_deref().unwrap_or("unknown")),
            cores,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ContainerStatusEntry {
    pub(super) status: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct InterfaceEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    inet: Option<String>,
    #[serde(default)]
    inet6: Option<String>,
}

impl InterfaceEntry {
    pub(super) fn addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        let skip = self.name.as_deref() == Some("lo");
        [self.inet.as_deref(), self.inet6.as_deref()]
            .into_iter()
            .flatten()
            .filter(move |_| !skip)
            .filter_map(|cidr| cidr.split('/').next())
            .filter_map(|address| address.parse::<IpAddr>().ok())
            .filter(|address| !address.is_loopback())
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct TaskEntry {
    status: String,
    #[serde(default)]
    exitstatus: Option<String>,
}

impl From<TaskEntry> for TaskStatus {
    fn from(value: TaskEntry) -> Self {
        let state = if value.status == "stopped" {
            TaskState::Stopped
        } else {
            TaskState::Running
        };
        Self {
            state,
            exit_status: value.exitstatus,
        }
    }
}

/// Form parameters for `POST /nodes/{node}/lxc`.
pub(super) fn create_params(spec: &ContainerSpec) -> Vec<(&'static str, String)> {
    let resources = &spec.resources;
    let mut params = vec![
        ("vmid", spec.vmid.to_string()),
        ("hostname", spec.hostname.clone()),
        ("ostemplate", spec.template.clone()),
        ("cores", resources.cores.to_string()),
        ("memory", resources.memory_mb.to_string()),
        (
            "rootfs",
            format!("{}:{}", resources.storage_pool, resources.storage_gb),
        ),
        ("net0", net0(&resources.network_bridge, &spec.ip)),
        ("unprivileged", bool_flag(spec.unprivileged)),
        ("start", String::from("0")),
        ("onboot", String::from("0")),
    ];
    if spec.nesting {
        params.push(("features", String::from("nesting=1")));
    }
    if !spec.ssh_public_keys.is_empty() {
        params.push(("ssh-public-keys", spec.ssh_public_keys.join("\n")));
    }
    params
}

fn net0(bridge: &str, ip: &IpConfig) -> String {
    match ip {
        IpConfig::Dhcp => format!("name=eth0,bridge={bridge},ip=dhcp"),
        IpConfig::Static {
            cidr,
            gateway: Some(gateway),
        } => format!("name=eth0,bridge={bridge},ip={cidr},gw={gateway}"),
        IpConfig::Static { cidr, gateway: None } => {
            format!("name=eth0,bridge={bridge},ip={cidr}")
        }
    }
}

fn bool_flag(value: bool) -> String {
    String::from(if value { "1" } else { "0" })
}
