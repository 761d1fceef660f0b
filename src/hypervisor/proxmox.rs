//! Proxmox VE REST client.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::ProxmoxConfig;
use crate::gateway::GatewayFuture;

use super::api::{
    ContainerEntry, ContainerStatusEntry, ContentEntry, Envelope, InterfaceEntry, Lenient,
    NetworkEntry, NodeEntry, StorageEntry, TaskEntry, create_params,
};
use super::{
    AsyncTask, ClusterNode, ContainerSpec, ContainerState, ContainerSummary, HypervisorError,
    HypervisorGateway, StoragePool, TaskStatus, Template,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Gateway that talks to the Proxmox VE JSON API with an API token.
///
/// The underlying HTTP client is created once and reused for every call.
#[derive(Clone, Debug)]
pub struct ProxmoxClient {
    http: Client,
    base_url: String,
    authority: String,
    authorization: String,
}

impl ProxmoxClient {
    /// Builds a client from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HypervisorError::Config`] when configuration is incomplete or
    /// the HTTP client cannot be constructed.
    pub fn new(config: &ProxmoxConfig) -> Result<Self, HypervisorError> {
        config.validate()?;
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|err| HypervisorError::Config(err.to_string()))?;
        Ok(Self {
            http,
            base_url: config.api_base_url(),
            authority: config.authority(),
            authorization: authorization_header(&config.token_id, &config.token_secret),
        })
    }

    /// Checks that the API is reachable and the token is accepted, returning
    /// the reported version string.
    ///
    /// # Errors
    ///
    /// Returns [`HypervisorError::Connectivity`] or
    /// [`HypervisorError::Authentication`] when the check fails.
    pub async fn version(&self) -> Result<String, HypervisorError> {
        #[derive(serde::Deserialize)]
        struct Version {
            version: String,
        }
        let version: Version = self.get("/version").await?;
        info!(version = %version.version, "connected to Proxmox VE");
        Ok(version.version)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, HypervisorError> {
        self.send(path, self.http.get(self.url(path))).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        path: &str,
        request: RequestBuilder,
    ) -> Result<T, HypervisorError> {
        debug!(path, "proxmox request");
        let response = request
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .send()
            .await
            .map_err(|err| HypervisorError::Connectivity {
                host: self.authority.clone(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(HypervisorError::Authentication {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_owned()
            } else {
                body
            };
            return Err(HypervisorError::Api {
                path: path.to_owned(),
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope<T> =
            response
                .json()
                .await
                .map_err(|err| HypervisorError::Decode {
                    path: path.to_owned(),
                    message: err.to_string(),
                })?;
        Ok(envelope.data)
    }

    async fn post_task(
        &self,
        node: &str,
        path: &str,
        request: RequestBuilder,
    ) -> Result<AsyncTask, HypervisorError> {
        let upid: String = self.send(path, request).await?;
        Ok(AsyncTask {
            node: node.to_owned(),
            id: upid,
        })
    }
}

fn authorization_header(token_id: &str, token_secret: &str) -> String {
    format!("PVEAPIToken={}={}", token_id.trim(), token_secret.trim())
}

impl HypervisorGateway for ProxmoxClient {
    fn list_nodes(&self) -> GatewayFuture<'_, Vec<ClusterNode>, HypervisorError> {
        Box::pin(async move {
            let nodes: Vec<NodeEntry> = self.get("/nodes").await?;
            Ok(nodes.into_iter().map(ClusterNode::from).collect())
        })
    }

    fn node_bridges<'a>(
        &'a self,
        node: &'a str,
    ) -> GatewayFuture<'a, Vec<String>, HypervisorError> {
        Box::pin(async move {
            let path = format!("/nodes/{node}/network");
            let interfaces: Vec<NetworkEntry> = self.get(&path).await?;
            Ok(interfaces
                .into_iter()
                .filter(|iface| iface.kind.as_deref() == Some("bridge"))
                .map(|iface| iface.iface)
                .collect())
        })
    }

    fn storage_pools<'a>(
        &'a self,
        node: &'a str,
    ) -> GatewayFuture<'a, Vec<StoragePool>, HypervisorError> {
        Box::pin(async move {
            let path = format!("/nodes/{node}/storage");
            let pools: Vec<StorageEntry> = self.get(&path).await?;
            Ok(pools.into_iter().map(StoragePool::from).collect())
        })
    }

    fn templates<'a>(
        &'a self,
        node: &'a str,
        storage: &'a str,
    ) -> GatewayFuture<'a, Vec<Template>, HypervisorError> {
        Box::pin(async move {
            let path = format!("/nodes/{node}/storage/{storage}/content");
            let request = self
                .http
                .get(self.url(&path))
                .query(&[("content", "vztmpl")]);
            let items: Vec<ContentEntry> = self.send(&path, request).await?;
            Ok(items
                .into_iter()
                .filter(|item| item.content.as_deref().is_none_or(|kind| kind == "vztmpl"))
                .map(Template::from)
                .collect())
        })
    }

    fn next_vmid(&self) -> GatewayFuture<'_, u32, HypervisorError> {
        Box::pin(async move {
            let path = "/cluster/nextid";
            let raw: Lenient = self.get(path).await?;
            raw.as_u64()
                .and_then(|value| u32::try_from(value).ok())
                .ok_or_else(|| HypervisorError::Decode {
                    path: path.to_owned(),
                    message: format!("next id {raw:?} is not a container id"),
                })
        })
    }

    fn create_container<'a>(
        &'a self,
        spec: &'a ContainerSpec,
    ) -> GatewayFuture<'a, AsyncTask, HypervisorError> {
        Box::pin(async move {
            spec.validate()?;
            let path = format!("/nodes/{}/lxc", spec.node);
            let request = self.http.post(self.url(&path)).form(&create_params(spec));
            let task = self.post_task(&spec.node, &path, request).await?;
            info!(vmid = spec.vmid, node = %spec.node, task = %task.id, "container creation started");
            Ok(task)
        })
    }

    fn list_containers<'a>(
        &'a self,
        node: &'a str,
    ) -> GatewayFuture<'a, Vec<ContainerSummary>, HypervisorError> {
        Box::pin(async move {
            let path = format!("/nodes/{node}/lxc");
            let entries: Vec<ContainerEntry> = self.get(&path).await?;
            Ok(entries
                .into_iter()
                .filter_map(|entry| entry.into_summary(node))
                .collect())
        })
    }

    fn container_state<'a>(
        &'a self,
        node: &'a str,
        vmid: u32,
    ) -> GatewayFuture<'a, Option<ContainerState>, HypervisorError> {
        Box::pin(async move {
            let path = format!("/nodes/{node}/lxc/{vmid}/status/current");
            match self.get::<ContainerStatusEntry>(&path).await {
                Ok(entry) => Ok(Some(ContainerState::from(entry.status.as_str()))),
                // Proxmox answers 500 "does not exist" for unknown containers.
                Err(HypervisorError::Api { message, .. }) if message.contains("does not exist") => {
                    Ok(None)
                }
                Err(err) => Err(err),
            }
        })
    }

    fn container_addresses<'a>(
        &'a self,
        node: &'a str,
        vmid: u32,
    ) -> GatewayFuture<'a, Vec<IpAddr>, HypervisorError> {
        Box::pin(async move {
            let path = format!("/nodes/{node}/lxc/{vmid}/interfaces");
            let interfaces: Vec<InterfaceEntry> = self.get(&path).await?;
            Ok(interfaces
                .iter()
                .flat_map(InterfaceEntry::addresses)
                .collect())
        })
    }

    fn start_container<'a>(
        &'a self,
        node: &'a str,
        vmid: u32,
    ) -> GatewayFuture<'a, AsyncTask, HypervisorError> {
        Box::pin(async move {
            let path = format!("/nodes/{node}/lxc/{vmid}/status/start");
            let request = self.http.post(self.url(&path));
            self.post_task(node, &path, request).await
        })
    }

    fn stop_container<'a>(
        &'a self,
        node: &'a str,
        vmid: u32,
    ) -> GatewayFuture<'a, AsyncTask, HypervisorError> {
        Box::pin(async move {
            let path = format!("/nodes/{node}/lxc/{vmid}/status/stop");
            let request = self.http.post(self.url(&path));
            self.post_task(node, &path, request).await
        })
    }

    fn destroy_container<'a>(
        &'a self,
        node: &'a str,
        vmid: u32,
        purge: bool,
    ) -> GatewayFuture<'a, AsyncTask, HypervisorError> {
        Box::pin(async move {
            let path = format!("/nodes/{node}/lxc/{vmid}");
            let request = self
                .http
                .delete(self.url(&path))
                .query(&[("purge", if purge { "1" } else { "0" })]);
            let task = self.post_task(node, &path, request).await?;
            info!(vmid, node, task = %task.id, "container destruction started");
            Ok(task)
        })
    }

    fn task_status<'a>(
        &'a self,
        task: &'a AsyncTask,
    ) -> GatewayFuture<'a, TaskStatus, HypervisorError> {
        Box::pin(async move {
            let path = format!("/nodes/{}/tasks/{}/status", task.node, task.id);
            let entry: TaskEntry = self.get(&path).await?;
            Ok(TaskStatus::from(entry))
        })
    }
}
