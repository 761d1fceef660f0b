//! Tailscale API v2 client.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};

use crate::config::MeshConfig;
use crate::gateway::GatewayFuture;

use super::{MeshError, MeshNode, MeshRegistry};

/// Public Tailscale API root.
pub const DEFAULT_API_BASE: &str = "https://api.tailscale.com/api/v2";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct DeviceList {
    #[serde(default)]
    devices: Vec<Device>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Device {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default, alias = "hostName")]
    hostname: String,
    #[serde(default)]
    addresses: Vec<String>,
    #[serde(default)]
    os: Option<String>,
    #[serde(default)]
    last_seen: Option<String>,
    #[serde(default)]
    online: bool,
    #[serde(default)]
    authorized: bool,
    #[serde(default)]
    key_expiry_disabled: bool,
}

impl From<Device> for MeshNode {
    fn from(value: Device) -> Self {
        Self {
            id: value.id,
            name: value.name,
            hostname: value.hostname,
            addresses: value.addresses,
            online: value.online,
            last_seen: value.last_seen.filter(|seen| !seen.is_empty()),
            os: value.os.filter(|os| !os.is_empty()),
            authorized: value.authorized,
            key_expiry_disabled: value.key_expiry_disabled,
        }
    }
}

/// Registry gateway backed by the Tailscale HTTP API.
#[derive(Clone, Debug)]
pub struct TailscaleClient {
    http: Client,
    base_url: String,
    tailnet: String,
    api_key: String,
}

impl TailscaleClient {
    /// Builds a client against the public API.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Config`] when credentials are missing or the HTTP
    /// client cannot be constructed.
    pub fn new(config: &MeshConfig) -> Result<Self, MeshError> {
        Self::with_base_url(config, DEFAULT_API_BASE)
    }

    /// Builds a client against an alternative API root.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Config`] when credentials are missing or the HTTP
    /// client cannot be constructed.
    pub fn with_base_url(config: &MeshConfig, base_url: &str) -> Result<Self, MeshError> {
        config.validate()?;
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| MeshError::Config(err.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            tailnet: config.tailnet.trim().to_owned(),
            api_key: config.api_key.trim().to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, path: &str, request: RequestBuilder) -> Result<Response, MeshError> {
        debug!(path, "tailscale request");
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|err| MeshError::Connectivity(err.to_string()))?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(MeshError::Authentication {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MeshError::Api {
                path: path.to_owned(),
                status: status.as_u16(),
                message: if body.trim().is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("unknown error")
                        .to_owned()
                } else {
                    body
                },
            });
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, MeshError> {
        response.json().await.map_err(|err| MeshError::Decode {
            path: path.to_owned(),
            message: err.to_string(),
        })
    }
}

impl MeshRegistry for TailscaleClient {
    fn list_devices(&self) -> GatewayFuture<'_, Vec<MeshNode>, MeshError> {
        Box::pin(async move {
            let path = format!("/tailnet/{}/devices", self.tailnet);
            let request = self.http.get(self.url(&path)).query(&[("fields", "all")]);
            let response = self.send(&path, request).await?;
            let list: DeviceList = Self::decode(&path, response).await?;
            info!(count = list.devices.len(), "retrieved mesh registry listing");
            Ok(list.devices.into_iter().map(MeshNode::from).collect())
        })
    }

    fn get_device<'a>(&'a self, id: &'a str) -> GatewayFuture<'a, Option<MeshNode>, MeshError> {
        Box::pin(async move {
            let path = format!("/device/{id}");
            let request = self.http.get(self.url(&path)).query(&[("fields", "all")]);
            match self.send(&path, request).await {
                Ok(response) => {
                    let device: Device = Self::decode(&path, response).await?;
                    Ok(Some(MeshNode::from(device)))
                }
                Err(MeshError::Api { status: 404, .. }) => Ok(None),
                Err(err) => Err(err),
            }
        })
    }

    fn delete_device<'a>(&'a self, id: &'a str) -> GatewayFuture<'a, (), MeshError> {
        Box::pin(async move {
            let path = format!("/device/{id}");
            self.send(&path, self.http.delete(self.url(&path))).await?;
            info!(device = id, "deleted mesh registry entry");
            Ok(())
        })
    }

    fn set_key_expiry<'a>(
        &'a self,
        id: &'a str,
        expiry_disabled: bool,
    ) -> GatewayFuture<'a, (), MeshError> {
        Box::pin(async move {
            let path = format!("/device/{id}/key");
            let request = self
                .http
                .post(self.url(&path))
                .json(&json!({ "keyExpiryDisabled": expiry_disabled }));
            self.send(&path, request).await?;
            info!(device = id, expiry_disabled, "updated mesh key expiry");
            Ok(())
        })
    }

    fn set_authorized<'a>(
        &'a self,
        id: &'a str,
        authorized: bool,
    ) -> GatewayFuture<'a, (), MeshError> {
        Box::pin(async move {
            let path = format!("/device/{id}/authorized");
            let request = self
                .http
                .post(self.url(&path))
                .json(&json!({ "authorized": authorized }));
            self.send(&path, request).await?;
            info!(device = id, authorized, "updated mesh authorisation");
            Ok(())
        })
    }
}
