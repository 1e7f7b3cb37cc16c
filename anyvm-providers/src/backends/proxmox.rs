//! Proxmox VE backend over the PVE REST API.

use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::{base_url, check, http_client, json, require, send};
use crate::error::{ProviderError, Result, Unavailable};
use crate::traits::Provider;
use crate::types::{ProviderKind, VmSnapshot};

const KIND: ProviderKind = ProviderKind::ProxmoxVe;

/// Proxmox VE API endpoint and login.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxmoxConfig {
    /// API base, e.g. `https://pve.example.com:8006/api2/json`
    pub api_url: String,
    /// User including realm, e.g. `root@pam`
    pub username: String,
    pub password: String,
    /// Node reported for guests the cluster listing does not place
    pub node: String,
    /// Accept self-signed certificates
    pub insecure_skip_verify: bool,
}

impl ProxmoxConfig {
    pub fn is_configured(&self) -> bool {
        [&self.api_url, &self.username, &self.password, &self.node]
            .iter()
            .any(|v| !v.trim().is_empty())
    }
}

/// Proxmox VE provider. List only.
pub struct ProxmoxProvider {
    config: ProxmoxConfig,
    client: reqwest::Client,
    ticket: RwLock<String>,
}

impl ProxmoxProvider {
    /// Log in and return a ready provider. A rejected login makes the
    /// backend unavailable.
    #[instrument(skip(config), fields(api_url = %config.api_url))]
    pub async fn connect(config: ProxmoxConfig) -> std::result::Result<Self, Unavailable> {
        require(KIND, "API URL", &config.api_url)?;
        require(KIND, "username", &config.username)?;
        require(KIND, "password", &config.password)?;
        require(KIND, "node", &config.node)?;

        let client = http_client(KIND, config.insecure_skip_verify)?;
        let ticket = login(&client, &config)
            .await
            .map_err(|e| Unavailable::new(KIND.as_str(), format!("login failed: {}", e)))?;

        info!(node = %config.node, "Proxmox VE login succeeded");
        Ok(Self {
            config,
            client,
            ticket: RwLock::new(ticket),
        })
    }

    fn resources_request(&self, ticket: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}/cluster/resources", base_url(&self.config.api_url)))
            .query(&[("type", "vm")])
            .header(COOKIE, format!("PVEAuthCookie={}", ticket))
    }

    async fn relogin(&self) -> Result<String> {
        let ticket = login(&self.client, &self.config).await?;
        *self.ticket.write().await = ticket.clone();
        Ok(ticket)
    }
}

#[async_trait]
impl Provider for ProxmoxProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    #[instrument(skip(self), fields(provider = "proxmoxve"))]
    async fn list_vms(&self) -> Result<Vec<VmSnapshot>> {
        let ticket = self.ticket.read().await.clone();
        let first = self
            .resources_request(&ticket)
            .send()
            .await
            .map_err(|e| ProviderError::backend(KIND.as_str(), format!("request failed: {}", e)))?;

        // Tickets expire after two hours
        let response = if first.status() == StatusCode::UNAUTHORIZED {
            warn!("Proxmox ticket rejected, logging in again");
            let ticket = self.relogin().await?;
            send(KIND, self.resources_request(&ticket)).await?
        } else {
            check(KIND, first).await?
        };

        let resources: PveResponse<Vec<ClusterResource>> = json(KIND, response).await?;
        let vms: Vec<VmSnapshot> = resources
            .data
            .into_iter()
            .map(|r| {
                let node = if r.node.is_empty() { self.config.node.clone() } else { r.node };
                VmSnapshot::new(r.vmid.to_string(), r.name, KIND.as_str(), node, r.status)
            })
            .collect();

        debug!(count = vms.len(), "Listed Proxmox guests");
        Ok(vms)
    }
}

async fn login(client: &reqwest::Client, config: &ProxmoxConfig) -> Result<String> {
    let request = client
        .post(format!("{}/access/ticket", base_url(&config.api_url)))
        .form(&[
            ("username", config.username.as_str()),
            ("password", config.password.as_str()),
        ]);
    let response: PveResponse<Ticket> = json(KIND, send(KIND, request).await?).await?;
    Ok(response.data.ticket)
}

#[derive(Debug, Deserialize)]
struct PveResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Ticket {
    ticket: String,
}

#[derive(Debug, Deserialize)]
struct ClusterResource {
    vmid: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    node: String,
    #[serde(default)]
    status: String,
}
