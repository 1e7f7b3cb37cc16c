//! VMware vSphere backend over the vCenter Automation REST API.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::{base_url, check, http_client, json, require, send};
use crate::error::{ProviderError, Result, Unavailable};
use crate::traits::Provider;
use crate::types::{ProviderKind, VmSnapshot};

const KIND: ProviderKind = ProviderKind::VSphere;
const SESSION_HEADER: &str = "vmware-api-session-id";

/// vCenter endpoint and login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VSphereConfig {
    /// vCenter base URL, e.g. `https://vcenter.example.com`
    pub url: String,
    pub username: String,
    pub password: String,
    /// Accept self-signed certificates
    pub insecure_skip_verify: bool,
}

impl Default for VSphereConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            // vCenter appliances ship with self-signed certificates
            insecure_skip_verify: true,
        }
    }
}

impl VSphereConfig {
    pub fn is_configured(&self) -> bool {
        [&self.url, &self.username, &self.password]
            .iter()
            .any(|v| !v.trim().is_empty())
    }
}

/// vSphere provider. List only.
pub struct VSphereProvider {
    config: VSphereConfig,
    client: reqwest::Client,
    host: String,
    session: RwLock<String>,
}

impl VSphereProvider {
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn connect(config: VSphereConfig) -> std::result::Result<Self, Unavailable> {
        require(KIND, "URL", &config.url)?;
        require(KIND, "username", &config.username)?;
        require(KIND, "password", &config.password)?;

        let host = reqwest::Url::parse(config.url.trim())
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| Unavailable::new(KIND.as_str(), format!("invalid URL {}", config.url)))?;

        let client = http_client(KIND, config.insecure_skip_verify)?;
        let session = create_session(&client, &config)
            .await
            .map_err(|e| Unavailable::new(KIND.as_str(), format!("login failed: {}", e)))?;

        info!(host = %host, "vCenter session established");
        Ok(Self {
            config,
            client,
            host,
            session: RwLock::new(session),
        })
    }

    fn list_request(&self, session: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}/api/vcenter/vm", base_url(&self.config.url)))
            .header(SESSION_HEADER, session)
    }
}

#[async_trait]
impl Provider for VSphereProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    #[instrument(skip(self), fields(provider = "vsphere", host = %self.host))]
    async fn list_vms(&self) -> Result<Vec<VmSnapshot>> {
        let session = self.session.read().await.clone();
        let first = self
            .list_request(&session)
            .send()
            .await
            .map_err(|e| ProviderError::backend(KIND.as_str(), format!("request failed: {}", e)))?;

        // Idle sessions are dropped by vCenter
        let response = if first.status() == StatusCode::UNAUTHORIZED {
            warn!("vCenter session expired, logging in again");
            let session = create_session(&self.client, &self.config).await?;
            *self.session.write().await = session.clone();
            send(KIND, self.list_request(&session)).await?
        } else {
            check(KIND, first).await?
        };

        let summaries: Vec<VmSummary> = json(KIND, response).await?;
        let vms: Vec<VmSnapshot> = summaries
            .into_iter()
            .map(|vm| VmSnapshot::new(vm.vm, vm.name, KIND.as_str(), self.host.clone(), vm.power_state))
            .collect();

        debug!(count = vms.len(), "Listed vSphere VMs");
        Ok(vms)
    }
}

async fn create_session(client: &reqwest::Client, config: &VSphereConfig) -> Result<String> {
    let request = client
        .post(format!("{}/api/session", base_url(&config.url)))
        .basic_auth(&config.username, Some(&config.password));
    // The body is the session id as a bare JSON string
    json(KIND, send(KIND, request).await?).await
}

#[derive(Debug, Deserialize)]
struct VmSummary {
    vm: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    power_state: String,
}
