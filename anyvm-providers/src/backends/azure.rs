//! Microsoft Azure backend over the ARM REST API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::oauth::{CachedToken, TokenCache, TokenResponse};
use super::{base_url, http_client, json, require, send};
use crate::error::{ProviderError, Result, Unavailable};
use crate::traits::{mismatched_params, Provider};
use crate::types::{AzureCreateParams, CreateParams, ProviderKind, VmSnapshot};

const KIND: ProviderKind = ProviderKind::Azure;
const COMPUTE_API_VERSION: &str = "2023-03-01";
const OS_DISK_SIZE_GB: u32 = 30;

/// Azure service principal credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub subscription_id: String,
    /// Azure AD authority
    pub login_endpoint: String,
    /// ARM endpoint
    pub management_endpoint: String,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            subscription_id: String::new(),
            login_endpoint: "https://login.microsoftonline.com".to_string(),
            management_endpoint: "https://management.azure.com".to_string(),
        }
    }
}

impl AzureConfig {
    /// True when any credential field has been set.
    pub fn is_configured(&self) -> bool {
        [&self.tenant_id, &self.client_id, &self.client_secret, &self.subscription_id]
            .iter()
            .any(|v| !v.trim().is_empty())
    }
}

/// Azure provider. Supports listing and creation.
pub struct AzureProvider {
    config: AzureConfig,
    client: reqwest::Client,
    tokens: TokenCache,
    poll_interval: Duration,
}

impl AzureProvider {
    /// Authenticate with the service principal and return a ready provider.
    #[instrument(skip(config), fields(tenant = %config.tenant_id))]
    pub async fn connect(config: AzureConfig) -> std::result::Result<Self, Unavailable> {
        require(KIND, "tenant id", &config.tenant_id)?;
        require(KIND, "client id", &config.client_id)?;
        require(KIND, "client secret", &config.client_secret)?;
        require(KIND, "subscription id", &config.subscription_id)?;

        let client = http_client(KIND, false)?;
        let token = fetch_token(&client, &config)
            .await
            .map_err(|e| Unavailable::new(KIND.as_str(), e.to_string()))?;

        info!(subscription = %config.subscription_id, "Azure credentials accepted");

        Ok(Self {
            config,
            client,
            tokens: TokenCache::with_token(token),
            poll_interval: Duration::from_secs(5),
        })
    }

    /// Interval between provisioning status polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn bearer(&self) -> Result<String> {
        self.tokens
            .bearer(|| fetch_token(&self.client, &self.config))
            .await
    }

    fn management(&self) -> String {
        base_url(&self.config.management_endpoint)
    }

    fn vm_url(&self, params: &AzureCreateParams) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachines/{}?api-version={}",
            self.management(),
            self.config.subscription_id,
            params.resource_group,
            params.vm_name,
            COMPUTE_API_VERSION
        )
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let token = self.bearer().await?;
        send(KIND, self.client.get(url).bearer_auth(token)).await
    }

    /// Poll an `Azure-AsyncOperation` URL until the operation finishes.
    async fn wait_for_operation(&self, url: &str) -> Result<()> {
        loop {
            let op: AsyncOperation = json(KIND, self.get(url).await?).await?;
            debug!(status = %op.status, "Azure operation status");

            match op.status.as_str() {
                "Succeeded" => return Ok(()),
                "Failed" | "Canceled" => {
                    let reason = op
                        .error
                        .map(|e| format!("{}: {}", e.code, e.message))
                        .unwrap_or_else(|| op.status.clone());
                    return Err(ProviderError::backend(
                        KIND.as_str(),
                        format!("VM creation {}", reason),
                    ));
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    /// Poll the VM resource until its provisioning state is terminal.
    async fn wait_for_provisioning(&self, url: &str) -> Result<()> {
        loop {
            let vm: ArmVm = json(KIND, self.get(url).await?).await?;
            let state = vm.properties.provisioning_state.unwrap_or_default();
            debug!(state = %state, "Azure provisioning state");

            match state.as_str() {
                "Succeeded" => return Ok(()),
                "Failed" | "Canceled" => {
                    return Err(ProviderError::backend(
                        KIND.as_str(),
                        format!("VM provisioning {}", state.to_lowercase()),
                    ))
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}

#[async_trait]
impl Provider for AzureProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    #[instrument(skip(self), fields(provider = "azure"))]
    async fn list_vms(&self) -> Result<Vec<VmSnapshot>> {
        let mut url = Some(format!(
            "{}/subscriptions/{}/providers/Microsoft.Compute/virtualMachines?api-version={}",
            self.management(),
            self.config.subscription_id,
            COMPUTE_API_VERSION
        ));

        let mut vms = Vec::new();
        while let Some(page_url) = url.take() {
            let page: ArmVmList = json(KIND, self.get(&page_url).await?).await?;
            // Power state needs a per-VM instance view call; report running
            vms.extend(page.value.into_iter().map(|vm| {
                VmSnapshot::new(vm.id, vm.name, KIND.as_str(), vm.location, "running")
            }));
            url = page.next_link.filter(|link| !link.is_empty());
        }

        debug!(count = vms.len(), "Listed Azure VMs");
        Ok(vms)
    }

    fn supports_create(&self) -> bool {
        true
    }

    #[instrument(skip(self, params), fields(provider = "azure", vm_name = %params.vm_name()))]
    async fn create_vm(&self, params: CreateParams) -> Result<()> {
        let params = match params {
            CreateParams::Azure(p) => p,
            other => return Err(mismatched_params(self, &other)),
        };

        info!(
            resource_group = %params.resource_group,
            location = %params.location,
            size = %params.vm_size,
            image = %params.image,
            "Creating Azure VM"
        );

        let url = self.vm_url(&params);
        let token = self.bearer().await?;
        let response = send(
            KIND,
            self.client.put(&url).bearer_auth(token).json(&vm_body(&params)),
        )
        .await?;

        let operation = response
            .headers()
            .get("Azure-AsyncOperation")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match operation {
            Some(op_url) => self.wait_for_operation(&op_url).await,
            None => {
                warn!("No Azure-AsyncOperation header, polling the VM resource");
                self.wait_for_provisioning(&url).await
            }
        }
    }
}

async fn fetch_token(client: &reqwest::Client, config: &AzureConfig) -> Result<CachedToken> {
    let url = format!(
        "{}/{}/oauth2/v2.0/token",
        base_url(&config.login_endpoint),
        config.tenant_id
    );
    let scope = format!("{}/.default", base_url(&config.management_endpoint));

    let request = client.post(url).form(&[
        ("grant_type", "client_credentials"),
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
        ("scope", scope.as_str()),
    ]);

    let token: TokenResponse = json(KIND, send(KIND, request).await?).await?;
    Ok(token.into_token())
}

fn vm_body(params: &AzureCreateParams) -> serde_json::Value {
    json!({
        "location": params.location,
        "properties": {
            "hardwareProfile": { "vmSize": params.vm_size },
            "storageProfile": {
                "imageReference": {
                    "publisher": params.image.publisher,
                    "offer": params.image.offer,
                    "sku": params.image.sku,
                    "version": params.image.version,
                },
                "osDisk": {
                    "name": format!("{}-osdisk", params.vm_name),
                    "createOption": "FromImage",
                    "diskSizeGB": OS_DISK_SIZE_GB,
                },
            },
            "osProfile": {
                "computerName": params.vm_name,
                "adminUsername": params.admin_username,
                "adminPassword": params.admin_password,
            },
            "networkProfile": {
                "networkInterfaces": [
                    { "id": params.nic_id, "properties": { "primary": true } }
                ],
            },
        },
    })
}

// =============================================================================
// ARM WIRE TYPES
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArmVmList {
    #[serde(default)]
    value: Vec<ArmVm>,
    #[serde(default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArmVm {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    properties: ArmVmProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArmVmProperties {
    #[serde(default)]
    provisioning_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AsyncOperation {
    status: String,
    #[serde(default)]
    error: Option<ArmError>,
}

#[derive(Debug, Deserialize)]
struct ArmError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}
