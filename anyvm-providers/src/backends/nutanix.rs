//! Nutanix backend over the Prism Central v3 REST API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use super::{base_url, http_client, json, require, send};
use crate::error::{Result, Unavailable};
use crate::traits::Provider;
use crate::types::{ProviderKind, VmSnapshot};

const KIND: ProviderKind = ProviderKind::Nutanix;

/// Prism Central endpoint and login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NutanixConfig {
    /// Prism Central base URL, e.g. `https://pc.example.com:9440`
    pub api_url: String,
    pub username: String,
    pub password: String,
    pub insecure_skip_verify: bool,
    /// Entities requested per list call
    pub page_size: u32,
}

impl Default for NutanixConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            username: String::new(),
            password: String::new(),
            insecure_skip_verify: false,
            page_size: 250,
        }
    }
}

impl NutanixConfig {
    pub fn is_configured(&self) -> bool {
        [&self.api_url, &self.username, &self.password]
            .iter()
            .any(|v| !v.trim().is_empty())
    }
}

/// Nutanix provider. List only; uses basic auth on every call.
pub struct NutanixProvider {
    config: NutanixConfig,
    client: reqwest::Client,
}

impl NutanixProvider {
    pub async fn connect(config: NutanixConfig) -> std::result::Result<Self, Unavailable> {
        require(KIND, "API URL", &config.api_url)?;
        require(KIND, "username", &config.username)?;
        require(KIND, "password", &config.password)?;
        if config.page_size == 0 {
            return Err(Unavailable::new(KIND.as_str(), "page size must be positive"));
        }

        let client = http_client(KIND, config.insecure_skip_verify)?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Provider for NutanixProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    #[instrument(skip(self), fields(provider = "nutanix"))]
    async fn list_vms(&self) -> Result<Vec<VmSnapshot>> {
        let url = format!("{}/api/nutanix/v3/vms/list", base_url(&self.config.api_url));
        let mut vms = Vec::new();
        let mut offset: u64 = 0;

        loop {
            let request = self
                .client
                .post(&url)
                .basic_auth(&self.config.username, Some(&self.config.password))
                .json(&json!({
                    "kind": "vm",
                    "length": self.config.page_size,
                    "offset": offset,
                }));

            let page: VmListResponse = json(KIND, send(KIND, request).await?).await?;
            let received = page.entities.len() as u64;
            vms.extend(page.entities.into_iter().map(VmEntity::into_snapshot));

            offset += received;
            if received == 0 || offset >= page.metadata.total_matches {
                break;
            }
        }

        debug!(count = vms.len(), "Listed Nutanix VMs");
        Ok(vms)
    }
}

#[derive(Debug, Deserialize)]
struct VmListResponse {
    #[serde(default)]
    metadata: ListMetadata,
    #[serde(default)]
    entities: Vec<VmEntity>,
}

#[derive(Debug, Default, Deserialize)]
struct ListMetadata {
    #[serde(default)]
    total_matches: u64,
}

#[derive(Debug, Deserialize)]
struct VmEntity {
    #[serde(default)]
    metadata: EntityMetadata,
    #[serde(default)]
    spec: VmSpec,
    #[serde(default)]
    status: VmStatus,
}

impl VmEntity {
    fn into_snapshot(self) -> VmSnapshot {
        let name = self.status.name.or(self.spec.name).unwrap_or_default();
        let cluster = self
            .status
            .cluster_reference
            .or(self.spec.cluster_reference)
            .and_then(|c| c.name)
            .unwrap_or_default();
        VmSnapshot::new(
            self.metadata.uuid,
            name,
            KIND.as_str(),
            cluster,
            self.status.resources.power_state,
        )
    }
}

#[derive(Debug, Default, Deserialize)]
struct EntityMetadata {
    #[serde(default)]
    uuid: String,
}

#[derive(Debug, Default, Deserialize)]
struct VmSpec {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    cluster_reference: Option<Reference>,
}

#[derive(Debug, Default, Deserialize)]
struct VmStatus {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    cluster_reference: Option<Reference>,
    #[serde(default)]
    resources: VmResources,
}

#[derive(Debug, Default, Deserialize)]
struct VmResources {
    #[serde(default)]
    power_state: String,
}

#[derive(Debug, Deserialize)]
struct Reference {
    #[serde(default)]
    name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn entity(uuid: &str, name: &str, cluster: &str, power: &str) -> serde_json::Value {
        json!({
            "metadata": {"uuid": uuid, "kind": "vm"},
            "spec": {"name": name, "cluster_reference": {"kind": "cluster", "name": cluster}},
            "status": {
                "name": name,
                "cluster_reference": {"kind": "cluster", "name": cluster},
                "resources": {"power_state": power}
            }
        })
    }

    #[tokio::test]
    async fn test_list_paginates() {
        let mut server = Server::new_async().await;
        let first = server
            .mock("POST", "/api/nutanix/v3/vms/list")
            .match_body(Matcher::PartialJson(json!({"kind": "vm", "offset": 0, "length": 2})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "metadata": {"total_matches": 3, "length": 2, "offset": 0},
                    "entities": [
                        entity("u-1", "vm-a", "cluster1", "ON"),
                        entity("u-2", "vm-b", "cluster1", "OFF"),
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;
        let second = server
            .mock("POST", "/api/nutanix/v3/vms/list")
            .match_body(Matcher::PartialJson(json!({"offset": 2})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "metadata": {"total_matches": 3, "length": 1, "offset": 2},
                    "entities": [entity("u-3", "vm-c", "cluster2", "ON")]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let provider = NutanixProvider::connect(NutanixConfig {
            api_url: server.url(),
            username: "admin".into(),
            password: "secret".into(),
            page_size: 2,
            ..Default::default()
        })
        .await
        .unwrap();

        let vms = provider.list_vms().await.unwrap();
        first.assert_async().await;
        second.assert_async().await;

        assert_eq!(vms.len(), 3);
        assert_eq!(vms[0], VmSnapshot::new("u-1", "vm-a", "nutanix", "cluster1", "ON"));
        assert_eq!(vms[2].region, "cluster2");
    }

    #[tokio::test]
    async fn test_auth_failure_is_backend_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/nutanix/v3/vms/list")
            .with_status(401)
            .with_body("Authentication required")
            .create_async()
            .await;

        let provider = NutanixProvider::connect(NutanixConfig {
            api_url: server.url(),
            username: "admin".into(),
            password: "wrong".into(),
            ..Default::default()
        })
        .await
        .unwrap();

        let err = provider.list_vms().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "nutanix error: HTTP 401 Unauthorized: Authentication required"
        );
    }

    #[test]
    fn test_entity_falls_back_to_spec() {
        let entity: VmEntity = serde_json::from_value(json!({
            "metadata": {"uuid": "u-9"},
            "spec": {"name": "pending-vm", "cluster_reference": {"name": "c1"}}
        }))
        .unwrap();
        let vm = entity.into_snapshot();
        assert_eq!(vm.name, "pending-vm");
        assert_eq!(vm.region, "c1");
        assert_eq!(vm.status, "");
    }
}
