//! Type definitions for VM snapshots, create requests and provider-native
//! create parameters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// PROVIDER KIND
// =============================================================================

/// Closed set of provider variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Microsoft Azure (ARM)
    Azure,
    /// Amazon EC2
    Aws,
    /// Google Compute Engine
    Gcp,
    /// Microsoft Hyper-V over PowerShell remoting
    HyperV,
    /// Proxmox VE
    ProxmoxVe,
    /// VMware vSphere / vCenter
    VSphere,
    /// Nutanix Prism Central
    Nutanix,
    /// In-memory backend for development and tests
    Mock,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 8] = [
        ProviderKind::Azure,
        ProviderKind::Aws,
        ProviderKind::Gcp,
        ProviderKind::HyperV,
        ProviderKind::ProxmoxVe,
        ProviderKind::VSphere,
        ProviderKind::Nutanix,
        ProviderKind::Mock,
    ];

    /// Registry name used for registration and request routing.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Azure => "azure",
            Self::Aws => "aws",
            Self::Gcp => "gcp",
            Self::HyperV => "hyperv",
            Self::ProxmoxVe => "proxmoxve",
            Self::VSphere => "vsphere",
            Self::Nutanix => "nutanix",
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == lower)
            .ok_or_else(|| format!("unknown provider: {}", s))
    }
}

// =============================================================================
// VM SNAPSHOT
// =============================================================================

/// One VM as reported by exactly one provider at list time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSnapshot {
    /// Provider-native identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Registry name of the provider that reported the VM
    pub provider: String,
    /// Region, zone, host or cluster, depending on the provider
    pub region: String,
    /// Power or provisioning state; granularity differs between providers
    pub status: String,
}

impl VmSnapshot {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        provider: impl Into<String>,
        region: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            provider: provider.into(),
            region: region.into(),
            status: status.into(),
        }
    }
}

// =============================================================================
// UNIFIED CREATE REQUEST
// =============================================================================

/// Provider-agnostic VM create request.
///
/// `size` and `image` are logical keys translated through the provider's
/// mapping table. The provider-specific fields (`vm_size`, `instance_type`,
/// `machine_type`, `image_reference`, `image_id`, `source_image`) take
/// precedence over them and go through the same table, so they accept either
/// a logical key or a native identifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateVmRequest {
    /// Target provider tag (case-insensitive)
    pub provider: String,
    pub vm_name: Option<String>,

    /// Logical size key, e.g. "small"
    pub size: Option<String>,
    /// Logical image key, e.g. "ubuntu24"
    pub image: Option<String>,

    // Azure
    pub vm_size: Option<String>,
    pub image_reference: Option<String>,
    pub resource_group_name: Option<String>,
    pub location: Option<String>,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub nic_id: Option<String>,

    // AWS
    pub instance_type: Option<String>,
    pub image_id: Option<String>,
    pub key_name: Option<String>,
    pub security_group_ids: Vec<String>,
    pub region: Option<String>,

    // GCP
    pub machine_type: Option<String>,
    pub source_image: Option<String>,
    pub project_id: Option<String>,
    pub zone: Option<String>,
}

impl CreateVmRequest {
    /// Create a request targeting `provider` with the given VM name.
    pub fn new(provider: impl Into<String>, vm_name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            vm_name: Some(vm_name.into()),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

// =============================================================================
// PROVIDER-NATIVE CREATE PARAMETERS
// =============================================================================

/// Fully resolved, provider-native create parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateParams {
    Azure(AzureCreateParams),
    Aws(AwsCreateParams),
    Gcp(GcpCreateParams),
    Mock(MockCreateParams),
}

impl CreateParams {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Azure(_) => ProviderKind::Azure,
            Self::Aws(_) => ProviderKind::Aws,
            Self::Gcp(_) => ProviderKind::Gcp,
            Self::Mock(_) => ProviderKind::Mock,
        }
    }

    pub fn vm_name(&self) -> &str {
        match self {
            Self::Azure(p) => &p.vm_name,
            Self::Aws(p) => &p.vm_name,
            Self::Gcp(p) => &p.vm_name,
            Self::Mock(p) => &p.vm_name,
        }
    }
}

/// Azure marketplace image reference (`Publisher:Offer:Sku:Version`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureImageReference {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    pub version: String,
}

impl AzureImageReference {
    /// Parse a composite reference; `None` unless it has exactly four non-empty parts.
    pub fn parse(composite: &str) -> Option<Self> {
        let parts: Vec<&str> = composite.split(':').map(str::trim).collect();
        match parts.as_slice() {
            [publisher, offer, sku, version]
                if parts.iter().all(|p| !p.is_empty()) =>
            {
                Some(Self {
                    publisher: publisher.to_string(),
                    offer: offer.to_string(),
                    sku: sku.to_string(),
                    version: version.to_string(),
                })
            }
            _ => None,
        }
    }
}

impl fmt::Display for AzureImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.publisher, self.offer, self.sku, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureCreateParams {
    pub vm_name: String,
    pub resource_group: String,
    pub location: String,
    pub vm_size: String,
    pub image: AzureImageReference,
    pub admin_username: String,
    pub admin_password: String,
    pub nic_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsCreateParams {
    pub vm_name: String,
    pub region: String,
    pub instance_type: String,
    pub image_id: String,
    pub key_name: String,
    pub security_group_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcpCreateParams {
    pub vm_name: String,
    pub project_id: String,
    pub zone: String,
    /// Zonal machine type URL: `zones/{zone}/machineTypes/{type}`
    pub machine_type_url: String,
    pub source_image: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCreateParams {
    pub vm_name: String,
    pub size: String,
    pub image: String,
}
