//! Identifier mapping tables.
//!
//! Each creating provider has a table translating logical size and image keys
//! ("small", "ubuntu24") to provider-native identifiers, plus provider-wide
//! defaults for placement and access fields. Tables are loaded once at startup
//! and never mutated afterwards.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Logical-key → native-identifier table for sizes and images.
///
/// Keys are stored lowercased so lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentifierTable {
    #[serde(deserialize_with = "lowercase_keys")]
    custom_vm_sizes: HashMap<String, String>,
    #[serde(deserialize_with = "lowercase_keys")]
    custom_images: HashMap<String, String>,
}

impl IdentifierTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a size mapping.
    pub fn with_size(mut self, key: &str, native: impl Into<String>) -> Self {
        self.custom_vm_sizes.insert(key.to_lowercase(), native.into());
        self
    }

    /// Add an image mapping.
    pub fn with_image(mut self, key: &str, native: impl Into<String>) -> Self {
        self.custom_images.insert(key.to_lowercase(), native.into());
        self
    }

    /// Look up a logical size key.
    pub fn size(&self, key: &str) -> Option<&str> {
        self.custom_vm_sizes.get(&key.to_lowercase()).map(String::as_str)
    }

    /// Look up a logical image key.
    pub fn image(&self, key: &str) -> Option<&str> {
        self.custom_images.get(&key.to_lowercase()).map(String::as_str)
    }
}

fn lowercase_keys<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = HashMap::<String, String>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect())
}

fn standard_sizes(small: &str, medium: &str, large: &str) -> IdentifierTable {
    IdentifierTable::new()
        .with_size("small", small)
        .with_size("medium", medium)
        .with_size("large", large)
}

// =============================================================================
// PER-PROVIDER TABLES
// =============================================================================

/// Azure table and defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AzureMapping {
    #[serde(flatten)]
    pub table: IdentifierTable,
    pub default_resource_group: String,
    pub default_location: String,
}

impl Default for AzureMapping {
    fn default() -> Self {
        Self {
            table: standard_sizes("Standard_DS1_v2", "Standard_DS2_v2", "Standard_DS3_v2")
                .with_image("ubuntu24", "Canonical:ubuntu-24_04-lts:server:latest"),
            default_resource_group: "script-test".to_string(),
            default_location: "westeurope".to_string(),
        }
    }
}

/// AWS table and defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AwsMapping {
    #[serde(flatten)]
    pub table: IdentifierTable,
    pub default_key_name: String,
    pub default_security_group_ids: Vec<String>,
    /// Region new instances are launched in; empty until the server fills it
    /// with the AWS provider's configured region
    pub default_region: String,
}

impl Default for AwsMapping {
    fn default() -> Self {
        Self {
            table: standard_sizes("t2.micro", "t2.small", "t2.medium")
                .with_image("ubuntu24", "ami-0644165ab979df02d"),
            default_key_name: "default-key".to_string(),
            default_security_group_ids: vec!["sg-01234567".to_string()],
            default_region: String::new(),
        }
    }
}

/// GCP table and defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GcpMapping {
    #[serde(flatten)]
    pub table: IdentifierTable,
    pub default_zone: String,
    pub default_project: String,
}

impl Default for GcpMapping {
    fn default() -> Self {
        Self {
            table: standard_sizes("t2d-standard-1", "t2d-standard-2", "t2d-standard-4").with_image(
                "ubuntu24",
                "projects/ubuntu-os-cloud/global/images/ubuntu-2404-noble-amd64-v20250313",
            ),
            default_zone: "europe-west9-c".to_string(),
            default_project: String::new(),
        }
    }
}

/// Mock table; the mock provider has no placement defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MockMapping {
    #[serde(flatten)]
    pub table: IdentifierTable,
}

impl Default for MockMapping {
    fn default() -> Self {
        Self {
            table: standard_sizes("mock-1cpu", "mock-2cpu", "mock-4cpu")
                .with_image("ubuntu24", "mock-ubuntu-24.04"),
        }
    }
}

/// All mapping tables, one per creating provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingTables {
    pub azure: AzureMapping,
    pub aws: AwsMapping,
    pub gcp: GcpMapping,
    pub mock: MockMapping,
}
