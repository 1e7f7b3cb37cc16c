//! Configuration management for the anyvm server.
//!
//! Precedence, lowest first: built-in defaults, YAML file, environment
//! variables, command-line flags.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use anyvm_providers::{
    AwsConfig, AzureConfig, GcpConfig, HyperVConfig, MappingTables, NutanixConfig, ProxmoxConfig,
    VSphereConfig,
};
use serde::Deserialize;

use crate::cli::Args;

/// Config file tried when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/anyvm/anyvm.yaml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Dispatcher deadlines
    pub dispatch: DispatchConfig,
    /// Credential bundles per provider
    pub providers: ProvidersConfig,
    /// Logical size and image mapping tables
    pub mappings: MappingTables,
    /// Development settings
    pub dev: DevConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Reject settings that would make every request fail.
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.create_timeout_secs == 0 {
            anyhow::bail!("dispatch.create_timeout_secs must be greater than zero");
        }
        if self.dispatch.list_timeout_secs == 0 {
            anyhow::bail!("dispatch.list_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_env_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup. Empty values are ignored.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(port) = get("PORT") {
            self.server.listen_address = format!("0.0.0.0:{}", port);
        }

        let azure = &mut self.providers.azure;
        set(&mut azure.tenant_id, get("AZURE_TENANT_ID"));
        set(&mut azure.client_id, get("AZURE_CLIENT_ID"));
        set(&mut azure.client_secret, get("AZURE_CLIENT_SECRET"));
        set(&mut azure.subscription_id, get("AZURE_SUBSCRIPTION_ID"));

        let aws = &mut self.providers.aws;
        set(&mut aws.access_key, get("AWS_ACCESS_KEY"));
        set(&mut aws.secret_key, get("AWS_SECRET_KEY"));
        set(&mut aws.region, get("AWS_REGION"));

        let gcp = &mut self.providers.gcp;
        set(&mut gcp.project_id, get("GCP_PROJECT_ID"));
        set(&mut gcp.access_token, get("GCP_ACCESS_TOKEN"));
        if let Some(file) = get("GCP_CREDENTIALS_FILE") {
            gcp.credentials_file = Some(PathBuf::from(file));
        }

        let hyperv = &mut self.providers.hyperv;
        set(&mut hyperv.host, get("HYPERV_HOST"));
        set(&mut hyperv.username, get("HYPERV_USERNAME"));
        set(&mut hyperv.password, get("HYPERV_PASSWORD"));
        // An unparsable port keeps the previous value
        if let Some(port) = get("HYPERV_PORT").and_then(|p| p.parse().ok()) {
            hyperv.port = port;
        }

        let proxmox = &mut self.providers.proxmox;
        set(&mut proxmox.api_url, get("PROXMOX_API_URL"));
        set(&mut proxmox.username, get("PROXMOX_USERNAME"));
        set(&mut proxmox.password, get("PROXMOX_PASSWORD"));
        set(&mut proxmox.node, get("PROXMOX_NODE"));

        let vsphere = &mut self.providers.vsphere;
        set(&mut vsphere.url, get("VSPHERE_URL"));
        set(&mut vsphere.username, get("VSPHERE_USERNAME"));
        set(&mut vsphere.password, get("VSPHERE_PASSWORD"));

        let nutanix = &mut self.providers.nutanix;
        set(&mut nutanix.api_url, get("NUTANIX_API_URL"));
        set(&mut nutanix.username, get("NUTANIX_USERNAME"));
        set(&mut nutanix.password, get("NUTANIX_PASSWORD"));

        let mappings = &mut self.mappings;
        set(&mut mappings.azure.default_resource_group, get("AZURE_DEFAULT_RESOURCE_GROUP"));
        set(&mut mappings.azure.default_location, get("AZURE_DEFAULT_LOCATION"));
        set(&mut mappings.aws.default_key_name, get("AWS_DEFAULT_KEYNAME"));
        set(&mut mappings.aws.default_region, get("AWS_DEFAULT_REGION"));
        if let Some(group) = get("AWS_DEFAULT_SECURITY_GROUP") {
            mappings.aws.default_security_group_ids = vec![group];
        }
        set(&mut mappings.gcp.default_zone, get("GCP_DEFAULT_ZONE"));
        set(&mut mappings.gcp.default_project, get("GCP_DEFAULT_PROJECT"));

        self
    }

    /// Mapping tables with provider-derived defaults filled in.
    ///
    /// AWS instances are launched in the provider's configured region unless
    /// `mappings.aws.defaultRegion` (or `AWS_DEFAULT_REGION`) names another,
    /// so VMs created with defaults show up in the listing.
    pub fn effective_mappings(&self) -> MappingTables {
        let mut mappings = self.mappings.clone();
        if mappings.aws.default_region.trim().is_empty() {
            mappings.aws.default_region = self.providers.aws.region.clone();
        }
        mappings
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref listen) = args.listen {
            self.server.listen_address = listen.clone();
        }

        if let Some(secs) = args.create_timeout_secs {
            self.dispatch.create_timeout_secs = secs;
        }

        if args.dev {
            self.dev.mock_enabled = true;
        }

        self
    }
}

fn set(target: &mut String, value: Option<String>) {
    if let Some(value) = value {
        *target = value;
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Dispatcher deadlines.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// How long a create may take to reach a terminal state
    pub create_timeout_secs: u64,
    /// Per-provider deadline when listing all providers
    pub list_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            create_timeout_secs: anyvm_providers::DEFAULT_CREATE_TIMEOUT.as_secs(),
            list_timeout_secs: anyvm_providers::DEFAULT_LIST_TIMEOUT.as_secs(),
        }
    }
}

/// Credential bundles. A provider whose bundle is entirely empty is skipped.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub azure: AzureConfig,
    pub aws: AwsConfig,
    pub gcp: GcpConfig,
    pub hyperv: HyperVConfig,
    pub proxmox: ProxmoxConfig,
    pub vsphere: VSphereConfig,
    pub nutanix: NutanixConfig,
}

/// Development settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DevConfig {
    /// Register the in-memory mock provider
    pub mock_enabled: bool,
    /// VMs the mock provider starts with
    pub mock_vms: usize,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            mock_enabled: false,
            mock_vms: 3,
        }
    }
}
