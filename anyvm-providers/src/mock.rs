//! Mock provider for testing and development.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{ProviderError, Result};
use crate::traits::{mismatched_params, Provider};
use crate::types::{CreateParams, ProviderKind, VmSnapshot};

/// Mock provider backed by an in-memory VM list.
///
/// Useful for:
/// - Unit and integration testing of the dispatcher
/// - Development without cloud credentials (`--dev`)
/// - Simulating slow or failing backends
pub struct MockProvider {
    name: String,
    region: String,
    vms: RwLock<Vec<VmSnapshot>>,
    list_error: Option<String>,
    list_delay: Duration,
    create_delay: Duration,
    can_create: bool,
}

impl MockProvider {
    /// Create an empty mock provider registered as "mock".
    pub fn new() -> Self {
        Self::named(ProviderKind::Mock.as_str())
    }

    /// Create an empty mock provider reporting VMs under `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: "mock-region-1".to_string(),
            vms: RwLock::new(Vec::new()),
            list_error: None,
            list_delay: Duration::ZERO,
            create_delay: Duration::from_millis(10),
            can_create: true,
        }
    }

    /// Seed `count` running VMs.
    pub fn with_vms(mut self, count: usize) -> Self {
        if let Ok(vms) = self.vms.get_mut() {
            for i in 0..count {
                let id = format!("{}-{:03}", self.name, vms.len() + 1);
                vms.push(VmSnapshot::new(
                    id,
                    format!("{}-vm{}", self.name, i + 1),
                    self.name.clone(),
                    self.region.clone(),
                    "running",
                ));
            }
        }
        self
    }

    /// Make every list call fail with a backend error.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.list_error = Some(message.into());
        self
    }

    /// Simulated latency of every list call.
    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = delay;
        self
    }

    /// Simulated time for a create to reach a terminal state.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    /// Disable the create capability.
    pub fn list_only(mut self) -> Self {
        self.can_create = false;
        self
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(provider = %self.name))]
    async fn list_vms(&self) -> Result<Vec<VmSnapshot>> {
        if !self.list_delay.is_zero() {
            tokio::time::sleep(self.list_delay).await;
        }
        if let Some(message) = &self.list_error {
            return Err(ProviderError::backend(&self.name, message));
        }

        let vms = self
            .vms
            .read()
            .map_err(|_| ProviderError::backend(&self.name, "Lock poisoned"))?;

        Ok(vms.clone())
    }

    fn supports_create(&self) -> bool {
        self.can_create
    }

    #[instrument(skip(self, params), fields(provider = %self.name, vm_name = %params.vm_name()))]
    async fn create_vm(&self, params: CreateParams) -> Result<()> {
        if !self.can_create {
            return Err(ProviderError::UnsupportedCapability(self.name.clone()));
        }
        let params = match params {
            CreateParams::Mock(p) => p,
            other => return Err(mismatched_params(self, &other)),
        };

        info!(size = %params.size, image = %params.image, "Creating mock VM");

        // Simulate provisioning
        tokio::time::sleep(self.create_delay).await;

        let mut vms = self
            .vms
            .write()
            .map_err(|_| ProviderError::backend(&self.name, "Lock poisoned"))?;

        if vms.iter().any(|vm| vm.name == params.vm_name) {
            return Err(ProviderError::backend(
                &self.name,
                format!("VM {} already exists", params.vm_name),
            ));
        }

        vms.push(VmSnapshot::new(
            Uuid::new_v4().to_string(),
            params.vm_name,
            self.name.clone(),
            self.region.clone(),
            "running",
        ));

        info!("Mock VM created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MockCreateParams;

    fn params(name: &str) -> CreateParams {
        CreateParams::Mock(MockCreateParams {
            vm_name: name.to_string(),
            size: "mock-1cpu".to_string(),
            image: "mock-ubuntu-24.04".to_string(),
        })
    }

    #[tokio::test]
    async fn test_seeded_vms() {
        let provider = MockProvider::named("lab").with_vms(2);
        let vms = provider.list_vms().await.unwrap();

        assert_eq!(vms.len(), 2);
        assert!(vms.iter().all(|vm| vm.provider == "lab"));
        assert_eq!(vms[0].id, "lab-001");
        assert_eq!(vms[1].id, "lab-002");
    }

    #[tokio::test]
    async fn test_create_vm() {
        let provider = MockProvider::new();
        provider.create_vm(params("test-vm")).await.unwrap();

        let vms = provider.list_vms().await.unwrap();
        assert_eq!(vms.len(), 1);
        assert_eq!(vms[0].name, "test-vm");
        assert_eq!(vms[0].status, "running");

        let err = provider.create_vm(params("test-vm")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Backend { .. }));
    }

    #[tokio::test]
    async fn test_failing_list() {
        let provider = MockProvider::named("down").failing("connection refused");
        let err = provider.list_vms().await.unwrap_err();
        assert_eq!(err, ProviderError::backend("down", "connection refused"));
    }

    #[tokio::test]
    async fn test_list_only() {
        let provider = MockProvider::new().list_only();
        assert!(!provider.supports_create());
        let err = provider.create_vm(params("x")).await.unwrap_err();
        assert_eq!(err, ProviderError::UnsupportedCapability("mock".into()));
    }
}
