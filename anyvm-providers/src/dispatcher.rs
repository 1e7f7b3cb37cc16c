//! Request dispatch and multi-provider aggregation.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Dispatcher                   │
//! │  create_vm: registry → resolve → create      │
//! │  list_vms:  one provider, or fan out to all  │
//! └──────────────────────┬───────────────────────┘
//!                        │
//!      ┌─────────────────┼─────────────────┐
//!      ▼                 ▼                 ▼
//! ┌──────────┐     ┌──────────┐      ┌──────────┐
//! │  Azure   │     │   AWS    │ ...  │ Proxmox  │
//! └──────────┘     └──────────┘      └──────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::{ProviderError, Result};
use crate::mapping::MappingTables;
use crate::registry::ProviderRegistry;
use crate::resolve::resolve;
use crate::traits::Provider;
use crate::types::{CreateVmRequest, VmSnapshot};

/// Default deadline for a create to reach a terminal state.
pub const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default deadline for one provider's list call in aggregate mode.
pub const DEFAULT_LIST_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of listing every registered provider.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateListing {
    /// Concatenated snapshots of every provider that answered
    pub vms: Vec<VmSnapshot>,
    /// Provider name → error message for providers that failed
    pub failures: BTreeMap<String, String>,
}

impl AggregateListing {
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Routes unified requests to registered providers.
pub struct Dispatcher {
    registry: ProviderRegistry,
    mappings: MappingTables,
    create_timeout: Duration,
    list_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher with the default deadlines.
    pub fn new(registry: ProviderRegistry, mappings: MappingTables) -> Self {
        Self {
            registry,
            mappings,
            create_timeout: DEFAULT_CREATE_TIMEOUT,
            list_timeout: DEFAULT_LIST_TIMEOUT,
        }
    }

    /// Set the create deadline.
    pub fn with_create_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = timeout;
        self
    }

    /// Set the per-provider list deadline used in aggregate mode.
    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    fn provider(&self, name: &str) -> Result<Arc<dyn Provider>> {
        self.registry
            .get(name)
            .ok_or_else(|| ProviderError::BackendNotAvailable(name.trim().to_lowercase()))
    }

    /// Resolve and create a VM, waiting for the provider to finish.
    ///
    /// Dropping the returned future stops waiting but does not cancel a
    /// creation the provider has already started.
    #[instrument(skip(self, request), fields(provider = %request.provider, vm_name = ?request.vm_name))]
    pub async fn create_vm(&self, request: &CreateVmRequest) -> Result<()> {
        let name = request.provider.trim().to_lowercase();
        let provider = self.provider(&name)?;

        if !provider.supports_create() {
            return Err(ProviderError::UnsupportedCapability(name));
        }

        let params = resolve(provider.kind(), request, &self.mappings)?;
        debug!(kind = %params.kind(), "Create parameters resolved");

        match tokio::time::timeout(self.create_timeout, provider.create_vm(params)).await {
            Ok(Ok(())) => {
                info!("VM created");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "VM creation failed");
                Err(e)
            }
            Err(_) => {
                warn!(timeout_secs = self.create_timeout.as_secs(), "VM creation timed out");
                Err(ProviderError::Timeout {
                    backend: name,
                    after: self.create_timeout,
                })
            }
        }
    }

    /// List VMs of one provider, or of all providers when `provider` is `None`.
    ///
    /// A filtered call propagates the provider's error. The aggregate call
    /// never fails; providers that fail contribute no VMs.
    pub async fn list_vms(&self, provider: Option<&str>) -> Result<Vec<VmSnapshot>> {
        match provider {
            Some(name) => self.list_one(name).await,
            None => Ok(self.list_all().await.vms),
        }
    }

    /// List a single provider.
    #[instrument(skip(self))]
    pub async fn list_one(&self, name: &str) -> Result<Vec<VmSnapshot>> {
        self.provider(name)?.list_vms().await
    }

    /// Query every registered provider concurrently and merge the results.
    ///
    /// Each provider runs under the list deadline. Failures are collected per
    /// provider instead of aborting the listing.
    #[instrument(skip(self), fields(providers = self.registry.len()))]
    pub async fn list_all(&self) -> AggregateListing {
        let timeout = self.list_timeout;

        let queries = self.registry.all().iter().map(|(name, provider)| {
            let name = name.clone();
            let provider = Arc::clone(provider);
            async move {
                let outcome = match tokio::time::timeout(timeout, provider.list_vms()).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout {
                        backend: name.clone(),
                        after: timeout,
                    }),
                };
                (name, outcome)
            }
        });

        let mut listing = AggregateListing::default();
        for (name, outcome) in join_all(queries).await {
            match outcome {
                Ok(vms) => {
                    debug!(provider = %name, count = vms.len(), "Provider listed");
                    listing.vms.extend(vms);
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "Provider list failed, skipping");
                    listing.failures.insert(name, e.to_string());
                }
            }
        }

        listing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    fn dispatcher(providers: Vec<(&str, MockProvider)>) -> Dispatcher {
        let mut registry = ProviderRegistry::new();
        for (name, provider) in providers {
            registry.insert(name, Arc::new(provider));
        }
        Dispatcher::new(registry, MappingTables::default())
    }

    #[tokio::test]
    async fn test_aggregate_tolerates_failures() {
        let dispatcher = dispatcher(vec![
            ("a", MockProvider::named("a").with_vms(2)),
            ("b", MockProvider::named("b").failing("network unreachable")),
            ("c", MockProvider::named("c").with_vms(1)),
        ]);

        let vms = dispatcher.list_vms(None).await.unwrap();
        assert_eq!(vms.len(), 3);

        let listing = dispatcher.list_all().await;
        assert!(listing.is_degraded());
        assert_eq!(listing.failures.len(), 1);
        assert!(listing.failures["b"].contains("network unreachable"));
    }

    #[tokio::test]
    async fn test_aggregate_cuts_off_stalled_provider() {
        let dispatcher = dispatcher(vec![
            ("a", MockProvider::named("a").with_vms(2)),
            ("slow", MockProvider::named("slow").with_vms(5).with_list_delay(Duration::from_secs(30))),
            ("c", MockProvider::named("c").with_vms(1)),
        ])
        .with_list_timeout(Duration::from_millis(50));

        let listing = dispatcher.list_all().await;
        assert_eq!(listing.vms.len(), 3);
        assert!(listing.vms.iter().all(|vm| vm.provider != "slow"));
        assert_eq!(listing.failures.len(), 1);
        assert_eq!(
            listing.failures["slow"],
            ProviderError::Timeout {
                backend: "slow".into(),
                after: Duration::from_millis(50),
            }
            .to_string()
        );
    }

    #[tokio::test]
    async fn test_filtered_list_propagates_errors() {
        let dispatcher = dispatcher(vec![
            ("a", MockProvider::named("a").with_vms(2)),
            ("b", MockProvider::named("b").failing("auth failed")),
        ]);

        assert_eq!(dispatcher.list_vms(Some("A")).await.unwrap().len(), 2);

        let err = dispatcher.list_vms(Some("b")).await.unwrap_err();
        assert_eq!(err, ProviderError::backend("b", "auth failed"));

        let err = dispatcher.list_vms(Some("nutanix")).await.unwrap_err();
        assert_eq!(err, ProviderError::BackendNotAvailable("nutanix".into()));
    }

    #[tokio::test]
    async fn test_create_routes_by_tag() {
        let dispatcher = dispatcher(vec![("mock", MockProvider::new())]);

        let request = CreateVmRequest::new("MOCK", "dev-1").with_size("large");
        dispatcher.create_vm(&request).await.unwrap();

        let vms = dispatcher.list_vms(Some("mock")).await.unwrap();
        assert_eq!(vms.len(), 1);
        assert_eq!(vms[0].name, "dev-1");
    }

    #[tokio::test]
    async fn test_create_errors() {
        let dispatcher = dispatcher(vec![("lab", MockProvider::named("lab").list_only())]);

        let err = dispatcher
            .create_vm(&CreateVmRequest::new("azure", "vm"))
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::BackendNotAvailable("azure".into()));

        let err = dispatcher
            .create_vm(&CreateVmRequest::new("lab", "vm"))
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::UnsupportedCapability("lab".into()));
    }

    #[tokio::test]
    async fn test_create_timeout() {
        let dispatcher = dispatcher(vec![(
            "mock",
            MockProvider::new().with_create_delay(Duration::from_secs(10)),
        )])
        .with_create_timeout(Duration::from_millis(50));

        let err = dispatcher
            .create_vm(&CreateVmRequest::new("mock", "slow"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { ref backend, .. } if backend == "mock"));
    }
}
