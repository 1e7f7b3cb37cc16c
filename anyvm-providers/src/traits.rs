//! Core provider abstraction trait.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ProviderError, Result, Unavailable};
use crate::types::{CreateParams, ProviderKind, VmSnapshot};

/// Core provider abstraction trait.
///
/// Every backend (cloud API or on-premises hypervisor) implements this trait.
/// Listing is mandatory; creation is an optional capability advertised through
/// [`Provider::supports_create`], so callers never need to downcast.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Variant tag, used to pick the resolution rules for create requests.
    fn kind(&self) -> ProviderKind;

    /// Registry name of this provider.
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// List the VMs currently known to the backend.
    ///
    /// Must not mutate backend state. Authentication, network and response
    /// decoding failures are all returned as errors.
    async fn list_vms(&self) -> Result<Vec<VmSnapshot>>;

    /// Whether [`Provider::create_vm`] is implemented.
    fn supports_create(&self) -> bool {
        false
    }

    /// Create a VM and wait until the backend reports a terminal state.
    async fn create_vm(&self, _params: CreateParams) -> Result<()> {
        Err(ProviderError::UnsupportedCapability(self.name().to_string()))
    }
}

/// Outcome of constructing a provider from its credential bundle.
pub type Construction = std::result::Result<Arc<dyn Provider>, Unavailable>;

/// Error for create parameters resolved for a different provider kind.
pub(crate) fn mismatched_params(provider: &dyn Provider, params: &CreateParams) -> ProviderError {
    ProviderError::backend(
        provider.name(),
        format!("received create parameters for {}", params.kind()),
    )
}
