//! Provider registry.
//!
//! Holds one instance per provider name. The registry is filled once during
//! startup and then shared read-only, so it needs no lock. A provider whose
//! construction failed is never registered: it is entirely absent rather than
//! present-but-broken.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::traits::{Construction, Provider};

/// Registry of constructed providers keyed by lowercase name.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the outcome of constructing a provider.
    ///
    /// An [`Unavailable`](crate::Unavailable) outcome is logged and otherwise
    /// ignored. Registering an existing name replaces the previous instance.
    pub fn register(&mut self, name: &str, construction: Construction) {
        let name = name.trim().to_lowercase();

        match construction {
            Ok(provider) => {
                if self.providers.insert(name.clone(), provider).is_some() {
                    warn!(provider = %name, "Provider re-registered, previous instance replaced");
                } else {
                    info!(provider = %name, "Provider registered");
                }
            }
            Err(unavailable) => {
                warn!(
                    provider = %name,
                    reason = %unavailable.reason,
                    "Provider unavailable, continuing without it"
                );
            }
        }
    }

    /// Register a provider instance directly.
    pub fn insert(&mut self, name: &str, provider: Arc<dyn Provider>) {
        self.register(name, Ok(provider));
    }

    /// Get a provider by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(&name.trim().to_lowercase()).cloned()
    }

    /// All registered providers.
    pub fn all(&self) -> &HashMap<String, Arc<dyn Provider>> {
        &self.providers
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Unavailable;
    use crate::mock::MockProvider;

    #[tokio::test]
    async fn test_reregistering_keeps_latest() {
        let mut registry = ProviderRegistry::new();
        registry.insert("aws", Arc::new(MockProvider::named("aws").with_vms(1)));
        registry.insert("AWS", Arc::new(MockProvider::named("aws").with_vms(3)));

        assert_eq!(registry.len(), 1);
        let provider = registry.get("aws").unwrap();
        assert_eq!(provider.list_vms().await.unwrap().len(), 3);
    }

    #[test]
    fn test_unavailable_is_not_registered() {
        let mut registry = ProviderRegistry::new();
        registry.register("azure", Err(Unavailable::new("azure", "missing subscription id")));

        assert!(registry.is_empty());
        assert!(registry.get("azure").is_none());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut registry = ProviderRegistry::new();
        registry.insert("GCP", Arc::new(MockProvider::named("gcp")));

        assert!(registry.get("gcp").is_some());
        assert!(registry.get(" Gcp ").is_some());
        assert_eq!(registry.names(), vec!["gcp"]);
    }
}
