//! Provider bootstrap and HTTP server startup.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use anyvm_providers::{
    AwsProvider, AzureProvider, Construction, Dispatcher, GcpProvider, HyperVProvider,
    MockProvider, NutanixProvider, Provider, ProviderKind, ProviderRegistry, ProxmoxProvider,
    Unavailable, VSphereProvider,
};
use futures::future::{join_all, BoxFuture, FutureExt};
use tracing::{info, warn};

use crate::config::{Config, ProvidersConfig};
use crate::http_server::{self, AppState};

/// Build the dispatcher and serve the HTTP API until shutdown.
pub async fn run(config: Config) -> Result<()> {
    let mut registry = connect_providers(&config.providers).await;

    if config.dev.mock_enabled {
        info!(vms = config.dev.mock_vms, "Development mode, registering mock provider");
        registry.insert(
            ProviderKind::Mock.as_str(),
            Arc::new(MockProvider::new().with_vms(config.dev.mock_vms)),
        );
    }

    if registry.is_empty() {
        warn!("No providers available, every request will fail until credentials are configured");
    } else {
        info!(providers = ?registry.names(), "Providers ready");
    }

    let dispatcher = Dispatcher::new(registry, config.effective_mappings())
        .with_create_timeout(Duration::from_secs(config.dispatch.create_timeout_secs))
        .with_list_timeout(Duration::from_secs(config.dispatch.list_timeout_secs));

    let state = Arc::new(AppState::new(dispatcher));
    let app = http_server::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.listen_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen_address))?;

    info!(address = %config.server.listen_address, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("HTTP server stopped");
    Ok(())
}

/// Construct every configured provider concurrently and register the outcomes.
///
/// Providers with no credentials at all are skipped; partially configured or
/// rejected ones are registered as unavailable, which logs and drops them.
pub async fn connect_providers(providers: &ProvidersConfig) -> ProviderRegistry {
    let mut attempts: Vec<BoxFuture<'static, (ProviderKind, Construction)>> = Vec::new();

    let mut queue = |kind: ProviderKind, configured: bool, attempt: BoxFuture<'static, (ProviderKind, Construction)>| {
        if configured {
            attempts.push(attempt);
        } else {
            info!(provider = %kind, "Provider credentials not configured, skipping");
        }
    };

    queue(
        ProviderKind::Azure,
        providers.azure.is_configured(),
        attempt(ProviderKind::Azure, AzureProvider::connect(providers.azure.clone())),
    );
    queue(
        ProviderKind::Aws,
        providers.aws.is_configured(),
        attempt(ProviderKind::Aws, AwsProvider::connect(providers.aws.clone())),
    );
    queue(
        ProviderKind::Gcp,
        providers.gcp.is_configured(),
        attempt(ProviderKind::Gcp, GcpProvider::connect(providers.gcp.clone())),
    );
    queue(
        ProviderKind::HyperV,
        providers.hyperv.is_configured(),
        attempt(ProviderKind::HyperV, HyperVProvider::connect(providers.hyperv.clone())),
    );
    queue(
        ProviderKind::ProxmoxVe,
        providers.proxmox.is_configured(),
        attempt(ProviderKind::ProxmoxVe, ProxmoxProvider::connect(providers.proxmox.clone())),
    );
    queue(
        ProviderKind::VSphere,
        providers.vsphere.is_configured(),
        attempt(ProviderKind::VSphere, VSphereProvider::connect(providers.vsphere.clone())),
    );
    queue(
        ProviderKind::Nutanix,
        providers.nutanix.is_configured(),
        attempt(ProviderKind::Nutanix, NutanixProvider::connect(providers.nutanix.clone())),
    );

    let mut registry = ProviderRegistry::new();
    for (kind, construction) in join_all(attempts).await {
        registry.register(kind.as_str(), construction);
    }
    registry
}

fn attempt<P, F>(kind: ProviderKind, connect: F) -> BoxFuture<'static, (ProviderKind, Construction)>
where
    P: Provider + 'static,
    F: Future<Output = std::result::Result<P, Unavailable>> + Send + 'static,
{
    async move {
        let construction = connect.await.map(|p| Arc::new(p) as Arc<dyn Provider>);
        (kind, construction)
    }
    .boxed()
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyvm_providers::{AzureConfig, NutanixConfig};

    #[tokio::test]
    async fn test_unconfigured_providers_are_skipped() {
        let registry = connect_providers(&ProvidersConfig::default()).await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_partial_credentials_are_unavailable() {
        let providers = ProvidersConfig {
            azure: AzureConfig {
                tenant_id: "tenant".into(),
                ..Default::default()
            },
            nutanix: NutanixConfig {
                api_url: "https://pc.lab:9440".into(),
                username: "admin".into(),
                password: "secret".into(),
                ..Default::default()
            },
            ..Default::default()
        };

        let registry = connect_providers(&providers).await;
        // Azure is missing its client credentials; Nutanix connects lazily
        assert_eq!(registry.names(), vec!["nutanix".to_string()]);
    }
}
