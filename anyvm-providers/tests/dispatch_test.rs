//! Integration tests for the dispatcher.
//!
//! These tests exercise registry construction, identifier resolution and
//! aggregate listing through the public API, using mock providers only.

use std::sync::Arc;
use std::time::Duration;

use anyvm_providers::{
    resolve, CreateParams, CreateVmRequest, Dispatcher, IdentifierTable, MappingTables,
    MockMapping, MockProvider, Provider, ProviderError, ProviderKind, ProviderRegistry,
    Unavailable,
};

fn registry(providers: Vec<(&str, MockProvider)>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for (name, provider) in providers {
        registry.register(name, Ok(Arc::new(provider) as Arc<dyn Provider>));
    }
    registry
}

// =============================================================================
// Registry
// =============================================================================

#[test]
fn test_unavailable_backend_is_absent() {
    let mut registry = registry(vec![("mock", MockProvider::new())]);
    registry.register("azure", Err(Unavailable::new("azure", "missing credentials")));

    assert!(registry.get("azure").is_none());
    assert_eq!(registry.names(), vec!["mock".to_string()]);
}

#[tokio::test]
async fn test_reregistration_keeps_latest() {
    let registry = registry(vec![
        ("lab", MockProvider::named("lab").with_vms(1)),
        ("LAB", MockProvider::named("lab").with_vms(4)),
    ]);

    assert_eq!(registry.len(), 1);
    let provider = registry.get("lab").unwrap();
    assert_eq!(provider.list_vms().await.unwrap().len(), 4);
}

// =============================================================================
// Resolution
// =============================================================================

#[test]
fn test_mapped_key_is_case_insensitive() {
    let tables = MappingTables {
        mock: MockMapping {
            table: IdentifierTable::new()
                .with_size("small", "sizeA-1")
                .with_image("ubuntu24", "img-1"),
        },
        ..Default::default()
    };

    let request = CreateVmRequest::new("mock", "vm").with_size("SMALL");
    match resolve(ProviderKind::Mock, &request, &tables).unwrap() {
        CreateParams::Mock(params) => assert_eq!(params.size, "sizeA-1"),
        other => panic!("unexpected params: {:?}", other),
    }

    let request = CreateVmRequest::new("mock", "vm").with_size("custom-size-9");
    match resolve(ProviderKind::Mock, &request, &tables).unwrap() {
        CreateParams::Mock(params) => assert_eq!(params.size, "custom-size-9"),
        other => panic!("unexpected params: {:?}", other),
    }
}

#[test]
fn test_malformed_azure_image_uses_default() {
    let tables = MappingTables::default();
    let mut request = CreateVmRequest::new("azure", "web-1").with_image("garbage");
    request.nic_id = Some("/nic/1".into());
    request.admin_username = Some("azureuser".into());
    request.admin_password = Some("P@ssw0rd!".into());

    match resolve(ProviderKind::Azure, &request, &tables).unwrap() {
        CreateParams::Azure(params) => {
            assert_eq!(params.image.to_string(), "Canonical:UbuntuServer:18.04-LTS:latest")
        }
        other => panic!("unexpected params: {:?}", other),
    }
}

#[test]
fn test_missing_mandatory_field() {
    let request = CreateVmRequest::new("aws", "web-1");
    let mut tables = MappingTables::default();
    tables.aws.default_key_name = String::new();

    let err = resolve(ProviderKind::Aws, &request, &tables).unwrap_err();
    assert_eq!(err, ProviderError::unresolved("aws", "keyName"));
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test]
async fn test_aggregate_listing_survives_failing_backend() {
    let dispatcher = Dispatcher::new(
        registry(vec![
            ("a", MockProvider::named("a").with_vms(2)),
            ("b", MockProvider::named("b").failing("network unreachable")),
            ("c", MockProvider::named("c").with_vms(1)),
        ]),
        MappingTables::default(),
    );

    let vms = dispatcher.list_vms(None).await.unwrap();
    assert_eq!(vms.len(), 3);

    // Per-provider order is preserved
    let from_a: Vec<&str> = vms
        .iter()
        .filter(|vm| vm.provider == "a")
        .map(|vm| vm.name.as_str())
        .collect();
    assert_eq!(from_a, vec!["a-vm1", "a-vm2"]);
}

#[tokio::test]
async fn test_slow_backend_is_cut_off_in_aggregate() {
    let registry = registry(vec![
        ("fast", MockProvider::named("fast").with_vms(2)),
        ("stalled", MockProvider::named("stalled").with_list_delay(Duration::from_secs(30))),
    ]);

    let dispatcher = Dispatcher::new(registry, MappingTables::default())
        .with_list_timeout(Duration::from_millis(50));

    let listing = dispatcher.list_all().await;
    assert_eq!(listing.vms.len(), 2);
    assert!(listing.failures["stalled"].contains("Timed out"));
}

#[tokio::test]
async fn test_create_then_list() {
    let dispatcher = Dispatcher::new(
        registry(vec![("mock", MockProvider::new())]),
        MappingTables::default(),
    );

    let request: CreateVmRequest =
        serde_json::from_str(r#"{"provider":"Mock","vmName":"dev-1","size":"medium"}"#).unwrap();
    dispatcher.create_vm(&request).await.unwrap();

    let vms = dispatcher.list_vms(Some("mock")).await.unwrap();
    assert_eq!(vms.len(), 1);
    assert_eq!(vms[0].name, "dev-1");
}

#[tokio::test]
async fn test_unknown_provider() {
    let dispatcher = Dispatcher::new(ProviderRegistry::new(), MappingTables::default());

    let err = dispatcher.list_vms(Some("openstack")).await.unwrap_err();
    assert_eq!(err, ProviderError::BackendNotAvailable("openstack".into()));
    assert!(err.is_client_error());
}
