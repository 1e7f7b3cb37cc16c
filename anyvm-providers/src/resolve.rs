//! Identifier resolution.
//!
//! Turns a provider-agnostic [`CreateVmRequest`] into the native create
//! parameters of one provider. Every resolvable field follows the same chain:
//!
//! 1. the provider-specific field (`instanceType`, `vmSize`, ...) wins when
//!    given; it is looked up in the table and used verbatim when unmapped
//! 2. otherwise the generic `size`/`image` key is looked up the same way
//!    (case-insensitive; an unmapped key passes through verbatim)
//! 3. a fixed fallback key is looked up in the table; only a hit counts
//! 4. the provider-wide default from the table is used
//! 5. a mandatory field still without a value fails with
//!    [`ProviderError::UnresolvedIdentifier`]
//!
//! The field sets differ per provider because their resource models are not
//! isomorphic, so each provider has its own resolver below.

use tracing::warn;

use crate::error::{ProviderError, Result};
use crate::mapping::{AwsMapping, AzureMapping, GcpMapping, IdentifierTable, MappingTables, MockMapping};
use crate::types::{
    AwsCreateParams, AzureCreateParams, AzureImageReference, CreateParams, CreateVmRequest,
    GcpCreateParams, MockCreateParams, ProviderKind,
};

/// Size key substituted when the request names no size.
pub const FALLBACK_SIZE_KEY: &str = "small";

/// Image key substituted when the request names no image.
pub const FALLBACK_IMAGE_KEY: &str = "ubuntu24";

/// Image used when an Azure composite does not split into four parts.
pub const AZURE_FALLBACK_IMAGE: &str = "Canonical:UbuntuServer:18.04-LTS:latest";

/// Resolve `request` into native create parameters for `kind`.
///
/// List-only providers fail with [`ProviderError::UnsupportedCapability`].
pub fn resolve(
    kind: ProviderKind,
    request: &CreateVmRequest,
    tables: &MappingTables,
) -> Result<CreateParams> {
    match kind {
        ProviderKind::Azure => resolve_azure(request, &tables.azure).map(CreateParams::Azure),
        ProviderKind::Aws => resolve_aws(request, &tables.aws).map(CreateParams::Aws),
        ProviderKind::Gcp => resolve_gcp(request, &tables.gcp).map(CreateParams::Gcp),
        ProviderKind::Mock => resolve_mock(request, &tables.mock).map(CreateParams::Mock),
        ProviderKind::HyperV
        | ProviderKind::ProxmoxVe
        | ProviderKind::VSphere
        | ProviderKind::Nutanix => Err(ProviderError::UnsupportedCapability(kind.to_string())),
    }
}

// =============================================================================
// RESOLUTION CHAIN
// =============================================================================

/// Which table column a keyed field is looked up in.
#[derive(Clone, Copy)]
enum Column {
    Size,
    Image,
}

impl Column {
    fn lookup<'a>(&self, table: &'a IdentifierTable, key: &str) -> Option<&'a str> {
        match self {
            Self::Size => table.size(key),
            Self::Image => table.image(key),
        }
    }

    fn fallback_key(&self) -> &'static str {
        match self {
            Self::Size => FALLBACK_SIZE_KEY,
            Self::Image => FALLBACK_IMAGE_KEY,
        }
    }
}

/// Treat blank strings as absent.
fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve a size or image field through the full chain.
///
/// A native identifier such as `t2.micro` has no table entry, so it passes
/// through unchanged whichever field carries it.
fn keyed(
    table: &IdentifierTable,
    column: Column,
    specific: Option<&str>,
    logical: Option<&str>,
) -> Option<String> {
    if let Some(key) = present(specific).or_else(|| present(logical)) {
        return Some(column.lookup(table, key).unwrap_or(key).to_string());
    }
    column
        .lookup(table, column.fallback_key())
        .and_then(|v| present(Some(v)))
        .map(str::to_string)
}

/// Resolve a field that only has an explicit value or a provider default.
fn defaulted(explicit: Option<&str>, default: &str) -> Option<String> {
    present(explicit)
        .or_else(|| present(Some(default)))
        .map(str::to_string)
}

fn required(backend: ProviderKind, field: &'static str, value: Option<String>) -> Result<String> {
    value.ok_or_else(|| ProviderError::unresolved(backend.as_str(), field))
}

// =============================================================================
// AZURE
// =============================================================================

fn resolve_azure(req: &CreateVmRequest, mapping: &AzureMapping) -> Result<AzureCreateParams> {
    let kind = ProviderKind::Azure;

    let vm_name = required(kind, "vmName", present(req.vm_name.as_deref()).map(str::to_string))?;
    let vm_size = required(
        kind,
        "vmSize",
        keyed(&mapping.table, Column::Size, req.vm_size.as_deref(), req.size.as_deref()),
    )?;
    let composite = required(
        kind,
        "imageReference",
        keyed(
            &mapping.table,
            Column::Image,
            req.image_reference.as_deref(),
            req.image.as_deref(),
        ),
    )?;
    let location = required(
        kind,
        "location",
        defaulted(req.location.as_deref(), &mapping.default_location),
    )?;
    let resource_group = required(
        kind,
        "resourceGroupName",
        defaulted(req.resource_group_name.as_deref(), &mapping.default_resource_group),
    )?;
    let nic_id = required(kind, "nicId", present(req.nic_id.as_deref()).map(str::to_string))?;
    let admin_username = required(
        kind,
        "adminUsername",
        present(req.admin_username.as_deref()).map(str::to_string),
    )?;
    // Passwords are taken verbatim; surrounding whitespace may be intentional.
    let admin_password = required(
        kind,
        "adminPassword",
        req.admin_password.clone().filter(|p| !p.is_empty()),
    )?;

    Ok(AzureCreateParams {
        vm_name,
        resource_group,
        location,
        vm_size,
        image: azure_image(&composite),
        admin_username,
        admin_password,
        nic_id,
    })
}

/// Parse an Azure image composite, recovering from malformed values with
/// [`AZURE_FALLBACK_IMAGE`].
pub fn azure_image(composite: &str) -> AzureImageReference {
    if let Some(image) = AzureImageReference::parse(composite) {
        return image;
    }

    let malformed = ProviderError::MalformedMappingEntry {
        backend: ProviderKind::Azure.to_string(),
        field: "imageReference",
        value: composite.to_string(),
    };
    warn!(error = %malformed, fallback = AZURE_FALLBACK_IMAGE, "Using fallback image");

    AzureImageReference {
        publisher: "Canonical".to_string(),
        offer: "UbuntuServer".to_string(),
        sku: "18.04-LTS".to_string(),
        version: "latest".to_string(),
    }
}

// =============================================================================
// AWS
// =============================================================================

fn resolve_aws(req: &CreateVmRequest, mapping: &AwsMapping) -> Result<AwsCreateParams> {
    let kind = ProviderKind::Aws;

    let vm_name = required(kind, "vmName", present(req.vm_name.as_deref()).map(str::to_string))?;
    let instance_type = required(
        kind,
        "instanceType",
        keyed(&mapping.table, Column::Size, req.instance_type.as_deref(), req.size.as_deref()),
    )?;
    let image_id = required(
        kind,
        "imageId",
        keyed(&mapping.table, Column::Image, req.image_id.as_deref(), req.image.as_deref()),
    )?;
    let key_name = required(
        kind,
        "keyName",
        defaulted(req.key_name.as_deref(), &mapping.default_key_name),
    )?;
    let region = required(
        kind,
        "region",
        defaulted(req.region.as_deref(), &mapping.default_region),
    )?;

    let explicit_groups = non_blank(&req.security_group_ids);
    let security_group_ids = if explicit_groups.is_empty() {
        non_blank(&mapping.default_security_group_ids)
    } else {
        explicit_groups
    };
    if security_group_ids.is_empty() {
        return Err(ProviderError::unresolved(kind.as_str(), "securityGroupIds"));
    }

    Ok(AwsCreateParams {
        vm_name,
        region,
        instance_type,
        image_id,
        key_name,
        security_group_ids,
    })
}

fn non_blank(values: &[String]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| present(Some(v)))
        .map(str::to_string)
        .collect()
}

// =============================================================================
// GCP
// =============================================================================

fn resolve_gcp(req: &CreateVmRequest, mapping: &GcpMapping) -> Result<GcpCreateParams> {
    let kind = ProviderKind::Gcp;

    let vm_name = required(kind, "vmName", present(req.vm_name.as_deref()).map(str::to_string))?;
    let machine_type = required(
        kind,
        "machineType",
        keyed(&mapping.table, Column::Size, req.machine_type.as_deref(), req.size.as_deref()),
    )?;
    let source_image = required(
        kind,
        "sourceImage",
        keyed(&mapping.table, Column::Image, req.source_image.as_deref(), req.image.as_deref()),
    )?;
    let zone = required(kind, "zone", defaulted(req.zone.as_deref(), &mapping.default_zone))?;
    let project_id = required(
        kind,
        "projectId",
        defaulted(req.project_id.as_deref(), &mapping.default_project),
    )?;

    Ok(GcpCreateParams {
        machine_type_url: format!("zones/{}/machineTypes/{}", zone, machine_type),
        vm_name,
        project_id,
        zone,
        source_image,
    })
}

// =============================================================================
// MOCK
// =============================================================================

fn resolve_mock(req: &CreateVmRequest, mapping: &MockMapping) -> Result<MockCreateParams> {
    let kind = ProviderKind::Mock;

    Ok(MockCreateParams {
        vm_name: required(kind, "vmName", present(req.vm_name.as_deref()).map(str::to_string))?,
        size: required(kind, "size", keyed(&mapping.table, Column::Size, None, req.size.as_deref()))?,
        image: required(
            kind,
            "image",
            keyed(&mapping.table, Column::Image, None, req.image.as_deref()),
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn azure_request() -> CreateVmRequest {
        CreateVmRequest {
            nic_id: Some("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/networkInterfaces/nic0".into()),
            admin_username: Some("azureuser".into()),
            admin_password: Some("S3cret!".into()),
            ..CreateVmRequest::new("azure", "vm-1")
        }
    }

    fn unwrap_azure(params: CreateParams) -> AzureCreateParams {
        match params {
            CreateParams::Azure(p) => p,
            other => panic!("expected azure params, got {:?}", other),
        }
    }

    fn unwrap_aws(params: CreateParams) -> AwsCreateParams {
        match params {
            CreateParams::Aws(p) => p,
            other => panic!("expected aws params, got {:?}", other),
        }
    }

    fn unwrap_gcp(params: CreateParams) -> GcpCreateParams {
        match params {
            CreateParams::Gcp(p) => p,
            other => panic!("expected gcp params, got {:?}", other),
        }
    }

    #[test]
    fn test_mapped_key_resolves_regardless_of_case() {
        let mut tables = MappingTables::default();
        tables.aws.table = IdentifierTable::new()
            .with_size("small", "sizeA-1")
            .with_image("ubuntu24", "ami-1");

        for key in ["small", "SMALL", "Small"] {
            let req = CreateVmRequest::new("aws", "vm").with_size(key);
            let params = unwrap_aws(resolve(ProviderKind::Aws, &req, &tables).unwrap());
            assert_eq!(params.instance_type, "sizeA-1");
        }
    }

    #[test]
    fn test_unmapped_key_passes_through() {
        let tables = MappingTables::default();
        let mut req = CreateVmRequest::new("gcp", "vm")
            .with_size("n2-highmem-8")
            .with_image("projects/debian-cloud/global/images/family/debian-12");
        req.project_id = Some("my-project".into());

        let params = unwrap_gcp(resolve(ProviderKind::Gcp, &req, &tables).unwrap());
        assert_eq!(params.machine_type_url, "zones/europe-west9-c/machineTypes/n2-highmem-8");
        assert_eq!(params.source_image, "projects/debian-cloud/global/images/family/debian-12");
    }

    #[test]
    fn test_provider_field_wins_over_generic_key() {
        let tables = MappingTables::default();

        let mut req = CreateVmRequest::new("aws", "vm").with_size("medium");
        req.instance_type = Some("t3.large".into());
        let params = unwrap_aws(resolve(ProviderKind::Aws, &req, &tables).unwrap());
        assert_eq!(params.instance_type, "t3.large");

        // Logical keys in the provider field are mapped too
        req.instance_type = Some("Large".into());
        let params = unwrap_aws(resolve(ProviderKind::Aws, &req, &tables).unwrap());
        assert_eq!(params.instance_type, "t2.medium");
    }

    #[test]
    fn test_provider_fields_carrying_logical_keys() {
        let tables = MappingTables::default();

        let req: CreateVmRequest = serde_json::from_str(
            r#"{"provider":"aws","vmName":"web-1","instanceType":"small","imageId":"ubuntu24"}"#,
        )
        .unwrap();
        let params = unwrap_aws(resolve(ProviderKind::Aws, &req, &tables).unwrap());
        assert_eq!(params.instance_type, "t2.micro");
        assert_eq!(params.image_id, "ami-0644165ab979df02d");

        let req: CreateVmRequest = serde_json::from_str(
            r#"{"provider":"gcp","vmName":"web-1","machineType":"MEDIUM","sourceImage":"Ubuntu24","projectId":"p"}"#,
        )
        .unwrap();
        let params = unwrap_gcp(resolve(ProviderKind::Gcp, &req, &tables).unwrap());
        assert_eq!(params.machine_type_url, "zones/europe-west9-c/machineTypes/t2d-standard-2");
        assert_eq!(
            params.source_image,
            "projects/ubuntu-os-cloud/global/images/ubuntu-2404-noble-amd64-v20250313"
        );

        let mut req = azure_request();
        req.vm_size = Some("large".into());
        req.image_reference = Some("ubuntu24".into());
        let params = unwrap_azure(resolve(ProviderKind::Azure, &req, &tables).unwrap());
        assert_eq!(params.vm_size, "Standard_DS3_v2");
        assert_eq!(params.image.to_string(), "Canonical:ubuntu-24_04-lts:server:latest");
    }

    #[test]
    fn test_fallback_keys_and_defaults() {
        let mut tables = MappingTables::default();
        tables.aws.default_region = "eu-west-3".into();
        let req = CreateVmRequest::new("aws", "vm");

        let params = unwrap_aws(resolve(ProviderKind::Aws, &req, &tables).unwrap());
        assert_eq!(params.instance_type, "t2.micro");
        assert_eq!(params.image_id, "ami-0644165ab979df02d");
        assert_eq!(params.key_name, "default-key");
        assert_eq!(params.security_group_ids, vec!["sg-01234567"]);
        assert_eq!(params.region, "eu-west-3");
    }

    #[test]
    fn test_fallback_key_only_counts_when_mapped() {
        let mut tables = MappingTables::default();
        tables.aws.table = IdentifierTable::new().with_image("ubuntu24", "ami-1");

        let req = CreateVmRequest::new("aws", "vm");
        let err = resolve(ProviderKind::Aws, &req, &tables).unwrap_err();
        assert_eq!(err, ProviderError::unresolved("aws", "instanceType"));
    }

    #[test]
    fn test_missing_mandatory_fields_fail() {
        let mut tables = MappingTables::default();
        tables.aws.default_security_group_ids.clear();
        let err = resolve(ProviderKind::Aws, &CreateVmRequest::new("aws", "vm"), &tables).unwrap_err();
        assert_eq!(err, ProviderError::unresolved("aws", "securityGroupIds"));

        // GCP ships without a default project
        let tables = MappingTables::default();
        let err = resolve(ProviderKind::Gcp, &CreateVmRequest::new("gcp", "vm"), &tables).unwrap_err();
        assert_eq!(err, ProviderError::unresolved("gcp", "projectId"));

        let req = CreateVmRequest {
            nic_id: None,
            ..azure_request()
        };
        let err = resolve(ProviderKind::Azure, &req, &tables).unwrap_err();
        assert_eq!(err, ProviderError::unresolved("azure", "nicId"));

        let req = CreateVmRequest {
            vm_name: Some("   ".into()),
            ..azure_request()
        };
        let err = resolve(ProviderKind::Azure, &req, &tables).unwrap_err();
        assert_eq!(err, ProviderError::unresolved("azure", "vmName"));
    }

    #[test]
    fn test_blank_default_is_not_a_value() {
        let mut tables = MappingTables::default();
        tables.gcp.default_zone = "  ".into();
        let mut req = CreateVmRequest::new("gcp", "vm");
        req.project_id = Some("p".into());

        let err = resolve(ProviderKind::Gcp, &req, &tables).unwrap_err();
        assert_eq!(err, ProviderError::unresolved("gcp", "zone"));
    }

    #[test]
    fn test_azure_defaults_and_image() {
        let tables = MappingTables::default();
        let params = unwrap_azure(resolve(ProviderKind::Azure, &azure_request(), &tables).unwrap());

        assert_eq!(params.vm_size, "Standard_DS1_v2");
        assert_eq!(params.location, "westeurope");
        assert_eq!(params.resource_group, "script-test");
        assert_eq!(params.image.to_string(), "Canonical:ubuntu-24_04-lts:server:latest");
    }

    #[test]
    fn test_azure_composite_image() {
        let tables = MappingTables::default();
        let req = azure_request().with_image("Vendor:Family:Variant:Tag");
        let params = unwrap_azure(resolve(ProviderKind::Azure, &req, &tables).unwrap());
        assert_eq!(params.image.publisher, "Vendor");
        assert_eq!(params.image.offer, "Family");
        assert_eq!(params.image.sku, "Variant");
        assert_eq!(params.image.version, "Tag");
    }

    #[test]
    fn test_azure_malformed_image_falls_back() {
        let tables = MappingTables::default();
        let req = azure_request().with_image("garbage");
        let params = unwrap_azure(resolve(ProviderKind::Azure, &req, &tables).unwrap());
        assert_eq!(params.image.to_string(), AZURE_FALLBACK_IMAGE);

        // A malformed table entry is recovered the same way
        let mut tables = MappingTables::default();
        tables.azure.table = tables.azure.table.clone().with_image("broken", "Canonical:only-two");
        let req = azure_request().with_image("BROKEN");
        let params = unwrap_azure(resolve(ProviderKind::Azure, &req, &tables).unwrap());
        assert_eq!(params.image.to_string(), AZURE_FALLBACK_IMAGE);
    }

    #[test]
    fn test_list_only_providers_cannot_resolve() {
        let tables = MappingTables::default();
        let req = CreateVmRequest::new("proxmoxve", "vm");
        let err = resolve(ProviderKind::ProxmoxVe, &req, &tables).unwrap_err();
        assert_eq!(err, ProviderError::UnsupportedCapability("proxmoxve".into()));
    }
}
