//! Provider backends.
//!
//! Each backend is a thin adapter over one vendor API:
//! - **Azure** (ARM REST) - list and create
//! - **AWS** (EC2 Query API, SigV4) - list and create
//! - **GCP** (Compute Engine REST) - list and create
//! - **Hyper-V** (PowerShell remoting) - list only
//! - **Proxmox VE** (REST) - list only
//! - **vSphere** (vCenter REST) - list only
//! - **Nutanix** (Prism Central v3 REST) - list only
//!
//! Every backend is built with an async `connect` constructor returning either
//! a ready provider or [`Unavailable`]; constructors never panic.

pub mod aws;
pub mod azure;
pub mod gcp;
pub mod hyperv;
pub mod nutanix;
pub mod proxmox;
pub mod vsphere;

mod oauth;
mod sigv4;

pub use aws::{AwsConfig, AwsProvider};
pub use azure::{AzureConfig, AzureProvider};
pub use gcp::{GcpConfig, GcpProvider};
pub use hyperv::{HyperVConfig, HyperVProvider};
pub use nutanix::{NutanixConfig, NutanixProvider};
pub use proxmox::{ProxmoxConfig, ProxmoxProvider};
pub use vsphere::{VSphereConfig, VSphereProvider};

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::{ProviderError, Result, Unavailable};
use crate::types::ProviderKind;

const USER_AGENT: &str = concat!("anyvm/", env!("CARGO_PKG_VERSION"));

/// Timeout for a single HTTP exchange with a vendor API.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest slice of an error body kept in error messages.
const MAX_ERROR_BODY: usize = 512;

/// Build the HTTP client used by a backend.
pub(crate) fn http_client(
    kind: ProviderKind,
    accept_invalid_certs: bool,
) -> std::result::Result<reqwest::Client, Unavailable> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
        .map_err(|e| Unavailable::new(kind.as_str(), format!("failed to build HTTP client: {}", e)))
}

/// Send a request; transport failures and non-2xx statuses become errors.
pub(crate) async fn send(kind: ProviderKind, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::backend(kind.as_str(), format!("request failed: {}", e)))?;
    check(kind, response).await
}

/// Turn a non-2xx response into a backend error carrying the status and body.
pub(crate) async fn check(kind: ProviderKind, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::backend(
        kind.as_str(),
        format!("HTTP {}: {}", status, truncate(body.trim(), MAX_ERROR_BODY)),
    ))
}

/// Decode a JSON response body.
pub(crate) async fn json<T: DeserializeOwned>(kind: ProviderKind, response: reqwest::Response) -> Result<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::backend(kind.as_str(), format!("malformed response: {}", e)))
}

/// Reject a credential bundle with an empty mandatory field.
pub(crate) fn require(
    kind: ProviderKind,
    field: &str,
    value: &str,
) -> std::result::Result<(), Unavailable> {
    if value.trim().is_empty() {
        Err(Unavailable::new(kind.as_str(), format!("{} is not configured", field)))
    } else {
        Ok(())
    }
}

/// Strip a trailing slash from a configured base URL.
pub(crate) fn base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
