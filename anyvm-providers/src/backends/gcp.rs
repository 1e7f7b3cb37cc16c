//! Google Compute Engine backend over the Compute REST API.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};

use super::oauth::{CachedToken, TokenCache, TokenResponse};
use super::{base_url, http_client, json, require, send};
use crate::error::{ProviderError, Result, Unavailable};
use crate::traits::{mismatched_params, Provider};
use crate::types::{CreateParams, GcpCreateParams, ProviderKind, VmSnapshot};

const KIND: ProviderKind = ProviderKind::Gcp;
const BOOT_DISK_SIZE_GB: &str = "10";
const DEFAULT_NETWORK: &str = "global/networks/default";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const COMPUTE_SCOPE: &str = "https://www.googleapis.com/auth/compute";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// GCP project and credential source.
///
/// Either `access_token` or a credentials file (`service_account` key or
/// `authorized_user`) is needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcpConfig {
    pub project_id: String,
    pub credentials_file: Option<PathBuf>,
    /// Pre-issued OAuth2 access token, used as-is
    pub access_token: String,
    pub compute_endpoint: String,
    /// Used for `authorized_user` files, and for service account keys that
    /// carry no `token_uri`
    pub token_endpoint: String,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            credentials_file: None,
            access_token: String::new(),
            compute_endpoint: "https://compute.googleapis.com/compute/v1".to_string(),
            token_endpoint: "https://oauth2.googleapis.com/token".to_string(),
        }
    }
}

impl GcpConfig {
    pub fn is_configured(&self) -> bool {
        !self.project_id.trim().is_empty()
            || self.credentials_file.is_some()
            || !self.access_token.trim().is_empty()
    }
}

/// A gcloud credentials file, discriminated by its `type` field.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialsFile {
    AuthorizedUser {
        #[serde(default)]
        client_id: String,
        #[serde(default)]
        client_secret: String,
        #[serde(default)]
        refresh_token: String,
    },
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default)]
        private_key_id: Option<String>,
        #[serde(default)]
        token_uri: Option<String>,
    },
}

/// How an expired bearer token is replaced.
enum TokenSource {
    /// Configured access token; it cannot be renewed
    Static,
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    ServiceAccount(ServiceAccount),
}

/// Signing material for the JWT bearer grant.
struct ServiceAccount {
    client_email: String,
    key_id: Option<String>,
    token_uri: String,
    key: EncodingKey,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

impl ServiceAccount {
    /// Build the signed assertion for the token endpoint.
    fn assertion(&self, issued_at: i64) -> Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key_id.clone();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: COMPUTE_SCOPE,
            aud: &self.token_uri,
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&header, &claims, &self.key)
            .map_err(|e| ProviderError::backend(KIND.as_str(), format!("cannot sign assertion: {}", e)))
    }
}

impl TokenSource {
    fn from_file(file: CredentialsFile, default_token_uri: &str) -> std::result::Result<Self, Unavailable> {
        match file {
            CredentialsFile::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
            } => Ok(Self::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
            }),
            CredentialsFile::ServiceAccount {
                client_email,
                private_key,
                private_key_id,
                token_uri,
            } => {
                let key = EncodingKey::from_rsa_pem(private_key.as_bytes()).map_err(|e| {
                    Unavailable::new(KIND.as_str(), format!("invalid service account key: {}", e))
                })?;
                Ok(Self::ServiceAccount(ServiceAccount {
                    client_email,
                    key_id: private_key_id.filter(|id| !id.is_empty()),
                    token_uri: token_uri
                        .filter(|uri| !uri.trim().is_empty())
                        .unwrap_or_else(|| default_token_uri.to_string()),
                    key,
                }))
            }
        }
    }

    /// Exchange the credentials for a fresh access token.
    async fn fetch(&self, client: &reqwest::Client, token_endpoint: &str) -> Result<CachedToken> {
        let request = match self {
            Self::Static => {
                return Err(ProviderError::backend(KIND.as_str(), "access token expired"));
            }
            Self::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
            } => client.post(token_endpoint).form(&[
                ("grant_type", "refresh_token"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ]),
            Self::ServiceAccount(account) => {
                let assertion = account.assertion(Utc::now().timestamp())?;
                client.post(&account.token_uri).form(&[
                    ("grant_type", JWT_BEARER_GRANT),
                    ("assertion", assertion.as_str()),
                ])
            }
        };
        let token: TokenResponse = json(KIND, send(KIND, request).await?).await?;
        Ok(token.into_token())
    }
}

/// Compute Engine provider. Supports listing and creation.
pub struct GcpProvider {
    config: GcpConfig,
    client: reqwest::Client,
    source: TokenSource,
    tokens: TokenCache,
}

impl GcpProvider {
    #[instrument(skip(config), fields(project = %config.project_id))]
    pub async fn connect(config: GcpConfig) -> std::result::Result<Self, Unavailable> {
        require(KIND, "project id", &config.project_id)?;
        let client = http_client(KIND, false)?;

        if !config.access_token.trim().is_empty() {
            let token = CachedToken::permanent(config.access_token.trim().to_string());
            return Ok(Self {
                config,
                client,
                source: TokenSource::Static,
                tokens: TokenCache::with_token(token),
            });
        }

        let path = config
            .credentials_file
            .clone()
            .ok_or_else(|| Unavailable::new(KIND.as_str(), "no access token or credentials file configured"))?;
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            Unavailable::new(KIND.as_str(), format!("cannot read {}: {}", path.display(), e))
        })?;
        let file: CredentialsFile = serde_json::from_str(&raw).map_err(|e| {
            Unavailable::new(KIND.as_str(), format!("invalid credentials file {}: {}", path.display(), e))
        })?;
        let source = TokenSource::from_file(file, &config.token_endpoint)?;

        let token = source
            .fetch(&client, &config.token_endpoint)
            .await
            .map_err(|e| Unavailable::new(KIND.as_str(), e.to_string()))?;

        info!("GCP credentials accepted");
        Ok(Self {
            config,
            client,
            source,
            tokens: TokenCache::with_token(token),
        })
    }

    async fn bearer(&self) -> Result<String> {
        self.tokens
            .bearer(|| self.source.fetch(&self.client, &self.config.token_endpoint))
            .await
    }

    fn project_url(&self) -> String {
        format!(
            "{}/projects/{}",
            base_url(&self.config.compute_endpoint),
            self.config.project_id
        )
    }

    /// Block on the zonal operation until it is DONE.
    async fn wait_for_operation(&self, zone: &str, mut operation: Operation) -> Result<()> {
        loop {
            if let Some(error) = operation.error.take().filter(|e| !e.errors.is_empty()) {
                let messages: Vec<String> = error
                    .errors
                    .into_iter()
                    .map(|e| format!("{}: {}", e.code, e.message))
                    .collect();
                return Err(ProviderError::backend(KIND.as_str(), messages.join("; ")));
            }
            if operation.status == "DONE" {
                return Ok(());
            }

            debug!(operation = %operation.name, status = %operation.status, "Waiting for GCP operation");
            // The wait endpoint long-polls for up to two minutes
            let url = format!(
                "{}/zones/{}/operations/{}/wait",
                self.project_url(),
                zone,
                operation.name
            );
            let token = self.bearer().await?;
            operation = json(KIND, send(KIND, self.client.post(url).bearer_auth(token)).await?).await?;
        }
    }
}

#[async_trait]
impl Provider for GcpProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    #[instrument(skip(self), fields(provider = "gcp", project = %self.config.project_id))]
    async fn list_vms(&self) -> Result<Vec<VmSnapshot>> {
        let url = format!("{}/aggregated/instances", self.project_url());
        let mut vms = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = self.bearer().await?;
            let mut request = self.client.get(&url).bearer_auth(token);
            if let Some(page) = page_token.take() {
                request = request.query(&[("pageToken", page)]);
            }

            let page: AggregatedInstances = json(KIND, send(KIND, request).await?).await?;
            for scoped in page.items.into_values() {
                vms.extend(scoped.instances.into_iter().map(Instance::into_snapshot));
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        debug!(count = vms.len(), "Listed GCP instances");
        Ok(vms)
    }

    fn supports_create(&self) -> bool {
        true
    }

    #[instrument(skip(self, params), fields(provider = "gcp", vm_name = %params.vm_name()))]
    async fn create_vm(&self, params: CreateParams) -> Result<()> {
        let params = match params {
            CreateParams::Gcp(p) => p,
            other => return Err(mismatched_params(self, &other)),
        };

        info!(
            zone = %params.zone,
            machine_type = %params.machine_type_url,
            source_image = %params.source_image,
            "Creating GCP instance"
        );

        // Resolved project wins over the configured one
        let url = format!(
            "{}/projects/{}/zones/{}/instances",
            base_url(&self.config.compute_endpoint),
            params.project_id,
            params.zone
        );
        let token = self.bearer().await?;
        let operation: Operation = json(
            KIND,
            send(KIND, self.client.post(url).bearer_auth(token).json(&instance_body(&params))).await?,
        )
        .await?;

        self.wait_for_operation(&params.zone, operation).await
    }
}

fn instance_body(params: &GcpCreateParams) -> serde_json::Value {
    json!({
        "name": params.vm_name,
        "machineType": params.machine_type_url,
        "disks": [{
            "boot": true,
            "autoDelete": true,
            "initializeParams": {
                "sourceImage": params.source_image,
                "diskSizeGb": BOOT_DISK_SIZE_GB,
            },
        }],
        "networkInterfaces": [{ "network": DEFAULT_NETWORK }],
    })
}

/// Last path segment of a resource URL.
fn last_segment(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

// =============================================================================
// COMPUTE WIRE TYPES
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregatedInstances {
    #[serde(default)]
    items: BTreeMap<String, InstancesScopedList>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstancesScopedList {
    #[serde(default)]
    instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
struct Instance {
    name: String,
    #[serde(default)]
    zone: String,
    #[serde(default)]
    status: String,
}

impl Instance {
    fn into_snapshot(self) -> VmSnapshot {
        let zone = last_segment(&self.zone).to_string();
        VmSnapshot::new(self.name.clone(), self.name, KIND.as_str(), zone, self.status)
    }
}

#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Deserialize)]
struct OperationErrorItem {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}
