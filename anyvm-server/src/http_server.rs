//! HTTP API
//!
//! This module provides:
//! - `GET  /api/v1/vms[?provider=<name>]` - list VMs of one or all providers
//! - `POST /api/v1/vms` - create a VM from a unified request
//! - `GET  /api/v1/providers` - registered providers and their capabilities
//! - `GET  /health` - liveness
//!
//! Every API response uses the same envelope: `{success, data?, error?}`.
//! Aggregate listings add `degraded` (provider → error) when a provider failed.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{Method, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use anyvm_providers::{CreateVmRequest, Dispatcher, ProviderError, VmSnapshot};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

/// Shared state for HTTP handlers
pub struct AppState {
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

// ============================================================================
// API Response Types
// ============================================================================

/// Response envelope shared by every API endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<BTreeMap<String, String>>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            degraded: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            degraded: None,
        }
    }
}

type ApiError = (StatusCode, Json<ApiResponse<()>>);
type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Map a provider error onto an HTTP status.
fn status_for(error: &ProviderError) -> StatusCode {
    match error {
        ProviderError::BackendNotAvailable(_)
        | ProviderError::UnsupportedCapability(_)
        | ProviderError::UnresolvedIdentifier { .. } => StatusCode::BAD_REQUEST,
        ProviderError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ProviderError::MalformedMappingEntry { .. } | ProviderError::Backend { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn api_error(error: ProviderError) -> ApiError {
    let status = status_for(&error);
    if status.is_server_error() {
        error!(error = %error, "Request failed");
    } else {
        warn!(error = %error, "Request rejected");
    }
    (status, Json(ApiResponse::error(error.to_string())))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub provider: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub name: String,
    pub kind: String,
    pub supports_create: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub providers: usize,
}

// ============================================================================
// Router
// ============================================================================

/// Build the application router with all routes
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/vms", get(list_vms).post(create_vm))
        .route("/providers", get(list_providers));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/vms - List VMs, optionally filtered by provider
async fn list_vms(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Vec<VmSnapshot>> {
    let filter = params
        .provider
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());

    match filter {
        Some(name) => {
            let vms = state.dispatcher.list_one(name).await.map_err(api_error)?;
            Ok(Json(ApiResponse::ok(vms)))
        }
        None => {
            let listing = state.dispatcher.list_all().await;
            let degraded = listing.is_degraded();
            let mut response = ApiResponse::ok(listing.vms);
            if degraded {
                response.degraded = Some(listing.failures);
            }
            Ok(Json(response))
        }
    }
}

/// POST /api/v1/vms - Create a VM
async fn create_vm(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateVmRequest>, JsonRejection>,
) -> ApiResult<String> {
    let Json(request) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "Invalid create request payload");
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Invalid request payload")),
        )
    })?;

    state.dispatcher.create_vm(&request).await.map_err(api_error)?;

    info!(provider = %request.provider, vm_name = ?request.vm_name, "VM created");
    Ok(Json(ApiResponse::ok("VM created successfully".to_string())))
}

/// GET /api/v1/providers - List registered providers
async fn list_providers(State(state): State<Arc<AppState>>) -> ApiResult<Vec<ProviderInfo>> {
    let registry = state.dispatcher.registry();
    let providers = registry
        .names()
        .into_iter()
        .filter_map(|name| {
            registry.get(&name).map(|provider| ProviderInfo {
                kind: provider.kind().to_string(),
                supports_create: provider.supports_create(),
                name,
            })
        })
        .collect();

    Ok(Json(ApiResponse::ok(providers)))
}

/// GET /health - Liveness
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        providers: state.dispatcher.registry().len(),
    })
}
