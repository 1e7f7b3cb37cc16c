//! # anyvm Providers
//!
//! Provider abstraction layer for listing and creating virtual machines
//! across public clouds and on-premises hypervisors.
//!
//! This crate provides:
//! - **[`Provider`]** - the capability every backend implements
//! - **[`ProviderRegistry`]** - name → backend instance, built at startup
//! - **[`resolve`]** - translation of unified create requests into
//!   provider-native parameters through [`MappingTables`]
//! - **[`Dispatcher`]** - routing of create and list requests, including the
//!   fault-tolerant aggregate listing
//!
//! ## Architecture
//!
//! ```text
//!        CreateVmRequest            list_vms(None | Some(name))
//!              │                              │
//!              ▼                              ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                      Dispatcher                         │
//! │   registry lookup → resolve (MappingTables) → create    │
//! └────────────────────────────┬────────────────────────────┘
//!                              │ Arc<dyn Provider>
//!     ┌───────────┬────────────┼────────────┬─────────────┐
//!     ▼           ▼            ▼            ▼             ▼
//! ┌────────┐ ┌────────┐  ┌──────────┐ ┌──────────┐  ┌─────────┐
//! │ Azure  │ │  AWS   │  │   GCP    │ │ Proxmox  │  │  ...    │
//! │ create │ │ create │  │  create  │ │ list     │  │  list   │
//! └────────┘ └────────┘  └──────────┘ └──────────┘  └─────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use anyvm_providers::{CreateVmRequest, Dispatcher, MappingTables, MockProvider, ProviderRegistry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut registry = ProviderRegistry::new();
//!     registry.insert("mock", Arc::new(MockProvider::new().with_vms(2)));
//!
//!     let dispatcher = Dispatcher::new(registry, MappingTables::default());
//!     dispatcher
//!         .create_vm(&CreateVmRequest::new("mock", "dev-1").with_size("small"))
//!         .await
//!         .unwrap();
//!
//!     let vms = dispatcher.list_vms(None).await.unwrap();
//!     assert_eq!(vms.len(), 3);
//! }
//! ```

pub mod backends;
pub mod dispatcher;
pub mod error;
pub mod mapping;
pub mod mock;
pub mod registry;
pub mod resolve;
pub mod traits;
pub mod types;

pub use backends::{
    AwsConfig, AwsProvider, AzureConfig, AzureProvider, GcpConfig, GcpProvider, HyperVConfig,
    HyperVProvider, NutanixConfig, NutanixProvider, ProxmoxConfig, ProxmoxProvider, VSphereConfig,
    VSphereProvider,
};
pub use dispatcher::{AggregateListing, Dispatcher, DEFAULT_CREATE_TIMEOUT, DEFAULT_LIST_TIMEOUT};
pub use error::{ProviderError, Result, Unavailable};
pub use mapping::{AwsMapping, AzureMapping, GcpMapping, IdentifierTable, MappingTables, MockMapping};
pub use mock::MockProvider;
pub use registry::ProviderRegistry;
pub use resolve::resolve;
pub use traits::{Construction, Provider};
pub use types::*;
