//! Error types for the provider abstraction layer.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while listing or creating VMs through a provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider tag is unknown, or the provider failed to construct at startup.
    #[error("Provider not available: {0}")]
    BackendNotAvailable(String),

    /// The provider exists but cannot create VMs.
    #[error("VM creation is not supported by provider: {0}")]
    UnsupportedCapability(String),

    /// A field the provider needs to create a VM has no resolvable value.
    #[error("No value for '{field}' could be resolved for provider {backend}")]
    UnresolvedIdentifier {
        backend: String,
        field: &'static str,
    },

    /// A resolved value failed structural validation.
    ///
    /// Resolution recovers from this with a fixed fallback; it is only
    /// constructed for logging.
    #[error("Malformed mapping entry for '{field}' on provider {backend}: {value}")]
    MalformedMappingEntry {
        backend: String,
        field: &'static str,
        value: String,
    },

    /// The vendor API reported a failure (authentication, network, response format or
    /// a failed operation).
    #[error("{backend} error: {message}")]
    Backend { backend: String, message: String },

    /// The create deadline elapsed before the provider reported a terminal state.
    #[error("Timed out after {}s waiting for {backend} to finish", .after.as_secs())]
    Timeout { backend: String, after: Duration },
}

impl ProviderError {
    /// Wrap a vendor failure for `backend`.
    pub fn backend(backend: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    pub fn unresolved(backend: impl Into<String>, field: &'static str) -> Self {
        Self::UnresolvedIdentifier {
            backend: backend.into(),
            field,
        }
    }

    /// Whether the error was caused by the caller's request rather than the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::BackendNotAvailable(_)
                | Self::UnsupportedCapability(_)
                | Self::UnresolvedIdentifier { .. }
        )
    }
}

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Signal that a provider could not be constructed.
///
/// Produced instead of a provider instance when credentials are missing or
/// rejected, or the endpoint cannot be reached during construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{backend} unavailable: {reason}")]
pub struct Unavailable {
    pub backend: String,
    pub reason: String,
}

impl Unavailable {
    pub fn new(backend: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }
}
