//! Bearer token caching shared by the OAuth2-based backends.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::Result;

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// OAuth2 token endpoint response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    pub fn into_token(self) -> CachedToken {
        // Assume an hour when the endpoint does not say
        let lifetime = Duration::from_secs(self.expires_in.unwrap_or(3600));
        CachedToken::expiring(self.access_token, lifetime)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CachedToken {
    value: String,
    expires_at: Option<Instant>,
}

impl CachedToken {
    pub fn expiring(value: String, lifetime: Duration) -> Self {
        Self {
            value,
            expires_at: Some(Instant::now() + lifetime),
        }
    }

    /// A token that is never refreshed.
    pub fn permanent(value: String) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() + EXPIRY_MARGIN < at,
            None => true,
        }
    }
}

/// Holds the current bearer token and refreshes it when it is close to expiry.
#[derive(Debug, Default)]
pub(crate) struct TokenCache {
    token: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn with_token(token: CachedToken) -> Self {
        Self {
            token: RwLock::new(Some(token)),
        }
    }

    /// Return the cached token, calling `refresh` first if it is missing or stale.
    pub async fn bearer<F, Fut>(&self, refresh: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedToken>>,
    {
        if let Some(token) = self.token.read().await.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let mut slot = self.token.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(token) = slot.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let token = refresh().await?;
        let value = token.value.clone();
        *slot = Some(token);
        Ok(value)
    }
}
