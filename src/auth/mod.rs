//! Token verification and user resolution
//!
//! Authentication runs in two steps: an [`IdentityProvider`] turns a bearer
//! token into an external identity, and a [`UserDirectory`] maps that
//! identity to an internal user. Both the WebSocket gateway and the HTTP
//! routes go through [`Authenticator`], which bounds the whole exchange with a
//! timeout so a slow provider cannot stall callers.

pub mod directory;
pub mod jwt;
pub mod remote;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use directory::StaticDirectory;
pub use jwt::{JwtClaims, JwtProvider};
pub use remote::RemoteProvider;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("identity provider error: {0}")]
    Provider(String),

    #[error("user directory error: {0}")]
    Directory(String),

    #[error("auth configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;

/// Identity as asserted by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalUser {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// User record all job and connection state is keyed by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalUser {
    pub id: String,
    pub external_id: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `Ok(None)` for a token the provider does not accept
    async fn verify_token(&self, token: &str) -> Result<Option<ExternalUser>>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve_user(&self, external_id: &str) -> Result<Option<InternalUser>>;
}

/// Why an authentication attempt was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("no token provided")]
    NoToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("user not found")]
    UserNotFound,
    #[error("authentication timed out after {0:?}")]
    TimedOut(Duration),
    #[error("authentication error: {0}")]
    Error(String),
}

/// Provider + directory, bounded by a timeout
#[derive(Clone)]
pub struct Authenticator {
    provider: Arc<dyn IdentityProvider>,
    directory: Arc<dyn UserDirectory>,
    timeout: Duration,
}

impl Authenticator {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        directory: Arc<dyn UserDirectory>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            directory,
            timeout,
        }
    }

    /// Resolve a token to an internal user
    ///
    /// A missing or blank token fails without contacting the provider.
    pub async fn authenticate(&self, token: Option<&str>) -> std::result::Result<InternalUser, AuthFailure> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthFailure::NoToken)?;

        match tokio::time::timeout(self.timeout, self.resolve(token)).await {
            Ok(result) => result,
            Err(_) => Err(AuthFailure::TimedOut(self.timeout)),
        }
    }

    async fn resolve(&self, token: &str) -> std::result::Result<InternalUser, AuthFailure> {
        let external = self
            .provider
            .verify_token(token)
            .await
            .map_err(|e| AuthFailure::Error(e.to_string()))?
            .ok_or(AuthFailure::InvalidToken)?;

        self.directory
            .resolve_user(&external.id)
            .await
            .map_err(|e| AuthFailure::Error(e.to_string()))?
            .ok_or(AuthFailure::UserNotFound)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted provider for tests across the crate

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accepts tokens from a fixed table and counts calls
    #[derive(Default)]
    pub struct StaticProvider {
        pub tokens: HashMap<String, String>,
        pub fail: bool,
        pub delay: Option<Duration>,
        pub calls: AtomicUsize,
    }

    impl StaticProvider {
        pub fn with_token(token: &str, external_id: &str) -> Self {
            let mut tokens = HashMap::new();
            tokens.insert(token.to_string(), external_id.to_string());
            Self {
                tokens,
                ..Self::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityProvider for StaticProvider {
        async fn verify_token(&self, token: &str) -> Result<Option<ExternalUser>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(AuthError::Provider("provider unavailable".to_string()));
            }
            Ok(self.tokens.get(token).map(|id| ExternalUser {
                id: id.clone(),
                email: None,
            }))
        }
    }
}
