use tracing::{info, warn};
use url::Url;

use crate::auth::{AuthFailure, Authenticator, InternalUser};

/// Result of vetting an upgrade request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    /// No request URL at all; nothing was attempted
    Ignored,
    Rejected(AuthFailure),
    Accepted(InternalUser),
}

/// Query parameter carrying the bearer token
pub const TOKEN_PARAM: &str = "token";

/// Authenticate an upgrade request from its target URL
///
/// The URL may be origin-form (`/ws?token=...`) or absolute. Nothing here
/// returns an error: every failure becomes [`Handshake::Rejected`].
pub async fn authenticate_upgrade(authenticator: &Authenticator, url: Option<&str>) -> Handshake {
    let Some(url) = url else {
        return Handshake::Ignored;
    };

    let token = match extract_token(url) {
        Ok(token) => token,
        Err(e) => {
            warn!(error = %e, "WebSocket authentication error: malformed upgrade URL");
            return Handshake::Rejected(AuthFailure::Error(e.to_string()));
        }
    };

    match authenticator.authenticate(token.as_deref()).await {
        Ok(user) => {
            info!(user_id = %user.id, "WebSocket authentication succeeded");
            Handshake::Accepted(user)
        }
        Err(failure) => {
            match &failure {
                AuthFailure::NoToken => warn!("WebSocket authentication failed: no token provided"),
                AuthFailure::InvalidToken => warn!("WebSocket authentication failed: invalid token"),
                AuthFailure::UserNotFound => warn!("WebSocket authentication failed: user not found"),
                AuthFailure::TimedOut(_) | AuthFailure::Error(_) => {
                    warn!(error = %failure, "WebSocket authentication error")
                }
            }
            Handshake::Rejected(failure)
        }
    }
}

fn extract_token(url: &str) -> Result<Option<String>, url::ParseError> {
    let base = Url::parse("http://localhost")?;
    let parsed = base.join(url)?;
    Ok(parsed
        .query_pairs()
        .find(|(key, _)| key == TOKEN_PARAM)
        .map(|(_, value)| value.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticDirectory;
    use crate::auth::testing::StaticProvider;
    use std::sync::Arc;
    use std::time::Duration;

    fn authenticator() -> (Authenticator, Arc<StaticProvider>) {
        let provider = Arc::new(StaticProvider::with_token("good", "ext-1"));
        let directory = StaticDirectory::from_pairs([("ext-1", "u1")]);
        let auth = Authenticator::new(provider.clone(), Arc::new(directory), Duration::from_secs(1));
        (auth, provider)
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(extract_token("/ws?token=abc").unwrap().as_deref(), Some("abc"));
        assert_eq!(
            extract_token("ws://example.com/ws?x=1&token=a%20b").unwrap().as_deref(),
            Some("a b")
        );
        assert_eq!(extract_token("/ws").unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_url_is_ignored() {
        let (auth, provider) = authenticator();
        assert_eq!(authenticate_upgrade(&auth, None).await, Handshake::Ignored);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_token_skips_provider() {
        let (auth, provider) = authenticator();
        assert_eq!(
            authenticate_upgrade(&auth, Some("/ws")).await,
            Handshake::Rejected(AuthFailure::NoToken)
        );
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_url_is_rejected() {
        let (auth, provider) = authenticator();
        assert!(matches!(
            authenticate_upgrade(&auth, Some("http://[::1")).await,
            Handshake::Rejected(AuthFailure::Error(_))
        ));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_accepts_valid_token() {
        let (auth, _) = authenticator();
        match authenticate_upgrade(&auth, Some("/ws?token=good")).await {
            Handshake::Accepted(user) => assert_eq!(user.id, "u1"),
            other => panic!("unexpected handshake: {other:?}"),
        }
        assert_eq!(
            authenticate_upgrade(&auth, Some("/ws?token=bad")).await,
            Handshake::Rejected(AuthFailure::InvalidToken)
        );
    }
}
