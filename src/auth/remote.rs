use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use super::{AuthError, ExternalUser, IdentityProvider, Result};

/// Verifies tokens against an HTTP endpoint
///
/// `GET {verify_url}` with `Authorization: Bearer <token>`. A 2xx response
/// carries `{"id": ...}`; 401 and 403 mean the token is not accepted. Any
/// other status is a provider error.
pub struct RemoteProvider {
    client: Client,
    verify_url: Url,
}

impl RemoteProvider {
    pub fn new(verify_url: &str, timeout: Duration) -> Result<Self> {
        let verify_url = Url::parse(verify_url)
            .map_err(|e| AuthError::Config(format!("invalid verify_url: {e}")))?;

        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(concat!("importd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuthError::Config(e.to_string()))?;

        Ok(Self { client, verify_url })
    }
}

#[async_trait]
impl IdentityProvider for RemoteProvider {
    async fn verify_token(&self, token: &str) -> Result<Option<ExternalUser>> {
        let response = self
            .client
            .get(self.verify_url.clone())
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Provider(e.to_string()))?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            debug!(%status, "Identity provider rejected token");
            return Ok(None);
        }
        if !status.is_success() {
            warn!(%status, "Identity provider returned unexpected status");
            return Err(AuthError::Provider(format!("unexpected status {status}")));
        }

        let user: ExternalUser = response
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("malformed provider response: {e}")))?;

        if user.id.is_empty() {
            return Ok(None);
        }
        Ok(Some(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::HeaderMap, routing::get};
    use serde_json::json;

    /// Minimal provider: "good" is ext-1, "boom" is a server error
    async fn spawn_provider() -> String {
        async fn verify(headers: HeaderMap) -> axum::response::Response {
            use axum::response::IntoResponse;
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            match auth {
                "Bearer good" => Json(json!({"id": "ext-1", "email": "a@example.com"})).into_response(),
                "Bearer boom" => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
                _ => StatusCode::UNAUTHORIZED.into_response(),
            }
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/verify", get(verify)))
                .await
                .unwrap();
        });
        format!("http://{addr}/verify")
    }

    #[tokio::test]
    async fn test_remote_verification() {
        let url = spawn_provider().await;
        let provider = RemoteProvider::new(&url, Duration::from_secs(5)).unwrap();

        let user = provider.verify_token("good").await.unwrap().unwrap();
        assert_eq!(user.id, "ext-1");

        assert!(provider.verify_token("nope").await.unwrap().is_none());
        assert!(matches!(provider.verify_token("boom").await, Err(AuthError::Provider(_))));
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        assert!(matches!(
            RemoteProvider::new("not a url", Duration::from_secs(1)),
            Err(AuthError::Config(_))
        ));
    }
}
