use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AuthError, ExternalUser, IdentityProvider, Result};

/// Claims read from an HS256 token; `sub` is the external id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Verifies HS256 tokens signed with a shared secret
pub struct JwtProvider {
    key: DecodingKey,
    validation: Validation,
}

impl JwtProvider {
    pub fn new(secret: &str, issuer: Option<&str>) -> Result<Self> {
        if secret.is_empty() {
            return Err(AuthError::Config("JWT secret must not be empty".to_string()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }

        Ok(Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }
}

#[async_trait]
impl IdentityProvider for JwtProvider {
    async fn verify_token(&self, token: &str) -> Result<Option<ExternalUser>> {
        match decode::<JwtClaims>(token, &self.key, &self.validation) {
            Ok(data) => Ok(Some(ExternalUser {
                id: data.claims.sub,
                email: data.claims.email,
            })),
            Err(e) => {
                debug!(error = %e, "JWT rejected");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    const SECRET: &str = "test-secret";

    fn token(sub: &str, iss: Option<&str>, exp_offset: i64) -> String {
        let claims = JwtClaims {
            sub: sub.to_string(),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as u64,
            iss: iss.map(String::from),
            email: Some("a@example.com".to_string()),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    #[tokio::test]
    async fn test_accepts_signed_token() {
        let provider = JwtProvider::new(SECRET, None).unwrap();
        let user = provider.verify_token(&token("ext-1", None, 3600)).await.unwrap().unwrap();
        assert_eq!(user.id, "ext-1");
        assert_eq!(user.email.as_deref(), Some("a@example.com"));
    }

    #[tokio::test]
    async fn test_rejects_bad_tokens() {
        let provider = JwtProvider::new(SECRET, Some("importd")).unwrap();

        assert!(provider.verify_token("garbage").await.unwrap().is_none());
        assert!(provider.verify_token(&token("ext-1", Some("other"), 3600)).await.unwrap().is_none());
        assert!(provider.verify_token(&token("ext-1", Some("importd"), -3600)).await.unwrap().is_none());

        let other = JwtProvider::new("another-secret", None).unwrap();
        assert!(other.verify_token(&token("ext-1", None, 3600)).await.unwrap().is_none());
    }

    #[test]
    fn test_empty_secret_is_config_error() {
        assert!(matches!(JwtProvider::new("", None), Err(AuthError::Config(_))));
    }
}
