//! Caller identity: the provider contract the lifecycle trusts, and an HS256
//! bearer-token implementation of it.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "fridge-identity";

const DEV_SECRET: &str = "community-fridge-dev-secret";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no credentials supplied")]
    Missing,
    #[error("token has expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Resolves a credential to the acting user's id.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Uuid, AuthError>;

    /// Like [`authenticate`](Self::authenticate) but never fails; a bad or
    /// absent token is treated as anonymous.
    async fn optional_authenticate(&self, token: Option<&str>) -> Option<Uuid> {
        let token = token?;
        match self.authenticate(token).await {
            Ok(id) => Some(id),
            Err(err) => {
                debug!(error = %err, "ignoring unusable optional credential");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: DEV_SECRET.into(),
            issuer: "community-fridge".into(),
        }
    }
}

impl JwtConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secret = match std::env::var("FRIDGE_JWT_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => secret,
            _ => {
                warn!("FRIDGE_JWT_SECRET not set; using the development secret");
                defaults.secret
            }
        };
        let issuer = std::env::var("FRIDGE_JWT_ISSUER")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.issuer);
        Self { secret, issuer }
    }
}

pub struct JwtIdentity {
    issuer: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for JwtIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtIdentity")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl JwtIdentity {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            issuer: config.issuer.clone(),
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
        }
    }

    /// Mints a bearer token for `user_id` valid for `ttl`.
    pub fn issue(&self, user_id: Uuid, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + ttl.num_seconds(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Invalid(format!("encode: {e}")))
    }

    fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["sub", "exp", "iss"]);
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            })
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentity {
    async fn authenticate(&self, token: &str) -> Result<Uuid, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        let claims = self.decode(token)?;
        Uuid::parse_str(&claims.sub).map_err(|_| AuthError::Invalid("subject is not a user id".into()))
    }
}

/// Pulls the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(secret: &str) -> JwtIdentity {
        JwtIdentity::new(&JwtConfig {
            secret: secret.into(),
            issuer: "community-fridge".into(),
        })
    }

    #[tokio::test]
    async fn issued_token_authenticates_its_subject() {
        let idp = identity("s3cret");
        let user = Uuid::new_v4();
        let token = idp.issue(user, Duration::hours(1)).unwrap();
        assert_eq!(idp.authenticate(&token).await.unwrap(), user);
        assert_eq!(idp.optional_authenticate(Some(&token)).await, Some(user));
    }

    #[tokio::test]
    async fn foreign_expired_and_empty_tokens_are_rejected() {
        let idp = identity("s3cret");
        let user = Uuid::new_v4();

        let foreign = identity("other").issue(user, Duration::hours(1)).unwrap();
        assert!(matches!(idp.authenticate(&foreign).await, Err(AuthError::Invalid(_))));

        let stale = idp.issue(user, Duration::hours(-2)).unwrap();
        assert_eq!(idp.authenticate(&stale).await, Err(AuthError::Expired));

        assert_eq!(idp.authenticate("  ").await, Err(AuthError::Missing));
        assert_eq!(idp.optional_authenticate(Some("garbage")).await, None);
        assert_eq!(idp.optional_authenticate(None).await, None);
    }

    #[tokio::test]
    async fn issuer_must_match() {
        let user = Uuid::new_v4();
        let other = JwtIdentity::new(&JwtConfig {
            secret: "s3cret".into(),
            issuer: "elsewhere".into(),
        });
        let token = other.issue(user, Duration::hours(1)).unwrap();
        assert!(identity("s3cret").authenticate(&token).await.is_err());
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer   xyz "), Some("xyz"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
