//! Bearer-token extractors. Handlers that mutate take [`AuthUser`]; read
//! paths that only personalise take [`MaybeAuthUser`].

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use fridge_identity::{bearer_token, AuthError};
use uuid::Uuid;

use crate::{ApiError, AppState};

#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

#[derive(Debug, Clone, Copy)]
pub struct MaybeAuthUser(pub Option<Uuid>);

fn token_from(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = token_from(parts).ok_or(AuthError::Missing)?;
        let user_id = state.identity.authenticate(token).await?;
        Ok(AuthUser(user_id))
    }
}

impl FromRequestParts<Arc<AppState>> for MaybeAuthUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let user_id = state.identity.optional_authenticate(token_from(parts)).await;
        Ok(MaybeAuthUser(user_id))
    }
}
