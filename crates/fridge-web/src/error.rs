use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fridge_core::FieldError;
use fridge_identity::AuthError;
use fridge_lifecycle::LifecycleError;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Unauthorized(#[from] AuthError),

    #[error("{0}")]
    BadRequest(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a [FieldError]>,
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Lifecycle(err) => match err {
                LifecycleError::Validation(_)
                | LifecycleError::InvalidState { .. }
                | LifecycleError::SelfReservationForbidden
                | LifecycleError::SelfRatingForbidden
                | LifecycleError::NoPriorInteraction => StatusCode::BAD_REQUEST,
                LifecycleError::NotOwner { .. } | LifecycleError::NotReserver { .. } => {
                    StatusCode::FORBIDDEN
                }
                LifecycleError::NotFound | LifecycleError::UserNotFound => StatusCode::NOT_FOUND,
                LifecycleError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Lifecycle(LifecycleError::Validation(errors)) => ErrorBody {
                message: "Validation failed".into(),
                errors: Some(&errors.0),
            },
            ApiError::Lifecycle(LifecycleError::Store(err)) => {
                error!(error = %err, "request failed on store error");
                ErrorBody {
                    message: "Server error".into(),
                    errors: None,
                }
            }
            ApiError::Unauthorized(err) => {
                debug!(error = %err, "request rejected as unauthenticated");
                let message = match err {
                    AuthError::Missing => "No token, authorization denied",
                    AuthError::Expired | AuthError::Invalid(_) => "Token is not valid",
                };
                ErrorBody {
                    message: message.into(),
                    errors: None,
                }
            }
            other => ErrorBody {
                message: other.to_string(),
                errors: None,
            },
        };
        (status, Json(body)).into_response()
    }
}
