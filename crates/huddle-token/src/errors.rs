use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use huddle_core::credential::CredentialError;
use huddle_core::errors::HuddleError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Platform(#[from] HuddleError),

    #[error("could not sign credential: {0}")]
    Signing(#[from] CredentialError),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::Platform(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = self.to_string();
        tracing::warn!("token request failed: {message}");

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
