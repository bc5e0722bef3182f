use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Failure taxonomy of the authentication subsystem. Everything a handler
/// can return bottoms out here; `IntoResponse` decides the wire shape.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("email already registered")]
    DuplicateIdentity,
    /// Unknown email and wrong password are deliberately the same error so
    /// responses cannot be used to enumerate accounts.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    ExpiredToken,
    #[error("google sign-in could not be verified")]
    InvalidAssertion,
    #[error("storage unavailable")]
    Store(anyhow::Error),
    #[error("internal error")]
    Internal(anyhow::Error),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation(_) | AuthError::DuplicateIdentity => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::ExpiredToken
            | AuthError::InvalidAssertion => StatusCode::UNAUTHORIZED,
            AuthError::Store(_) | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            // log the source chain, answer with a generic body
            error!(error = ?self, "request failed");
            return (status, Json(json!({ "message": "internal server error" }))).into_response();
        }
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}
