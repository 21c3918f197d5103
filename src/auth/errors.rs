//! Authentication error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Per-request authentication failures. All map to 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// No access token in the request
    Missing,
    /// Malformed, forged, or refresh token presented as access token
    Invalid,
    /// Access token past its expiry; the client should refresh
    Expired,
}

impl AuthError {
    fn message(&self) -> &'static str {
        match self {
            AuthError::Missing => "Not authenticated",
            AuthError::Invalid => "Invalid access token",
            AuthError::Expired => "Access token expired",
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: &'static str,
        }

        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: self.message(),
            }),
        )
            .into_response()
    }
}
