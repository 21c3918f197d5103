//! Axum extractor and middleware for authentication.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, request::Parts},
    middleware::Next,
    response::Response,
};

use super::cookie::presented_access_token;
use super::errors::AuthError;
use super::state::HasAuthBackend;
use crate::jwt::{Claims, TokenCodec, TokenError, TokenKind};

/// Authenticated user information extracted from the access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// User UUID (the `sub` claim)
    pub user_id: String,
    /// Verified access token claims
    pub claims: Claims,
}

/// Verify an access token and return the user it was issued to.
pub fn authenticate(codec: &TokenCodec, token: &str) -> Result<AuthenticatedUser, AuthError> {
    let claims = codec
        .verify(token, TokenKind::Access)
        .map_err(|e| match e {
            TokenError::Expired => AuthError::Expired,
            _ => AuthError::Invalid,
        })?;

    Ok(AuthenticatedUser {
        user_id: claims.sub.clone(),
        claims,
    })
}

fn authenticate_headers(
    headers: &HeaderMap,
    codec: &TokenCodec,
) -> Result<AuthenticatedUser, AuthError> {
    let token = presented_access_token(headers).ok_or(AuthError::Missing)?;
    authenticate(codec, token)
}

/// Extractor for endpoints that require authentication.
/// Reuses the user inserted by [`require_auth`] when that layer ran first.
pub struct Auth(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for Auth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(Auth(user.clone()));
        }

        authenticate_headers(&parts.headers, state.codec()).map(Auth)
    }
}

/// Middleware guarding a whole router. Inserts [`AuthenticatedUser`] into
/// request extensions for downstream handlers.
///
/// ```ignore
/// let habits = Router::new()
///     .route("/", get(list_habits))
///     .layer(middleware::from_fn_with_state(codec.clone(), require_auth));
/// ```
pub async fn require_auth(
    State(codec): State<Arc<TokenCodec>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = authenticate_headers(request.headers(), &codec)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
