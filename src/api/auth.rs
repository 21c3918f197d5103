//! Session API endpoints.
//!
//! - POST `/register` - Create an account and start a session
//! - POST `/login` - Verify credentials and start a session
//! - POST `/refresh` - Exchange a refresh token for a new token pair
//! - POST `/logout` - Revoke a refresh token (always succeeds)
//! - POST `/logout-all` - Revoke every session of the current user
//! - GET `/me` - Current user profile

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use super::error::{ApiError, ResultExt};
use crate::auth::{Auth, HasAuthBackend};
use crate::db::{Database, User};
use crate::jwt::{TokenCodec, TokenPair};
use crate::password::{
    MIN_PASSWORD_LENGTH, hash_password, verify_dummy_password, verify_password,
};
use crate::rate_limit::{RateLimitConfig, rate_limit_credentials, rate_limit_refresh};
use crate::session::SessionService;

const MAX_NAME_LENGTH: usize = 100;
const MAX_EMAIL_LENGTH: usize = 254;

#[derive(Clone)]
pub struct AuthState {
    pub db: Database,
    pub sessions: SessionService,
}

impl HasAuthBackend for AuthState {
    fn codec(&self) -> &TokenCodec {
        self.sessions.codec()
    }
}

pub fn router(state: AuthState, rate_limit: Arc<RateLimitConfig>) -> Router {
    let credential_routes = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .layer(middleware::from_fn_with_state(
            rate_limit.clone(),
            rate_limit_credentials,
        ));

    let refresh_routes = Router::new()
        .route("/refresh", post(refresh))
        .layer(middleware::from_fn_with_state(rate_limit, rate_limit_refresh));

    Router::new()
        .merge(credential_routes)
        .merge(refresh_routes)
        .route("/logout", post(logout))
        .route("/logout-all", post(logout_all))
        .route("/me", get(me))
        .with_state(state)
}

#[derive(Deserialize)]
struct RegisterRequest {
    email: String,
    password: String,
    name: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    /// Access token lifetime in seconds
    expires_in: u64,
}

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            expires_in: pair.access.duration(),
            access_token: pair.access.token,
            refresh_token: pair.refresh.token,
        }
    }
}

#[derive(Serialize)]
struct AuthResponse {
    user: User,
    #[serde(flatten)]
    tokens: TokenResponse,
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    if email.is_empty() || email.len() > MAX_EMAIL_LENGTH {
        return Err(ApiError::bad_request("Invalid email address"));
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ApiError::bad_request("Invalid email address"));
    };
    let domain_ok = domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains('@');
    if local.is_empty() || !domain_ok || email.chars().any(char::is_whitespace) {
        return Err(ApiError::bad_request("Invalid email address"));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() {
        return Err(ApiError::bad_request("Name cannot be empty"));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Name must be at most {} characters",
            MAX_NAME_LENGTH
        )));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// Create an account and log it in.
async fn register(
    State(state): State<AuthState>,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = request.email.trim();
    let name = request.name.trim();
    validate_email(email)?;
    validate_name(name)?;
    validate_password(&request.password)?;

    let password_hash = hash_password(&request.password).map_err(|e| {
        error!("{}", e);
        ApiError::internal("Failed to create account")
    })?;

    let id = uuid::Uuid::new_v4().to_string();
    if let Err(e) = state
        .db
        .users()
        .create(&id, email, name, &password_hash)
        .await
    {
        let duplicate = e
            .as_database_error()
            .is_some_and(|db| db.is_unique_violation());
        if duplicate {
            return Err(ApiError::conflict("Email already registered"));
        }
        return Err(ApiError::db_error("Failed to create user", e));
    }

    let user = state
        .db
        .users()
        .get_by_id(&id)
        .await
        .db_err("Failed to load user")?
        .ok_or_else(|| ApiError::internal("User vanished after creation"))?;

    info!(user_id = %user.id, "User registered");

    let pair = state.sessions.login(&user.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user,
            tokens: pair.into(),
        }),
    ))
}

/// Verify email and password, then start a session.
async fn login(
    State(state): State<AuthState>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(credentials) = state
        .db
        .users()
        .get_credentials_by_email(request.email.trim())
        .await
        .db_err("Failed to look up user")?
    else {
        verify_dummy_password(&request.password);
        return Err(ApiError::unauthorized("Invalid email or password"));
    };

    let valid = verify_password(&request.password, &credentials.password_hash).map_err(|e| {
        error!(user_id = %credentials.user.id, "{}", e);
        ApiError::internal("Failed to verify password")
    })?;
    if !valid {
        return Err(ApiError::unauthorized("Invalid email or password"));
    }

    let pair = state.sessions.login(&credentials.user.id).await?;

    Ok((
        StatusCode::OK,
        Json(AuthResponse {
            user: credentials.user,
            tokens: pair.into(),
        }),
    ))
}

/// Rotate a refresh token.
async fn refresh(
    State(state): State<AuthState>,
    Json(request): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let pair = state.sessions.refresh(&request.refresh_token).await?;
    Ok((StatusCode::OK, Json(TokenResponse::from(pair))))
}

/// Logout - revoke the presented refresh token. Malformed or missing bodies
/// are accepted so that a client can always log out.
async fn logout(State(state): State<AuthState>, body: Bytes) -> impl IntoResponse {
    if let Ok(request) = serde_json::from_slice::<RefreshRequest>(&body) {
        state.sessions.logout(&request.refresh_token).await;
    }

    (StatusCode::OK, Json(serde_json::json!({ "success": true })))
}

#[derive(Serialize)]
struct LogoutAllResponse {
    revoked: u64,
}

/// Revoke every session of the current user.
async fn logout_all(
    State(state): State<AuthState>,
    Auth(auth): Auth,
) -> Result<impl IntoResponse, ApiError> {
    let revoked = state.sessions.logout_all(&auth.user_id).await?;
    Ok((StatusCode::OK, Json(LogoutAllResponse { revoked })))
}

/// Current user profile.
async fn me(
    State(state): State<AuthState>,
    Auth(auth): Auth,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .users()
        .get_by_id(&auth.user_id)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok((StatusCode::OK, Json(user)))
}
