//! Rate limiting for authentication endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down password
//! guessing and refresh token brute forcing.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{net::SocketAddr, num::NonZeroU32, sync::Arc};

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Default number of credential attempts (register/login) per minute per IP.
pub const DEFAULT_AUTH_RATE_LIMIT: u32 = 20;

/// Rate limiting configuration for authentication endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Per-IP limiter for register and login
    pub credentials: Arc<IpLimiter>,
    /// Per-IP limiter for token refresh (three times the credential quota)
    pub refresh: Arc<IpLimiter>,
}

impl RateLimitConfig {
    /// Create limiters allowing `per_minute` credential attempts per IP.
    pub fn new(per_minute: u32) -> Self {
        let credentials = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
        let refresh = credentials.saturating_mul(NonZeroU32::new(3).unwrap_or(NonZeroU32::MIN));

        Self {
            credentials: Arc::new(RateLimiter::keyed(Quota::per_minute(credentials))),
            refresh: Arc::new(RateLimiter::keyed(Quota::per_minute(refresh))),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_RATE_LIMIT)
    }
}

/// Client IP from the connection.
fn client_ip(request: &Request) -> Option<String> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
}

fn check(limiter: &IpLimiter, request: &Request) -> Result<(), Response> {
    let Some(ip) = client_ip(request) else {
        return Err((StatusCode::FORBIDDEN, "Unable to determine client IP.").into_response());
    };

    limiter.check_key(&ip).map_err(|_| {
        tracing::warn!(ip = %ip, path = %request.uri().path(), "Rate limit exceeded");
        (
            StatusCode::TOO_MANY_REQUESTS,
            "Too many authentication attempts. Please wait before trying again.",
        )
            .into_response()
    })
}

/// Middleware for rate limiting register and login.
pub async fn rate_limit_credentials(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    match check(&config.credentials, &request) {
        Ok(()) => next.run(request).await,
        Err(response) => response,
    }
}

/// Middleware for rate limiting token refresh.
pub async fn rate_limit_refresh(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    match check(&config.refresh, &request) {
        Ok(()) => next.run(request).await,
        Err(response) => response,
    }
}
