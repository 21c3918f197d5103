mod auth;
mod error;
mod health;

use axum::Router;
use std::sync::Arc;

use crate::db::Database;
use crate::rate_limit::RateLimitConfig;
use crate::session::SessionService;

pub use auth::AuthState;
pub use error::{ApiError, ResultExt};
pub use health::health;

/// Create the API router.
pub fn create_api_router(
    db: Database,
    sessions: SessionService,
    rate_limit: Arc<RateLimitConfig>,
) -> Router {
    let auth_state = auth::AuthState { db, sessions };

    Router::new().nest("/auth", auth::router(auth_state, rate_limit))
}
