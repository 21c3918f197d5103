//! Per-request access token authentication.
//!
//! Access tokens are verified by signature and expiry alone; the refresh token
//! store is never consulted here. A revoked session therefore keeps working
//! until its access token expires (at most 15 minutes).

mod cookie;
mod errors;
mod extractors;
mod state;

pub use cookie::{ACCESS_COOKIE_NAME, bearer_token, get_cookie, presented_access_token};
pub use errors::AuthError;
pub use extractors::{Auth, AuthenticatedUser, authenticate, require_auth};
pub use state::HasAuthBackend;
