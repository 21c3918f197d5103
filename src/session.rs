//! Session lifecycle: login, refresh token rotation, and logout.
//!
//! Each refresh token moves from active to exactly one terminal state:
//! rotated (consumed by `refresh`), revoked (`logout`), or expired. Rotated and
//! revoked tokens are rejected the same way. Presenting a correctly signed
//! refresh token that has no active record means it was already consumed, which
//! is treated as possible theft.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::db::{Database, StoreError};
use crate::jwt::{TokenCodec, TokenError, TokenKind, TokenPair, unix_now};

/// Tunable session behavior.
#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    /// Revoke every session of a user when one of their refresh tokens is replayed.
    pub revoke_all_on_reuse: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            revoke_all_on_reuse: true,
        }
    }
}

/// Issues, rotates, and revokes sessions.
#[derive(Clone)]
pub struct SessionService {
    db: Database,
    codec: Arc<TokenCodec>,
    policy: SessionPolicy,
}

impl SessionService {
    pub fn new(db: Database, codec: Arc<TokenCodec>, policy: SessionPolicy) -> Self {
        Self { db, codec, policy }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Start a fresh session for an already authenticated user.
    pub async fn login(&self, user_id: &str) -> Result<TokenPair, SessionError> {
        let store = &self.db.refresh_tokens();

        let (_, pair) = persist_fresh_pair(
            user_id,
            || self.codec.issue_pair(user_id),
            move |token, expires_at| async move { store.create(user_id, &token, expires_at).await },
        )
        .await?;

        info!(user_id = %user_id, "Session started");
        Ok(pair)
    }

    /// Exchange a refresh token for a new pair, consuming the presented token.
    pub async fn refresh(&self, presented: &str) -> Result<TokenPair, SessionError> {
        // One clock reading for both the signature expiry and the record expiry
        let now = unix_now()?;
        let claims = self.codec.verify_at(presented, TokenKind::Refresh, now)?;
        let user_id = claims.sub.as_str();
        let store = &self.db.refresh_tokens();

        let (rotated, pair) = persist_fresh_pair(
            user_id,
            || self.codec.issue_pair(user_id),
            move |token, expires_at| async move {
                store
                    .rotate(presented, user_id, &token, expires_at, now)
                    .await
            },
        )
        .await?;

        match rotated {
            Some(rotated) => {
                debug!(
                    user_id = %user_id,
                    previous_record = rotated.previous.id,
                    new_record = rotated.new_id,
                    "Refresh token rotated"
                );
                Ok(pair)
            }
            None => {
                self.handle_reuse(user_id).await;
                Err(SessionError::TokenReusedOrInvalid)
            }
        }
    }

    async fn handle_reuse(&self, user_id: &str) {
        warn!(
            user_id = %user_id,
            revoke_all = self.policy.revoke_all_on_reuse,
            "Refresh token presented after rotation or revocation"
        );

        if !self.policy.revoke_all_on_reuse {
            return;
        }

        match self.db.refresh_tokens().revoke_all_for_user(user_id).await {
            Ok(count) => warn!(
                user_id = %user_id,
                revoked = count,
                "Revoked all sessions after refresh token reuse"
            ),
            Err(e) => error!(user_id = %user_id, error = %e, "Failed to revoke sessions after reuse"),
        }
    }

    /// End the session of a refresh token. Never fails: unusable, unknown, or
    /// already revoked tokens are ignored.
    pub async fn logout(&self, presented: &str) {
        let now = match unix_now() {
            Ok(now) => now,
            Err(e) => {
                error!(error = %e, "Logout failed");
                return;
            }
        };

        let claims = match self.codec.verify_at(presented, TokenKind::Refresh, now) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(error = %e, "Logout with unusable refresh token");
                return;
            }
        };

        let store = self.db.refresh_tokens();
        match store.find_active_by_raw_token(presented, now).await {
            Ok(Some(record)) => match store.revoke(record.id).await {
                Ok(_) => info!(user_id = %record.user_id, "Session ended"),
                Err(e) => error!(user_id = %record.user_id, error = %e, "Failed to revoke refresh token"),
            },
            Ok(None) => debug!(user_id = %claims.sub, "Logout with inactive refresh token"),
            Err(e) => error!(user_id = %claims.sub, error = %e, "Failed to look up refresh token"),
        }
    }

    /// Revoke every session of a user. Returns how many were live.
    pub async fn logout_all(&self, user_id: &str) -> Result<u64, SessionError> {
        let count = self.db.refresh_tokens().revoke_all_for_user(user_id).await?;
        info!(user_id = %user_id, revoked = count, "All sessions ended");
        Ok(count)
    }
}

/// Mint a pair with `mint` and hand its refresh token to `persist`. A hash
/// collision with an existing record is retried once with a freshly minted
/// pair; a second collision is returned as `StoreError::Conflict`.
async fn persist_fresh_pair<T, Fut>(
    user_id: &str,
    mut mint: impl FnMut() -> Result<TokenPair, TokenError>,
    persist: impl Fn(String, u64) -> Fut,
) -> Result<(T, TokenPair), SessionError>
where
    Fut: Future<Output = Result<T, StoreError>>,
{
    let pair = mint()?;
    match persist(pair.refresh.token.clone(), pair.refresh.expires_at).await {
        Ok(value) => return Ok((value, pair)),
        Err(StoreError::Conflict) => {
            warn!(user_id = %user_id, "Refresh token hash collision, retrying with a fresh token");
        }
        Err(e) => return Err(e.into()),
    }

    let pair = mint()?;
    let value = persist(pair.refresh.token.clone(), pair.refresh.expires_at).await?;
    Ok((value, pair))
}

/// Session failures. None of them carry token material.
#[derive(Debug)]
pub enum SessionError {
    /// Malformed, forged, or wrong-kind refresh token
    TokenInvalid,
    /// Refresh token past its expiry
    TokenExpired,
    /// Correctly signed refresh token with no active record
    TokenReusedOrInvalid,
    /// Token could not be issued
    Token(TokenError),
    /// Storage failure
    Store(StoreError),
}

impl From<TokenError> for SessionError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Invalid => SessionError::TokenInvalid,
            TokenError::Expired => SessionError::TokenExpired,
            other => SessionError::Token(other),
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        SessionError::Store(e)
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::TokenInvalid => write!(f, "Invalid refresh token"),
            SessionError::TokenExpired => write!(f, "Refresh token expired"),
            SessionError::TokenReusedOrInvalid => {
                write!(f, "Refresh token already used or revoked")
            }
            SessionError::Token(e) => write!(f, "{}", e),
            SessionError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SessionError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::{REFRESH_TOKEN_TTL, TokenKind};

    async fn setup(policy: SessionPolicy) -> (SessionService, Database) {
        let db = Database::open(":memory:").await.unwrap();
        db.users()
            .create("u1", "u1@example.com", "User One", "hash")
            .await
            .unwrap();
        db.users()
            .create("u2", "u2@example.com", "User Two", "hash")
            .await
            .unwrap();
        let codec = Arc::new(TokenCodec::from_bytes(b"session-test-secret"));
        (SessionService::new(db.clone(), codec, policy), db)
    }

    fn keep_sessions() -> SessionPolicy {
        SessionPolicy {
            revoke_all_on_reuse: false,
        }
    }

    async fn active_count(db: &Database, user_id: &str) -> usize {
        db.refresh_tokens()
            .list_active_for_user(user_id, unix_now().unwrap())
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn test_login_issues_verifiable_pair() {
        let (sessions, db) = setup(SessionPolicy::default()).await;

        let pair = sessions.login("u1").await.unwrap();

        let claims = sessions
            .codec()
            .verify(&pair.access.token, TokenKind::Access)
            .unwrap();
        assert_eq!(claims.sub, "u1");
        let claims = sessions
            .codec()
            .verify(&pair.refresh.token, TokenKind::Refresh)
            .unwrap();
        assert_eq!(claims.sub, "u1");

        assert_eq!(active_count(&db, "u1").await, 1);
    }

    #[tokio::test]
    async fn test_refresh_rotates_tokens() {
        let (sessions, db) = setup(SessionPolicy::default()).await;
        let first = sessions.login("u1").await.unwrap();

        let second = sessions.refresh(&first.refresh.token).await.unwrap();

        assert_ne!(second.access.token, first.access.token);
        assert_ne!(second.refresh.token, first.refresh.token);
        assert_eq!(active_count(&db, "u1").await, 1);
    }

    #[tokio::test]
    async fn test_end_to_end_rotation_with_sessions_kept_on_reuse() {
        // Policy decision: with revoke-all disabled, a replay only fails itself
        let (sessions, _db) = setup(keep_sessions()).await;

        let first = sessions.login("u1").await.unwrap();
        let second = sessions.refresh(&first.refresh.token).await.unwrap();
        assert_ne!(second.access.token, first.access.token);
        assert_ne!(second.refresh.token, first.refresh.token);

        let replay = sessions.refresh(&first.refresh.token).await;
        assert!(matches!(replay, Err(SessionError::TokenReusedOrInvalid)));

        let third = sessions.refresh(&second.refresh.token).await.unwrap();
        assert_ne!(third.refresh.token, second.refresh.token);
    }

    #[tokio::test]
    async fn test_reuse_revokes_all_sessions_by_default() {
        // Policy decision: the default treats a replay as a compromised account
        let (sessions, db) = setup(SessionPolicy::default()).await;

        let laptop = sessions.login("u1").await.unwrap();
        let phone = sessions.login("u1").await.unwrap();
        let other_user = sessions.login("u2").await.unwrap();

        let rotated = sessions.refresh(&laptop.refresh.token).await.unwrap();

        let replay = sessions.refresh(&laptop.refresh.token).await;
        assert!(matches!(replay, Err(SessionError::TokenReusedOrInvalid)));

        assert_eq!(active_count(&db, "u1").await, 0);
        assert!(matches!(
            sessions.refresh(&rotated.refresh.token).await,
            Err(SessionError::TokenReusedOrInvalid)
        ));
        assert!(matches!(
            sessions.refresh(&phone.refresh.token).await,
            Err(SessionError::TokenReusedOrInvalid)
        ));

        // Other users are untouched
        assert!(sessions.refresh(&other_user.refresh.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_reuse_keeps_other_sessions_when_disabled() {
        let (sessions, db) = setup(keep_sessions()).await;

        let laptop = sessions.login("u1").await.unwrap();
        sessions.login("u1").await.unwrap();
        sessions.refresh(&laptop.refresh.token).await.unwrap();

        assert!(sessions.refresh(&laptop.refresh.token).await.is_err());
        assert_eq!(active_count(&db, "u1").await, 2);
    }

    #[tokio::test]
    async fn test_refresh_rejects_access_token() {
        let (sessions, _db) = setup(SessionPolicy::default()).await;
        let pair = sessions.login("u1").await.unwrap();

        let result = sessions.refresh(&pair.access.token).await;
        assert!(matches!(result, Err(SessionError::TokenInvalid)));
    }

    #[tokio::test]
    async fn test_refresh_rejects_garbage_and_foreign_tokens() {
        let (sessions, _db) = setup(SessionPolicy::default()).await;

        assert!(matches!(
            sessions.refresh("not.a.jwt").await,
            Err(SessionError::TokenInvalid)
        ));

        let foreign = TokenCodec::from_bytes(b"some-other-secret")
            .issue("u1", TokenKind::Refresh, REFRESH_TOKEN_TTL)
            .unwrap();
        assert!(matches!(
            sessions.refresh(&foreign.token).await,
            Err(SessionError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn test_refresh_expired_token() {
        let (sessions, db) = setup(SessionPolicy::default()).await;
        let now = unix_now().unwrap();

        let expired = sessions
            .codec()
            .issue_at("u1", TokenKind::Refresh, now - REFRESH_TOKEN_TTL.as_secs() - 10, REFRESH_TOKEN_TTL)
            .unwrap();
        db.refresh_tokens()
            .create("u1", &expired.token, expired.expires_at)
            .await
            .unwrap();

        let result = sessions.refresh(&expired.token).await;
        assert!(matches!(result, Err(SessionError::TokenExpired)));
    }

    #[tokio::test]
    async fn test_signed_token_without_record_is_reuse() {
        let (sessions, _db) = setup(keep_sessions()).await;

        // Correctly signed but never persisted
        let orphan = sessions
            .codec()
            .issue("u1", TokenKind::Refresh, REFRESH_TOKEN_TTL)
            .unwrap();

        let result = sessions.refresh(&orphan.token).await;
        assert!(matches!(result, Err(SessionError::TokenReusedOrInvalid)));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let (sessions, db) = setup(SessionPolicy::default()).await;
        let pair = sessions.login("u1").await.unwrap();

        sessions.logout(&pair.refresh.token).await;
        sessions.logout(&pair.refresh.token).await;
        sessions.logout("garbage").await;
        sessions.logout(&pair.access.token).await;

        assert_eq!(active_count(&db, "u1").await, 0);
        assert!(matches!(
            sessions.refresh(&pair.refresh.token).await,
            Err(SessionError::TokenReusedOrInvalid)
        ));
    }

    #[tokio::test]
    async fn test_logout_only_ends_one_session() {
        let (sessions, db) = setup(SessionPolicy::default()).await;
        let laptop = sessions.login("u1").await.unwrap();
        let phone = sessions.login("u1").await.unwrap();

        sessions.logout(&laptop.refresh.token).await;

        assert_eq!(active_count(&db, "u1").await, 1);
        assert!(sessions.refresh(&phone.refresh.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_logout_all() {
        let (sessions, db) = setup(SessionPolicy::default()).await;
        sessions.login("u1").await.unwrap();
        sessions.login("u1").await.unwrap();
        sessions.login("u2").await.unwrap();

        assert_eq!(sessions.logout_all("u1").await.unwrap(), 2);
        assert_eq!(active_count(&db, "u1").await, 0);
        assert_eq!(active_count(&db, "u2").await, 1);
    }

    #[tokio::test]
    async fn test_refresh_in_expiry_second_is_expired_not_reuse() {
        let (sessions, db) = setup(SessionPolicy::default()).await;
        let other = sessions.login("u1").await.unwrap();
        let now = unix_now().unwrap();

        // exp lands exactly on the current second
        let ending = sessions
            .codec()
            .issue_at(
                "u1",
                TokenKind::Refresh,
                now - REFRESH_TOKEN_TTL.as_secs(),
                REFRESH_TOKEN_TTL,
            )
            .unwrap();
        db.refresh_tokens()
            .create("u1", &ending.token, ending.expires_at)
            .await
            .unwrap();

        let result = sessions.refresh(&ending.token).await;
        assert!(matches!(result, Err(SessionError::TokenExpired)));

        // Not treated as a replay, so the other session survives
        assert_eq!(active_count(&db, "u1").await, 1);
        assert!(sessions.refresh(&other.refresh.token).await.is_ok());
    }

    /// File-backed database removed on drop.
    struct TempDbFile(std::path::PathBuf);

    impl TempDbFile {
        fn new() -> Self {
            let name = format!("habitcraft-session-{}.db", uuid::Uuid::new_v4());
            Self(std::env::temp_dir().join(name))
        }

        fn path(&self) -> &str {
            self.0.to_str().unwrap()
        }
    }

    impl Drop for TempDbFile {
        fn drop(&mut self) {
            for suffix in ["", "-wal", "-shm", "-journal"] {
                std::fs::remove_file(format!("{}{}", self.0.display(), suffix)).ok();
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_has_single_winner() {
        let file = TempDbFile::new();
        let db = Database::open(file.path()).await.unwrap();
        db.users()
            .create("u1", "u1@example.com", "User One", "hash")
            .await
            .unwrap();
        let codec = Arc::new(TokenCodec::from_bytes(b"session-test-secret"));
        let sessions = SessionService::new(db.clone(), codec, keep_sessions());
        let pair = sessions.login("u1").await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sessions = sessions.clone();
                let token = pair.refresh.token.clone();
                tokio::spawn(async move { sessions.refresh(&token).await })
            })
            .collect();

        let mut winners = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(pair) => winners.push(pair),
                Err(SessionError::TokenReusedOrInvalid) => {}
                Err(e) => panic!("unexpected refresh failure: {}", e),
            }
        }

        assert_eq!(winners.len(), 1);
        assert_eq!(active_count(&db, "u1").await, 1);
        assert!(sessions.refresh(&winners[0].refresh.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_login_conflict_retried_with_fresh_pair() {
        let (sessions, db) = setup(SessionPolicy::default()).await;
        let existing = sessions.login("u1").await.unwrap();
        let store = &db.refresh_tokens();

        let mut minted = 0;
        let (_, pair) = persist_fresh_pair(
            "u1",
            || {
                minted += 1;
                if minted == 1 {
                    Ok(existing.clone())
                } else {
                    sessions.codec().issue_pair("u1")
                }
            },
            move |token, expires_at| async move { store.create("u1", &token, expires_at).await },
        )
        .await
        .unwrap();

        assert_eq!(minted, 2);
        assert_ne!(pair.refresh.token, existing.refresh.token);
        assert_eq!(active_count(&db, "u1").await, 2);
    }

    #[tokio::test]
    async fn test_second_conflict_is_reported() {
        let (sessions, db) = setup(SessionPolicy::default()).await;
        let existing = sessions.login("u1").await.unwrap();
        let store = &db.refresh_tokens();

        let result = persist_fresh_pair(
            "u1",
            || Ok(existing.clone()),
            move |token, expires_at| async move { store.create("u1", &token, expires_at).await },
        )
        .await;

        assert!(matches!(
            result,
            Err(SessionError::Store(StoreError::Conflict))
        ));
        assert_eq!(active_count(&db, "u1").await, 1);
    }

    #[tokio::test]
    async fn test_rotation_conflict_retried_after_rollback() {
        let (sessions, db) = setup(keep_sessions()).await;
        let presented = sessions.login("u1").await.unwrap();
        let taken = sessions.login("u1").await.unwrap();
        let store = &db.refresh_tokens();
        let now = unix_now().unwrap();
        let presented_token = presented.refresh.token.as_str();

        let mut minted = 0;
        let (rotated, pair) = persist_fresh_pair(
            "u1",
            || {
                minted += 1;
                if minted == 1 {
                    Ok(taken.clone())
                } else {
                    sessions.codec().issue_pair("u1")
                }
            },
            move |token, expires_at| async move {
                store
                    .rotate(presented_token, "u1", &token, expires_at, now)
                    .await
            },
        )
        .await
        .unwrap();

        assert_eq!(minted, 2);
        assert!(rotated.is_some());
        assert_ne!(pair.refresh.token, taken.refresh.token);

        // Consumed exactly once: the collided attempt was rolled back
        assert!(matches!(
            sessions.refresh(&presented.refresh.token).await,
            Err(SessionError::TokenReusedOrInvalid)
        ));
        assert!(sessions.refresh(&pair.refresh.token).await.is_ok());
        assert!(sessions.refresh(&taken.refresh.token).await.is_ok());
    }
}
