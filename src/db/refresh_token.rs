//! Refresh token storage for rotation and revocation.
//!
//! Only refresh tokens are stored, and only as SHA-256 digests of the raw token.
//! Access tokens are stateless and short-lived (15 minutes).

use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePool;

/// A stored refresh token record. Holds the digest, never the raw token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: i64,
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: String,
    pub revoked: bool,
    pub created_at: String,
}

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    id: i64,
    user_id: String,
    token_hash: String,
    expires_at: String,
    revoked: i32,
    created_at: String,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            token_hash: row.token_hash,
            expires_at: row.expires_at,
            revoked: row.revoked != 0,
            created_at: row.created_at,
        }
    }
}

/// Outcome of a successful rotation.
#[derive(Debug, Clone)]
pub struct RotatedToken {
    /// The consumed record, now revoked
    pub previous: RefreshTokenRecord,
    /// ID of the record inserted for the replacement token
    pub new_id: i64,
}

/// SHA-256 of a raw token as 64 lowercase hex characters.
pub fn hash_token(raw_token: &str) -> String {
    hex::encode(Sha256::digest(raw_token.as_bytes()))
}

/// Store for managing refresh token records.
pub struct RefreshTokenStore {
    pool: SqlitePool,
}

impl RefreshTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a newly issued refresh token. Returns the record ID.
    pub async fn create(
        &self,
        user_id: &str,
        raw_token: &str,
        expires_at: u64,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO refresh_tokens (user_id, token_hash, expires_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(hash_token(raw_token))
        .bind(timestamp_to_datetime(expires_at))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Find the record for a raw token if it is neither revoked nor expired at `now`.
    pub async fn find_active_by_raw_token(
        &self,
        raw_token: &str,
        now: u64,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let row: Option<RefreshTokenRow> = sqlx::query_as(
            "SELECT id, user_id, token_hash, expires_at, revoked, created_at FROM refresh_tokens WHERE token_hash = ? AND revoked = 0 AND expires_at > ?",
        )
        .bind(hash_token(raw_token))
        .bind(timestamp_to_datetime(now))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(RefreshTokenRecord::from))
    }

    /// Revoke a record. Returns false if it was already revoked (or missing).
    pub async fn revoke(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE id = ? AND revoked = 0")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Revoke every live record of a user (logout everywhere).
    pub async fn revoke_all_for_user(&self, user_id: &str) -> Result<u64, StoreError> {
        let result =
            sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE user_id = ? AND revoked = 0")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Consume `presented_token` and record `new_token` in one transaction.
    ///
    /// The consume is a single conditional update, so of two concurrent rotations
    /// of the same token at most one sees it active. Returns `None` when the
    /// presented token has no active record owned by `user_id`. If inserting the
    /// new record fails the consume is rolled back.
    pub async fn rotate(
        &self,
        presented_token: &str,
        user_id: &str,
        new_token: &str,
        new_expires_at: u64,
        now: u64,
    ) -> Result<Option<RotatedToken>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let consumed: Option<RefreshTokenRow> = sqlx::query_as(
            "UPDATE refresh_tokens SET revoked = 1 WHERE token_hash = ? AND user_id = ? AND revoked = 0 AND expires_at > ? RETURNING id, user_id, token_hash, expires_at, revoked, created_at",
        )
        .bind(hash_token(presented_token))
        .bind(user_id)
        .bind(timestamp_to_datetime(now))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(consumed) = consumed else {
            tx.rollback().await?;
            return Ok(None);
        };

        let inserted = sqlx::query(
            "INSERT INTO refresh_tokens (user_id, token_hash, expires_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(hash_token(new_token))
        .bind(timestamp_to_datetime(new_expires_at))
        .execute(&mut *tx)
        .await;

        let new_id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(e) => {
                tx.rollback().await?;
                return Err(e.into());
            }
        };

        tx.commit().await?;

        Ok(Some(RotatedToken {
            previous: consumed.into(),
            new_id,
        }))
    }

    /// List a user's live records, newest first.
    pub async fn list_active_for_user(
        &self,
        user_id: &str,
        now: u64,
    ) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        let rows: Vec<RefreshTokenRow> = sqlx::query_as(
            "SELECT id, user_id, token_hash, expires_at, revoked, created_at FROM refresh_tokens WHERE user_id = ? AND revoked = 0 AND expires_at > ? ORDER BY id DESC",
        )
        .bind(user_id)
        .bind(timestamp_to_datetime(now))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RefreshTokenRecord::from).collect())
    }

    /// Delete records that expired before `now`.
    pub async fn delete_expired(&self, now: u64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= ?")
            .bind(timestamp_to_datetime(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Errors from the refresh token store.
#[derive(Debug)]
pub enum StoreError {
    /// A record with the same token hash already exists
    Conflict,
    /// Any other database failure
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        let unique_violation = e
            .as_database_error()
            .is_some_and(|db| db.is_unique_violation());
        if unique_violation {
            StoreError::Conflict
        } else {
            StoreError::Database(e)
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Conflict => write!(f, "Refresh token hash already exists"),
            StoreError::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// Convert a Unix timestamp to an ISO 8601 datetime string for SQLite.
pub fn timestamp_to_datetime(timestamp: u64) -> String {
    // Convert to ISO 8601 format: YYYY-MM-DD HH:MM:SS
    let days_since_epoch = timestamp / 86400;
    let time_of_day = timestamp % 86400;
    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;

    let (year, month, day) = days_to_ymd(days_since_epoch as i64);

    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year, month, day, hours, minutes, seconds
    )
}

/// Convert days since Unix epoch to year, month, day.
fn days_to_ymd(days: i64) -> (i32, u32, u32) {
    // Algorithm from http://howardhinnant.github.io/date_algorithms.html
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y as i32, m, d)
}
