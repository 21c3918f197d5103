//! JWT token generation and validation.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::secret::SigningSecret;

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Short-lived access token (15 minutes) - stateless, never stored
    Access,
    /// Long-lived refresh token (7 days) - tracked in the database by hash
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// JWT claims shared by both token kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user UUID)
    pub sub: String,
    /// Token type
    #[serde(rename = "typ")]
    pub kind: TokenKind,
    /// JWT ID, makes two tokens minted in the same second distinct
    pub jti: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Access token lifetime: 15 minutes
pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// Refresh token lifetime: 7 days
pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A freshly signed token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The JWT token string
    pub token: String,
    /// JWT ID
    pub jti: String,
    /// Issued at timestamp (Unix seconds)
    pub issued_at: u64,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
}

impl IssuedToken {
    /// Lifetime in seconds.
    pub fn duration(&self) -> u64 {
        self.expires_at.saturating_sub(self.issued_at)
    }
}

/// Access and refresh token minted together.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

/// Signs and verifies tokens with a single symmetric secret.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenCodec {
    pub fn new(secret: &SigningSecret) -> Self {
        Self::from_bytes(secret.as_bytes())
    }

    pub fn from_bytes(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Sign a token of the given kind for a user, valid for `ttl` from now.
    pub fn issue(
        &self,
        user_id: &str,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(user_id, kind, unix_now()?, ttl)
    }

    /// Sign a token with an explicit issue time.
    pub fn issue_at(
        &self,
        user_id: &str,
        kind: TokenKind,
        issued_at: u64,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        let jti = uuid::Uuid::new_v4().to_string();
        let exp = issued_at + ttl.as_secs();

        let claims = Claims {
            sub: user_id.to_string(),
            kind,
            jti: jti.clone(),
            iat: issued_at,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(TokenError::Encoding)?;

        Ok(IssuedToken {
            token,
            jti,
            issued_at,
            expires_at: exp,
        })
    }

    /// Issue an access and refresh token with the default lifetimes.
    pub fn issue_pair(&self, user_id: &str) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access: self.issue(user_id, TokenKind::Access, ACCESS_TOKEN_TTL)?,
            refresh: self.issue(user_id, TokenKind::Refresh, REFRESH_TOKEN_TTL)?,
        })
    }

    /// Validate and decode a token, requiring it to be of `kind`.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        self.verify_at(token, kind, unix_now()?)
    }

    /// Validate a token against an explicit clock.
    ///
    /// Signature and kind are checked before expiry, so a forged or wrong-kind
    /// token is always `Invalid`. A token is expired from its `exp` second on,
    /// matching the store's `expires_at > now` notion of an active record.
    pub fn verify_at(
        &self,
        token: &str,
        kind: TokenKind,
        now: u64,
    ) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|_| TokenError::Invalid)?
            .claims;

        if claims.kind != kind {
            return Err(TokenError::Invalid);
        }

        if claims.exp <= now {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> Result<u64, TokenError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| TokenError::TimeError)
}

/// Errors that can occur during JWT operations.
#[derive(Debug)]
pub enum TokenError {
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// Malformed, badly signed, or of the wrong kind
    Invalid,
    /// Signature is good but the token is past its expiry
    Expired,
    /// System time error
    TimeError,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            TokenError::Invalid => write!(f, "Invalid token"),
            TokenError::Expired => write!(f, "Token expired"),
            TokenError::TimeError => write!(f, "System time error"),
        }
    }
}

impl std::error::Error for TokenError {}
