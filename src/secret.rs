//! Signing secret resolution.
//!
//! The secret is resolved once at startup and handed to [`TokenCodec`](crate::jwt::TokenCodec)
//! explicitly. Production deployments refuse to start with a missing, short, or
//! placeholder secret; every other environment falls back to a fixed development value.

use std::fmt;

/// Minimum secret length (in characters) accepted in production.
pub const MIN_SECRET_LENGTH: usize = 32;

/// Secret used outside production when none is supplied.
pub const DEVELOPMENT_FALLBACK_SECRET: &str = "dev-secret-change-in-production";

/// Substrings that mark a secret as a copy-pasted placeholder (matched case-insensitively).
const PLACEHOLDER_MARKERS: &[&str] = &["dev", "change", "secret-key", "default", "placeholder"];

/// Deployment classification, read from `APP_ENV`.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    #[value(alias = "dev")]
    Development,
    Test,
    #[value(alias = "prod")]
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

/// HMAC key material for token signing. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningSecret(String);

impl SigningSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret(<redacted>)")
    }
}

/// Resolve the signing secret for the given environment.
///
/// Empty strings count as "not supplied".
pub fn resolve_signing_secret(
    environment: Environment,
    supplied: Option<String>,
) -> Result<SigningSecret, ConfigError> {
    let supplied = supplied.filter(|s| !s.is_empty());

    if !environment.is_production() {
        return Ok(match supplied {
            Some(secret) => SigningSecret::new(secret),
            None => {
                tracing::warn!(
                    environment = ?environment,
                    "No JWT secret supplied, using the development fallback secret"
                );
                SigningSecret::new(DEVELOPMENT_FALLBACK_SECRET)
            }
        });
    }

    let secret = supplied.ok_or(ConfigError::MissingSecret)?;

    let lowered = secret.to_lowercase();
    if let Some(marker) = PLACEHOLDER_MARKERS
        .iter()
        .copied()
        .find(|marker| lowered.contains(marker))
    {
        return Err(ConfigError::PlaceholderSecret { marker });
    }

    let length = secret.chars().count();
    if length < MIN_SECRET_LENGTH {
        return Err(ConfigError::SecretTooShort { length });
    }

    Ok(SigningSecret::new(secret))
}

/// Fatal startup configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No secret supplied in production
    MissingSecret,
    /// Secret shorter than [`MIN_SECRET_LENGTH`]
    SecretTooShort { length: usize },
    /// Secret contains a well-known placeholder substring
    PlaceholderSecret { marker: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingSecret => write!(
                f,
                "JWT secret is required in production. Set JWT_SECRET or use --jwt-secret-file"
            ),
            ConfigError::SecretTooShort { length } => write!(
                f,
                "JWT secret is {} characters long, production requires at least {}",
                length, MIN_SECRET_LENGTH
            ),
            ConfigError::PlaceholderSecret { marker } => write!(
                f,
                "JWT secret looks like a placeholder (contains \"{}\"), refusing to start in production",
                marker
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
