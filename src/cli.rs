//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::db::Database;
use crate::rate_limit::DEFAULT_AUTH_RATE_LIMIT;
use crate::secret::{Environment, SigningSecret, resolve_signing_secret};
use crate::session::SessionPolicy;
use clap::Parser;
use tracing::{error, info};

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "HabitCraft",
    about = "Habit tracker API with token based sessions"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "DATABASE_PATH", default_value = "habitcraft.db")]
    pub database: String,

    /// Deployment environment. Production requires a strong JWT secret
    #[arg(short, long, env = "APP_ENV", default_value = "development")]
    pub env: Environment,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Only revoke the replayed token instead of every session of its owner
    #[arg(long)]
    pub keep_sessions_on_reuse: bool,

    /// Register/login attempts allowed per minute per IP (refresh gets three times as many)
    #[arg(long, default_value_t = DEFAULT_AUTH_RATE_LIMIT)]
    pub auth_rate_limit: u32,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Read the raw JWT secret from the environment variable or file.
/// Returns `Err(())` after logging if the file cannot be read.
fn read_jwt_secret(jwt_secret_file: Option<&str>) -> Result<Option<String>, ()> {
    if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        return Ok(Some(secret));
    }

    match jwt_secret_file {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                Err(())
            }
        },
        None => Ok(None),
    }
}

/// Load and validate the signing secret for the given environment.
/// Returns None and logs an error if the secret is unusable.
pub fn load_signing_secret(
    environment: Environment,
    jwt_secret_file: Option<&str>,
) -> Option<SigningSecret> {
    let supplied = read_jwt_secret(jwt_secret_file).ok()?;

    match resolve_signing_secret(environment, supplied) {
        Ok(secret) => Some(secret),
        Err(e) => {
            error!(environment = ?environment, "{}", e);
            None
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    db: Database,
    secret: SigningSecret,
    keep_sessions_on_reuse: bool,
    auth_rate_limit: u32,
) -> ServerConfig {
    ServerConfig {
        db,
        secret,
        policy: SessionPolicy {
            revoke_all_on_reuse: !keep_sessions_on_reuse,
        },
        auth_rate_limit,
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
