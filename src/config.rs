use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::storage::CoverSettings;

const WEAK_SECRETS: [&str; 2] = ["", "change-me"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has an invalid value: {value}")]
    Invalid { var: &'static str, value: String },

    #[error("JWT_SECRET must be set to a real secret")]
    WeakSecret,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub pdf_dir: PathBuf,
    pub cover_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            idle_timeout: Duration::from_millis(30_000),
            acquire_timeout: Duration::from_millis(5_000),
        }
    }
}

/// Process-wide settings, resolved once at startup and managed as state.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub cookie_name: String,
    pub local_database_url: String,
    pub legacy_database_url: String,
    pub storage: StorageConfig,
    pub pool: PoolConfig,
    pub bcrypt_cost: u32,
    pub default_user_password: String,
    pub upload_limit_bytes: u64,
    pub cover: CoverSettings,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = optional("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if WEAK_SECRETS.contains(&jwt_secret.trim()) {
            return Err(ConfigError::WeakSecret);
        }

        let ttl_raw = optional("JWT_EXPIRES_IN").unwrap_or_else(|| "7d".to_string());
        let token_ttl = parse_duration(&ttl_raw).ok_or(ConfigError::Invalid {
            var: "JWT_EXPIRES_IN",
            value: ttl_raw,
        })?;

        let upload_limit_mb: u64 = number("MAX_UPLOAD_MB", 50)?;

        Ok(Self {
            jwt_secret,
            token_ttl,
            cookie_name: optional("JWT_COOKIE_NAME").unwrap_or_else(|| "auth_token".to_string()),
            local_database_url: required("DATABASE_URL_BIBLIOTECA")?,
            legacy_database_url: required("DATABASE_URL_CEAD")?,
            storage: StorageConfig {
                pdf_dir: optional("STORAGE_PDF_DIR")
                    .unwrap_or_else(|| "storage/pdfs".to_string())
                    .into(),
                cover_dir: optional("STORAGE_COVER_DIR")
                    .unwrap_or_else(|| "storage/covers".to_string())
                    .into(),
            },
            pool: PoolConfig {
                max_connections: number("DB_POOL_MAX", 10)?,
                idle_timeout: Duration::from_millis(number("DB_IDLE_TIMEOUT_MS", 30_000)?),
                acquire_timeout: Duration::from_millis(number("DB_CONN_TIMEOUT_MS", 5_000)?),
            },
            bcrypt_cost: number("BCRYPT_COST", bcrypt::DEFAULT_COST)?,
            default_user_password: optional("DEFAULT_USER_PASSWORD")
                .unwrap_or_else(|| "123456".to_string()),
            upload_limit_bytes: upload_limit_mb * 1024 * 1024,
            cover: CoverSettings {
                max_width: number("COVER_MAX_WIDTH", 1200)?,
                quality: number("COVER_QUALITY", 80)?,
            },
        })
    }
}

fn optional(var: &'static str) -> Option<String> {
    dotenvy::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    optional(var).ok_or(ConfigError::Missing(var))
}

fn number<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

/// Parses `<n>`, `<n>s`, `<n>m`, `<n>h` or `<n>d`. A bare number is seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let amount: u64 = digits.parse().ok()?;

    let seconds = match unit {
        "" | "s" => amount,
        "m" => amount.checked_mul(60)?,
        "h" => amount.checked_mul(3_600)?,
        "d" => amount.checked_mul(86_400)?,
        _ => return None,
    };

    (seconds > 0).then(|| Duration::from_secs(seconds))
}
