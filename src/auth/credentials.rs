use sqlx::SqlitePool;
use tracing::{info, instrument};

use crate::error::AppError;

use super::UserStatus;

/// Where a set of credentials was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialOrigin {
    Local { user_id: String, status: UserStatus },
    Legacy,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub code: String,
    pub name: String,
    pub password_hash: String,
    pub origin: CredentialOrigin,
}

/// A store that can answer "who owns this login code".
#[rocket::async_trait]
pub trait CredentialSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn find(&self, code: &str) -> Result<Option<Credentials>, AppError>;
}

#[derive(sqlx::FromRow)]
struct DbLocalCredentials {
    id: Option<String>,
    code: Option<String>,
    name: Option<String>,
    password_hash_local: Option<String>,
    status: Option<String>,
}

#[derive(sqlx::FromRow)]
struct DbLegacyCredentials {
    code: Option<String>,
    name: Option<String>,
    password_hash: Option<String>,
}

/// The owned Biblioteca user table.
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[rocket::async_trait]
impl CredentialSource for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    #[instrument(skip(self))]
    async fn find(&self, code: &str) -> Result<Option<Credentials>, AppError> {
        info!("Looking up local credentials");
        let row = sqlx::query_as::<_, DbLocalCredentials>(
            "SELECT id, code, name, password_hash_local, status FROM users WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status = row.status.unwrap_or_default();
        Ok(Some(Credentials {
            code: row.code.unwrap_or_default(),
            name: row.name.unwrap_or_default(),
            password_hash: row.password_hash_local.unwrap_or_default(),
            origin: CredentialOrigin::Local {
                user_id: row.id.unwrap_or_default(),
                status: status
                    .parse()
                    .map_err(|_| AppError::Internal(format!("Unknown stored status: {}", status)))?,
            },
        }))
    }
}

/// The external, read-only CEAD account table.
#[derive(Clone)]
pub struct LegacyStore {
    pool: SqlitePool,
}

impl LegacyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[rocket::async_trait]
impl CredentialSource for LegacyStore {
    fn name(&self) -> &'static str {
        "legacy"
    }

    #[instrument(skip(self))]
    async fn find(&self, code: &str) -> Result<Option<Credentials>, AppError> {
        info!("Looking up legacy credentials");
        let row = sqlx::query_as::<_, DbLegacyCredentials>(
            "SELECT code, name, password_hash FROM cead_users WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Credentials {
            code: row.code.unwrap_or_default(),
            name: row.name.unwrap_or_default(),
            password_hash: row.password_hash.unwrap_or_default(),
            origin: CredentialOrigin::Legacy,
        }))
    }
}
