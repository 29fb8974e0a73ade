use rocket::tokio;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{Instrument, debug, info_span, warn};

use crate::db::admin::insert_audit_entry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    UserCreate,
    UserUpdate,
    UserResetPassword,
    UserDelete,
    MaterialCreate,
    MaterialUpdate,
    MaterialDelete,
    AcademicUpdate,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UserCreate => "USER_CREATE",
            AuditAction::UserUpdate => "USER_UPDATE",
            AuditAction::UserResetPassword => "USER_RESET_PASSWORD",
            AuditAction::UserDelete => "USER_DELETE",
            AuditAction::MaterialCreate => "MATERIAL_CREATE",
            AuditAction::MaterialUpdate => "MATERIAL_UPDATE",
            AuditAction::MaterialDelete => "MATERIAL_DELETE",
            AuditAction::AcademicUpdate => "ACADEMIC_UPDATE",
        }
    }
}

/// Writes an entry, swallowing any failure.
pub async fn write(
    pool: &SqlitePool,
    actor_id: &str,
    action: AuditAction,
    target_id: Option<&str>,
    metadata: Option<Value>,
) {
    match insert_audit_entry(pool, actor_id, action.as_str(), target_id, metadata.as_ref()).await {
        Ok(()) => debug!(action = action.as_str(), "Audit entry written"),
        Err(e) => warn!(action = action.as_str(), error = %e, "Audit entry dropped"),
    }
}

/// Fire-and-forget: the caller never waits on or sees the audit write.
pub fn record(
    pool: &SqlitePool,
    actor_id: &str,
    action: AuditAction,
    target_id: Option<&str>,
    metadata: Option<Value>,
) {
    let pool = pool.clone();
    let actor_id = actor_id.to_string();
    let target_id = target_id.map(str::to_string);
    let span = info_span!("audit", action = action.as_str());

    tokio::spawn(
        async move {
            write(&pool, &actor_id, action, target_id.as_deref(), metadata).await;
        }
        .instrument(span),
    );
}
