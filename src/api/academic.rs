use rocket::State;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use validator::Validate;

use crate::audit::{self, AuditAction};
use crate::auth::{AuthUser, Permission};
use crate::db::admin::{get_or_init_academic, set_current_semester};
use crate::models::AcademicSettings;
use crate::validation::ValidateExt;

use super::{ApiResult, ok};

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct AcademicUpdate {
    #[validate(range(min = 1, max = 2, message = "must be 1 or 2"))]
    pub current_semester: i64,
}

#[get("/academic")]
pub async fn get(_user: AuthUser, db: &State<SqlitePool>) -> ApiResult<AcademicSettings> {
    Ok(ok(get_or_init_academic(db).await?))
}

#[put("/academic", data = "<update>")]
pub async fn update(
    update: Json<AcademicUpdate>,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiResult<AcademicSettings> {
    user.require_permission(Permission::ManageAcademic)?;
    let update = update.into_inner().validate_custom()?;

    let settings = set_current_semester(db, update.current_semester).await?;
    audit::record(
        db,
        &user.id,
        AuditAction::AcademicUpdate,
        None,
        Some(json!({ "current_semester": settings.current_semester })),
    );
    Ok(ok(settings))
}
