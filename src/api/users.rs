use rocket::State;
use rocket::http::Status;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;
use validator::Validate;

use crate::audit::{self, AuditAction};
use crate::auth::{AuthUser, BcryptHasher, PasswordHasher, Permission, Role, UserStatus};
use crate::config::AppConfig;
use crate::db::admin::{AuditFilters, list_audit_entries};
use crate::db::users::{
    NewUser, ProfileChanges, UserChanges, UserFilters, UserSummary, create_user, delete_user,
    list_users, set_password, update_user, user_stats,
};
use crate::error::AppError;
use crate::models::{AuditLogEntry, UserStats};
use crate::validation::{
    ValidateExt, page_params, parse_id, sanitize_optional, sanitize_required,
};

use super::{ApiCreated, ApiListResult, ApiResult, created, ok, paged};

#[derive(Debug, FromForm)]
pub struct UserQuery {
    pub q: Option<String>,
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    pub course: Option<String>,
    pub year: Option<i64>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, FromForm)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub user_id: Option<String>,
    pub target_id: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct NewUserRequest {
    #[validate(length(min = 1, max = 64, message = "is required"))]
    pub code: String,
    #[validate(length(min = 1, max = 120, message = "is required"))]
    pub name: String,
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    #[validate(length(max = 120))]
    pub course: Option<String>,
    #[validate(range(min = 1, max = 10))]
    pub year: Option<i64>,
    #[validate(range(min = 1, max = 2))]
    pub semester: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Serialize, Validate)]
pub struct UserPatch {
    #[validate(length(min = 1, max = 64))]
    pub code: Option<String>,
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    pub must_change_password: Option<bool>,
    #[validate(length(max = 120))]
    pub course: Option<String>,
    #[validate(range(min = 1, max = 10))]
    pub year: Option<i64>,
    #[validate(range(min = 1, max = 2))]
    pub semester: Option<i64>,
    pub completed_profile: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 6, message = "must be at least 6 characters"))]
    pub password: String,
}

fn user_not_found() -> AppError {
    AppError::not_found("User not found")
}

fn optional_required(field: &str, value: Option<&str>, max: usize) -> Result<Option<String>, AppError> {
    value.map(|v| sanitize_required(field, v, max)).transpose()
}

#[get("/users/stats")]
pub async fn stats(user: AuthUser, db: &State<SqlitePool>) -> ApiResult<UserStats> {
    user.require_permission(Permission::ViewUserStats)?;
    Ok(ok(user_stats(db).await?))
}

#[get("/users/audit?<query..>")]
pub async fn audit_log(
    query: AuditQuery,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiListResult<AuditLogEntry> {
    user.require_permission(Permission::ViewAuditLog)?;
    let page = page_params(query.page, query.limit)?;

    let filters = AuditFilters {
        action: sanitize_optional(query.action.as_deref()),
        user_id: sanitize_optional(query.user_id.as_deref()),
        target_id: sanitize_optional(query.target_id.as_deref()),
    };
    Ok(paged(list_audit_entries(db, &filters, page).await?))
}

#[get("/users?<query..>")]
pub async fn list(
    query: UserQuery,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiListResult<UserSummary> {
    user.require_permission(Permission::ManageUsers)?;
    let page = page_params(query.page, query.limit)?;

    let filters = UserFilters {
        q: sanitize_optional(query.q.as_deref()),
        role: query.role,
        status: query.status,
        course: sanitize_optional(query.course.as_deref()),
        year: query.year,
    };
    Ok(paged(list_users(db, &filters, page).await?))
}

#[post("/users", data = "<request>")]
pub async fn create(
    request: Json<NewUserRequest>,
    user: AuthUser,
    db: &State<SqlitePool>,
    hasher: &State<BcryptHasher>,
    config: &State<AppConfig>,
) -> ApiCreated<UserSummary> {
    user.require_permission(Permission::ManageUsers)?;
    let request = request.into_inner().validate_custom()?;

    let role = request.role.unwrap_or(Role::User);
    let course = sanitize_optional(request.course.as_deref());
    let completed_profile = role.is_staff() || (course.is_some() && request.year.is_some());

    let new_user = NewUser {
        code: sanitize_required("code", &request.code, 64)?,
        name: sanitize_required("name", &request.name, 120)?,
        password_hash: hasher.hash(&config.default_user_password)?,
        role,
        status: request.status.unwrap_or(UserStatus::Active),
        must_change_password: true,
        course,
        year: request.year,
        semester: request.semester,
        completed_profile,
    };
    let summary = create_user(db, &new_user).await?;

    info!(user_id = %summary.user.id, role = %summary.user.role, "User created");
    audit::record(
        db,
        &user.id,
        AuditAction::UserCreate,
        Some(&summary.user.id),
        Some(json!({ "code": summary.user.code, "role": summary.user.role })),
    );

    Ok(created(summary))
}

#[patch("/users/<id>", data = "<patch>")]
pub async fn update(
    id: &str,
    patch: Json<UserPatch>,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiResult<UserSummary> {
    user.require_permission(Permission::ManageUsers)?;
    let id = parse_id("id", id)?;
    let patch = patch.into_inner().validate_custom()?;

    let changes = UserChanges {
        code: optional_required("code", patch.code.as_deref(), 64)?,
        name: optional_required("name", patch.name.as_deref(), 120)?,
        role: patch.role,
        status: patch.status,
        must_change_password: patch.must_change_password,
        profile: ProfileChanges {
            course: sanitize_optional(patch.course.as_deref()),
            year: patch.year,
            semester: patch.semester,
            completed_profile: patch.completed_profile,
        },
    };

    let summary = update_user(db, &id, &changes)
        .await?
        .ok_or_else(user_not_found)?;

    // Recorded from the row as re-read after commit.
    audit::record(
        db,
        &user.id,
        AuditAction::UserUpdate,
        Some(&summary.user.id),
        Some(json!({ "role": summary.user.role, "status": summary.user.status })),
    );

    Ok(ok(summary))
}

#[post("/users/<id>/reset-password", data = "<request>")]
pub async fn reset_password(
    id: &str,
    request: Json<ResetPasswordRequest>,
    user: AuthUser,
    db: &State<SqlitePool>,
    hasher: &State<BcryptHasher>,
) -> Result<Status, AppError> {
    user.require_permission(Permission::ManageUsers)?;
    let id = parse_id("id", id)?;
    if id == user.id {
        return Err(AppError::rejected(
            "SELF_RESET_NOT_ALLOWED",
            "Use the password change flow for your own account",
        ));
    }
    let request = request.into_inner().validate_custom()?;

    let hash = hasher.hash(&request.password)?;
    if !set_password(db, &id, &hash, true).await? {
        return Err(user_not_found());
    }

    audit::record(db, &user.id, AuditAction::UserResetPassword, Some(&id), None);
    Ok(Status::NoContent)
}

#[delete("/users/<id>")]
pub async fn delete(id: &str, user: AuthUser, db: &State<SqlitePool>) -> Result<Status, AppError> {
    user.require_permission(Permission::ManageUsers)?;
    let id = parse_id("id", id)?;
    if id == user.id {
        return Err(AppError::rejected(
            "SELF_DELETE_NOT_ALLOWED",
            "You cannot delete your own account",
        ));
    }

    if !delete_user(db, &id).await? {
        return Err(user_not_found());
    }

    audit::record(db, &user.id, AuditAction::UserDelete, Some(&id), None);
    Ok(Status::NoContent)
}
