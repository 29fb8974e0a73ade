use rocket::State;
use rocket::http::Status;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use validator::Validate;

use crate::auth::{AuthUser, BcryptHasher, PasswordHasher, SessionUser};
use crate::db::admin::current_semester;
use crate::db::users::{ProfileChanges, get_auth_user, get_password_hash, set_password, update_own_profile};
use crate::error::AppError;
use crate::validation::{ValidateExt, sanitize_optional, sanitize_required};

use super::{ApiResult, ok};

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct CompleteProfileRequest {
    #[validate(length(min = 1, max = 120, message = "is required"))]
    pub course: String,
    #[validate(range(min = 1, max = 10, message = "must be between 1 and 10"))]
    pub year: i64,
    #[validate(range(min = 1, max = 2, message = "must be 1 or 2"))]
    pub semester: i64,
}

#[derive(Debug, Default, Deserialize, Serialize, Validate)]
pub struct UpdateMeRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 120))]
    pub course: Option<String>,
    #[validate(range(min = 1, max = 10))]
    pub year: Option<i64>,
    #[validate(range(min = 1, max = 2))]
    pub semester: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    #[validate(length(min = 6, message = "must be at least 6 characters"))]
    pub new_password: String,
}

async fn reload(db: &SqlitePool, user_id: &str) -> Result<SessionUser, AppError> {
    let user = get_auth_user(db, user_id)
        .await?
        .ok_or(AppError::UserNotFound)?;
    let semester = current_semester(db).await.ok().flatten();
    Ok(SessionUser::from(&user.with_current_semester(semester)))
}

#[post("/me/complete-profile", data = "<profile>")]
pub async fn complete_profile(
    profile: Json<CompleteProfileRequest>,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiResult<SessionUser> {
    let profile = profile.into_inner().validate_custom()?;

    let changes = ProfileChanges {
        course: Some(sanitize_required("course", &profile.course, 120)?),
        year: Some(profile.year),
        semester: Some(profile.semester),
        completed_profile: Some(true),
    };
    update_own_profile(db, &user.id, None, &changes).await?;

    Ok(ok(reload(db, &user.id).await?))
}

#[patch("/me", data = "<changes>")]
pub async fn update_me(
    changes: Json<UpdateMeRequest>,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiResult<SessionUser> {
    let changes = changes.into_inner().validate_custom()?;

    let name = match changes.name.as_deref() {
        Some(name) => Some(sanitize_required("name", name, 120)?),
        None => None,
    };
    let profile = ProfileChanges {
        course: sanitize_optional(changes.course.as_deref()),
        year: changes.year,
        semester: changes.semester,
        completed_profile: None,
    };

    if name.is_none() && profile.is_empty() {
        return Err(AppError::rejected("EMPTY_UPDATE", "Nothing to update"));
    }

    update_own_profile(db, &user.id, name.as_deref(), &profile).await?;

    Ok(ok(reload(db, &user.id).await?))
}

#[post("/me/password", data = "<request>")]
pub async fn change_password(
    request: Json<ChangePasswordRequest>,
    user: AuthUser,
    db: &State<SqlitePool>,
    hasher: &State<BcryptHasher>,
) -> Result<Status, AppError> {
    let request = request.into_inner().validate_custom()?;

    // A pending forced change is the only case where the old password is not asked for.
    if !user.must_change_password {
        let current = request
            .current_password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                AppError::rejected("CURRENT_PASSWORD_REQUIRED", "Current password is required")
            })?;
        let stored = get_password_hash(db, &user.id)
            .await?
            .ok_or(AppError::UserNotFound)?;
        if !hasher.verify(current, &stored) {
            return Err(AppError::rejected(
                "INVALID_CURRENT_PASSWORD",
                "Current password is incorrect",
            ));
        }
    }

    let hash = hasher.hash(&request.new_password)?;
    set_password(db, &user.id, &hash, false).await?;

    Ok(Status::NoContent)
}
