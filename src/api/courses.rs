use rocket::State;
use rocket::http::Status;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use validator::Validate;

use crate::auth::{AuthUser, Permission};
use crate::db::admin::{create_course, delete_course, list_courses, update_course};
use crate::error::AppError;
use crate::models::Course;
use crate::validation::{ValidateExt, parse_id, sanitize_required};

use super::{ApiCreated, ApiResult, created, ok};

const DEFAULT_DURATION_YEARS: i64 = 4;

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct NewCourseRequest {
    #[validate(length(min = 1, max = 120, message = "is required"))]
    pub name: String,
    pub active: Option<bool>,
    #[validate(range(min = 1, max = 6, message = "must be between 1 and 6"))]
    pub duration_years: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Serialize, Validate)]
pub struct CoursePatch {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    pub active: Option<bool>,
    #[validate(range(min = 1, max = 6, message = "must be between 1 and 6"))]
    pub duration_years: Option<i64>,
}

fn course_not_found() -> AppError {
    AppError::not_found("Course not found")
}

#[get("/courses")]
pub async fn list(user: AuthUser, db: &State<SqlitePool>) -> ApiResult<Vec<Course>> {
    user.require_permission(Permission::ManageCourses)?;
    Ok(ok(list_courses(db, false).await?))
}

#[post("/courses", data = "<request>")]
pub async fn create(
    request: Json<NewCourseRequest>,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiCreated<Course> {
    user.require_permission(Permission::ManageCourses)?;
    let request = request.into_inner().validate_custom()?;
    let name = sanitize_required("name", &request.name, 120)?;

    let course = create_course(
        db,
        &name,
        request.active.unwrap_or(true),
        request.duration_years.unwrap_or(DEFAULT_DURATION_YEARS),
    )
    .await?;
    Ok(created(course))
}

#[patch("/courses/<id>", data = "<patch>")]
pub async fn update(
    id: &str,
    patch: Json<CoursePatch>,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiResult<Course> {
    user.require_permission(Permission::ManageCourses)?;
    let id = parse_id("id", id)?;
    let patch = patch.into_inner().validate_custom()?;

    let name = patch
        .name
        .as_deref()
        .map(|name| sanitize_required("name", name, 120))
        .transpose()?;
    if name.is_none() && patch.active.is_none() && patch.duration_years.is_none() {
        return Err(AppError::rejected("EMPTY_UPDATE", "Nothing to update"));
    }

    let course = update_course(db, &id, name.as_deref(), patch.active, patch.duration_years)
        .await?
        .ok_or_else(course_not_found)?;
    Ok(ok(course))
}

#[delete("/courses/<id>")]
pub async fn delete(id: &str, user: AuthUser, db: &State<SqlitePool>) -> Result<Status, AppError> {
    user.require_permission(Permission::ManageCourses)?;
    let id = parse_id("id", id)?;
    if !delete_course(db, &id).await? {
        return Err(course_not_found());
    }
    Ok(Status::NoContent)
}
