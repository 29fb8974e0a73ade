use rocket::State;
use sqlx::SqlitePool;

use crate::auth::AuthUser;
use crate::db::admin::{get_or_init_academic, list_courses, max_course_duration};
use crate::models::{AcademicSettings, MaterialType};

use super::{ApiResult, ok};

const DEFAULT_MAX_YEARS: i64 = 4;

#[get("/meta/courses")]
pub async fn courses(_user: AuthUser, db: &State<SqlitePool>) -> ApiResult<Vec<String>> {
    let names = list_courses(db, true)
        .await?
        .into_iter()
        .map(|course| course.name)
        .collect();
    Ok(ok(names))
}

#[get("/meta/academic")]
pub async fn academic(_user: AuthUser, db: &State<SqlitePool>) -> ApiResult<AcademicSettings> {
    Ok(ok(get_or_init_academic(db).await?))
}

/// `1..=n` where `n` is the longest active course, 4 without courses.
#[get("/meta/years")]
pub async fn years(_user: AuthUser, db: &State<SqlitePool>) -> ApiResult<Vec<i64>> {
    let max = max_course_duration(db).await?.unwrap_or(DEFAULT_MAX_YEARS);
    Ok(ok((1..=max).collect()))
}

#[get("/meta/semesters")]
pub fn semesters(_user: AuthUser) -> ApiResult<Vec<i64>> {
    Ok(ok(vec![1, 2]))
}

#[get("/meta/material-types")]
pub fn material_types(_user: AuthUser) -> ApiResult<Vec<MaterialType>> {
    Ok(ok(MaterialType::ALL.to_vec()))
}
