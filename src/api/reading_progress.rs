use rocket::State;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use validator::Validate;

use crate::auth::AuthUser;
use crate::db::library::{
    add_reading_time, get_progress, list_progress, list_progress_materials, save_page_position,
};
use crate::models::{MaterialProgress, ReadingProgress};
use crate::validation::{ValidateExt, page_params};

use super::materials::accessible_material;
use super::{ApiListResult, ApiResult, ok, paged};

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct PagePosition {
    #[validate(range(min = 0))]
    pub current_page: i64,
    #[validate(range(min = 0))]
    pub total_pages: i64,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct ReadingTime {
    #[validate(range(min = 1, max = 3600, message = "must be between 1 and 3600"))]
    pub seconds: i64,
}

/// One material's progress (absent when never opened) or every row the
/// caller can still open.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressView {
    One(Option<ReadingProgress>),
    All(Vec<ReadingProgress>),
}

#[get("/reading-progress?<material_id>")]
pub async fn get(
    material_id: Option<&str>,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiResult<ProgressView> {
    let view = match material_id {
        Some(raw) => {
            let material = accessible_material(db, &user, raw).await?;
            ProgressView::One(get_progress(db, &user.id, &material.id).await?)
        }
        None => ProgressView::All(list_progress(db, &user).await?),
    };
    Ok(ok(view))
}

#[get("/reading-progress/materials?<page>&<limit>")]
pub async fn materials(
    page: Option<i64>,
    limit: Option<i64>,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiListResult<MaterialProgress> {
    let page = page_params(page, limit)?;
    Ok(paged(list_progress_materials(db, &user, page).await?))
}

#[put("/reading-progress/<material_id>", data = "<position>")]
pub async fn save_page(
    material_id: &str,
    position: Json<PagePosition>,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiResult<ReadingProgress> {
    let position = position.into_inner().validate_custom()?;
    let material = accessible_material(db, &user, material_id).await?;

    let progress = save_page_position(
        db,
        &user.id,
        &material.id,
        position.current_page,
        position.total_pages,
    )
    .await?;
    Ok(ok(progress))
}

#[put("/reading-progress/<material_id>/time", data = "<time>")]
pub async fn add_time(
    material_id: &str,
    time: Json<ReadingTime>,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiResult<ReadingProgress> {
    let time = time.into_inner().validate_custom()?;
    let material = accessible_material(db, &user, material_id).await?;

    Ok(ok(add_reading_time(db, &user.id, &material.id, time.seconds).await?))
}
