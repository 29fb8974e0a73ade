use rocket::State;
use sqlx::SqlitePool;

use crate::access::is_public;
use crate::config::AppConfig;
use crate::db::materials::{Audience, get_material, list_materials};
use crate::error::AppError;
use crate::models::Material;
use crate::storage::{CoverDelivery, PdfDelivery, RangeHeader};
use crate::validation::{page_params, parse_id};

use super::materials::{MaterialQuery, ReaderUrl, deliver_cover, deliver_pdf};
use super::{ApiListResult, ApiResult, ok, paged};

/// Anonymous readers only ever see active public publications; anything
/// else is reported as missing.
async fn public_material(db: &SqlitePool, raw_id: &str) -> Result<Material, AppError> {
    let id = parse_id("id", raw_id)?;
    get_material(db, &id)
        .await?
        .filter(is_public)
        .ok_or_else(|| AppError::not_found("Material not found"))
}

#[get("/public/materials?<query..>")]
pub async fn list(query: MaterialQuery, db: &State<SqlitePool>) -> ApiListResult<Material> {
    let page = page_params(query.page, query.limit)?;
    let result = list_materials(db, Audience::Public, &query.filters(), page).await?;
    Ok(paged(result))
}

#[get("/public/materials/<id>")]
pub async fn detail(id: &str, db: &State<SqlitePool>) -> ApiResult<Material> {
    Ok(ok(public_material(db, id).await?))
}

#[get("/public/materials/<id>/reader-url")]
pub async fn reader_url(id: &str, db: &State<SqlitePool>) -> ApiResult<ReaderUrl> {
    let material = public_material(db, id).await?;
    Ok(ok(ReaderUrl {
        url: format!("/api/public/materials/{}/pdf", material.id),
    }))
}

#[get("/public/materials/<id>/cover")]
pub async fn cover(
    id: &str,
    db: &State<SqlitePool>,
    config: &State<AppConfig>,
) -> Result<CoverDelivery, AppError> {
    let material = public_material(db, id).await?;
    deliver_cover(&material, config).await
}

#[get("/public/materials/<id>/pdf")]
pub async fn pdf(
    id: &str,
    range: RangeHeader,
    db: &State<SqlitePool>,
    config: &State<AppConfig>,
) -> Result<PdfDelivery, AppError> {
    let material = public_material(db, id).await?;
    deliver_pdf(&material, config, range).await
}
