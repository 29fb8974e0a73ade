use rocket::State;
use rocket::http::Status;
use sqlx::SqlitePool;

use crate::auth::AuthUser;
use crate::db::library::{add_favorite, list_favorite_ids, remove_favorite};
use crate::db::materials::get_material;
use crate::error::AppError;
use crate::validation::parse_id;

use super::{ApiResult, ok};

#[get("/favorites")]
pub async fn list(user: AuthUser, db: &State<SqlitePool>) -> ApiResult<Vec<String>> {
    Ok(ok(list_favorite_ids(db, &user.id).await?))
}

/// Idempotent. Only the material's existence is checked.
#[post("/favorites/<material_id>")]
pub async fn add(material_id: &str, user: AuthUser, db: &State<SqlitePool>) -> Result<Status, AppError> {
    let material_id = parse_id("material_id", material_id)?;
    if get_material(db, &material_id).await?.is_none() {
        return Err(AppError::not_found("Material not found"));
    }

    add_favorite(db, &user.id, &material_id).await?;
    Ok(Status::NoContent)
}

#[delete("/favorites/<material_id>")]
pub async fn remove(
    material_id: &str,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> Result<Status, AppError> {
    let material_id = parse_id("material_id", material_id)?;
    remove_favorite(db, &user.id, &material_id).await?;
    Ok(Status::NoContent)
}
