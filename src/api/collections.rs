use rocket::State;
use rocket::http::Status;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use validator::Validate;

use crate::auth::AuthUser;
use crate::db::library::{
    CollectionChanges, add_collection_item, create_collection, delete_collection, get_collection,
    list_collections, remove_collection_item, update_collection,
};
use crate::error::AppError;
use crate::models::Collection;
use crate::validation::{ValidateExt, parse_id, sanitize_optional, sanitize_required};

use super::{ApiCreated, ApiResult, created, ok};

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct NewCollectionRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub material_ids: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize, Serialize, Validate)]
pub struct CollectionPatch {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub material_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CollectionItemRequest {
    pub material_id: String,
}

fn collection_not_found() -> AppError {
    AppError::not_found("Collection not found")
}

fn material_ids(raw: Option<Vec<String>>) -> Result<Option<Vec<String>>, AppError> {
    raw.map(|ids| ids.iter().map(|id| parse_id("material_ids", id)).collect())
        .transpose()
}

#[get("/collections")]
pub async fn list(user: AuthUser, db: &State<SqlitePool>) -> ApiResult<Vec<Collection>> {
    Ok(ok(list_collections(db, &user.id).await?))
}

#[get("/collections/<id>")]
pub async fn detail(id: &str, user: AuthUser, db: &State<SqlitePool>) -> ApiResult<Collection> {
    let id = parse_id("id", id)?;
    let collection = get_collection(db, &user.id, &id)
        .await?
        .ok_or_else(collection_not_found)?;
    Ok(ok(collection))
}

#[post("/collections", data = "<request>")]
pub async fn create(
    request: Json<NewCollectionRequest>,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiCreated<Collection> {
    let request = request.into_inner().validate_custom()?;
    let name = sanitize_required("name", &request.name, 120)?;
    let description = sanitize_optional(request.description.as_deref());
    let ids = material_ids(request.material_ids)?.unwrap_or_default();

    let collection = create_collection(db, &user.id, &name, description.as_deref(), &ids).await?;
    Ok(created(collection))
}

#[patch("/collections/<id>", data = "<patch>")]
pub async fn update(
    id: &str,
    patch: Json<CollectionPatch>,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiResult<Collection> {
    let id = parse_id("id", id)?;
    let patch = patch.into_inner().validate_custom()?;

    let changes = CollectionChanges {
        name: match patch.name.as_deref() {
            Some(name) => Some(sanitize_required("name", name, 120)?),
            None => None,
        },
        // An explicit blank description clears it.
        description: patch.description.as_deref().map(|d| {
            sanitize_optional(Some(d)).unwrap_or_default()
        }),
        material_ids: material_ids(patch.material_ids)?,
    };
    if changes.is_empty() {
        return Err(AppError::rejected("EMPTY_UPDATE", "Nothing to update"));
    }

    let collection = update_collection(db, &user.id, &id, &changes)
        .await?
        .ok_or_else(collection_not_found)?;
    Ok(ok(collection))
}

#[delete("/collections/<id>")]
pub async fn delete(id: &str, user: AuthUser, db: &State<SqlitePool>) -> Result<Status, AppError> {
    let id = parse_id("id", id)?;
    if !delete_collection(db, &user.id, &id).await? {
        return Err(collection_not_found());
    }
    Ok(Status::NoContent)
}

#[post("/collections/<id>/items", data = "<item>")]
pub async fn add_item(
    id: &str,
    item: Json<CollectionItemRequest>,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiResult<Collection> {
    let id = parse_id("id", id)?;
    let material_id = parse_id("material_id", &item.material_id)?;

    let collection = add_collection_item(db, &user.id, &id, &material_id)
        .await?
        .ok_or_else(collection_not_found)?;
    Ok(ok(collection))
}

#[delete("/collections/<id>/items/<material_id>")]
pub async fn remove_item(
    id: &str,
    material_id: &str,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> Result<Status, AppError> {
    let id = parse_id("id", id)?;
    let material_id = parse_id("material_id", material_id)?;

    if get_collection(db, &user.id, &id).await?.is_none() {
        return Err(collection_not_found());
    }
    remove_collection_item(db, &user.id, &id, &material_id).await?;
    Ok(Status::NoContent)
}
