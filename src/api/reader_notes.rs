use rocket::State;
use rocket::http::Status;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use validator::Validate;

use crate::auth::AuthUser;
use crate::db::library::{create_note, delete_note, list_notes};
use crate::error::AppError;
use crate::models::ReaderNote;
use crate::validation::{ValidateExt, parse_id, sanitize_required};

use super::materials::accessible_material;
use super::{ApiCreated, ApiResult, created, ok};

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct NewNoteRequest {
    pub material_id: String,
    #[validate(range(min = 1, message = "must be at least 1"))]
    pub page: i64,
    #[validate(length(min = 1, max = 2000))]
    pub text: String,
}

#[get("/reader-notes?<material_id>")]
pub async fn list(
    material_id: &str,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiResult<Vec<ReaderNote>> {
    let material = accessible_material(db, &user, material_id).await?;
    Ok(ok(list_notes(db, &user.id, &material.id).await?))
}

#[post("/reader-notes", data = "<note>")]
pub async fn create(
    note: Json<NewNoteRequest>,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiCreated<ReaderNote> {
    let note = note.into_inner().validate_custom()?;
    let text = sanitize_required("text", &note.text, 2000)?;
    let material = accessible_material(db, &user, &note.material_id).await?;

    let created_note = create_note(db, &user.id, &material.id, note.page, &text).await?;
    Ok(created(created_note))
}

#[delete("/reader-notes/<id>")]
pub async fn delete(id: &str, user: AuthUser, db: &State<SqlitePool>) -> Result<Status, AppError> {
    let id = parse_id("id", id)?;
    if !delete_note(db, &user.id, &id).await? {
        return Err(AppError::not_found("Note not found"));
    }
    Ok(Status::NoContent)
}
