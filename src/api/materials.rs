use rocket::State;
use rocket::form::{Errors, Form};
use rocket::fs::TempFile;
use rocket::http::Status;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{info, warn};
use validator::Validate;

use crate::access::can_access;
use crate::audit::{self, AuditAction};
use crate::auth::{AuthUser, Permission};
use crate::config::AppConfig;
use crate::db::materials::{
    Audience, MaterialFilters, SortBy, delete_material, get_material, list_course_modules,
    list_cross_cutting_themes, list_materials, save_material, set_material_status,
};
use crate::error::AppError;
use crate::models::{Material, MaterialKind, MaterialStatus, MaterialType, Visibility};
use crate::storage::{
    CoverDelivery, Ingestion, MaterialDraft, PdfDelivery, RangeHeader, UploadBatch, open_cover,
    open_pdf, remove_quietly, resolve_stored, stage_upload,
};
use crate::validation::{ValidateExt, page_params, parse_id, sanitize_optional, sanitize_required};

use super::{ApiCreated, ApiListResult, ApiResult, created, ok, paged};

#[derive(Debug, FromForm)]
pub struct MaterialQuery {
    pub q: Option<String>,
    pub kind: Option<MaterialKind>,
    pub material_type: Option<MaterialType>,
    pub course: Option<String>,
    pub year: Option<i64>,
    pub semester: Option<i64>,
    pub author: Option<String>,
    pub publication_year: Option<i64>,
    pub visibility: Option<Visibility>,
    pub status: Option<MaterialStatus>,
    pub sort_by: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl MaterialQuery {
    pub fn filters(&self) -> MaterialFilters {
        MaterialFilters {
            q: sanitize_optional(self.q.as_deref()),
            kind: self.kind,
            material_type: self.material_type,
            course: sanitize_optional(self.course.as_deref()),
            year: self.year,
            semester: self.semester,
            author: sanitize_optional(self.author.as_deref()),
            publication_year: self.publication_year,
            visibility: self.visibility,
            status: self.status,
            sort_by: match self.sort_by.as_deref() {
                Some("created_at") => SortBy::CreatedAt,
                _ => SortBy::UpdatedAt,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReaderUrl {
    pub url: String,
}

/// Loads a material and applies the access policy. Absent rows are 404,
/// denied rows 403.
pub async fn accessible_material(
    db: &SqlitePool,
    user: &AuthUser,
    raw_id: &str,
) -> Result<Material, AppError> {
    let id = parse_id("id", raw_id)?;
    let material = get_material(db, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Material not found"))?;

    if !can_access(user, &material) {
        warn!(user_id = %user.id, material_id = %material.id, "Material access denied");
        return Err(AppError::Forbidden(
            "You do not have access to this material".to_string(),
        ));
    }

    Ok(material)
}

async fn existing_material(db: &SqlitePool, raw_id: &str) -> Result<Material, AppError> {
    let id = parse_id("id", raw_id)?;
    get_material(db, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Material not found"))
}

#[get("/materials?<query..>")]
pub async fn list(
    query: MaterialQuery,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiListResult<Material> {
    let page = page_params(query.page, query.limit)?;
    let result = list_materials(db, Audience::Member(&user), &query.filters(), page).await?;
    Ok(paged(result))
}

#[get("/materials/cross-cutting-themes")]
pub async fn cross_cutting_themes(user: AuthUser, db: &State<SqlitePool>) -> ApiResult<Vec<Material>> {
    Ok(ok(list_cross_cutting_themes(db, &user).await?))
}

#[get("/materials/modules/my-course")]
pub async fn my_course_modules(user: AuthUser, db: &State<SqlitePool>) -> ApiResult<Vec<Material>> {
    let modules = match user.enrolled_course() {
        Some(course) => list_course_modules(db, course).await?,
        None => Vec::new(),
    };
    Ok(ok(modules))
}

#[get("/materials/<id>", rank = 2)]
pub async fn detail(id: &str, user: AuthUser, db: &State<SqlitePool>) -> ApiResult<Material> {
    Ok(ok(accessible_material(db, &user, id).await?))
}

#[derive(Debug, FromForm)]
pub struct MaterialUpload<'r> {
    pub title: String,
    pub description: Option<String>,
    pub kind: MaterialKind,
    pub visibility: Option<Visibility>,
    pub course: Option<String>,
    pub year: Option<i64>,
    pub semester: Option<i64>,
    pub material_type: Option<MaterialType>,
    pub author: Option<String>,
    pub publication_year: Option<i64>,
    pub pdf: Option<TempFile<'r>>,
    pub cover: Option<TempFile<'r>>,
}

fn form_errors(errors: &Errors<'_>) -> AppError {
    let message = errors
        .iter()
        .map(|error| match error.name.as_ref() {
            Some(name) => format!("{}: {}", name, error.kind),
            None => error.kind.to_string(),
        })
        .collect::<Vec<_>>()
        .join("; ");
    AppError::Validation(message)
}

#[post("/materials", data = "<upload>")]
pub async fn create(
    upload: Result<Form<MaterialUpload<'_>>, Errors<'_>>,
    user: AuthUser,
    db: &State<SqlitePool>,
    config: &State<AppConfig>,
) -> ApiCreated<Material> {
    user.require_permission(Permission::ManageMaterials)?;
    let mut upload = upload.map_err(|e| form_errors(&e))?.into_inner();

    // Files land in storage first so every exit path can clean them up.
    let mut batch = UploadBatch::new();
    let pdf = match upload.pdf.as_mut() {
        Some(file) => Some(stage_upload(file, &config.storage.pdf_dir, &mut batch).await?),
        None => None,
    };
    let cover = match upload.cover.as_mut() {
        Some(file) => Some(stage_upload(file, &config.storage.cover_dir, &mut batch).await?),
        None => None,
    };

    let draft = MaterialDraft {
        title: sanitize_required("title", &upload.title, 255)?,
        description: sanitize_optional(upload.description.as_deref()),
        kind: upload.kind,
        visibility: upload.visibility,
        course: sanitize_optional(upload.course.as_deref()),
        year: upload.year,
        semester: upload.semester,
        material_type: upload.material_type,
        author: sanitize_optional(upload.author.as_deref()),
        publication_year: upload.publication_year,
    };

    let ingestion = Ingestion {
        pool: db.inner(),
        cover_settings: config.cover,
        created_by: &user.id,
    };
    let material = ingestion.ingest(draft, pdf, cover, batch).await?;

    audit::record(
        db,
        &user.id,
        AuditAction::MaterialCreate,
        Some(&material.id),
        Some(json!({ "kind": material.kind, "title": material.title })),
    );

    Ok(created(material))
}

#[derive(Debug, Default, Deserialize, Serialize, Validate)]
pub struct MaterialPatch {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub kind: Option<MaterialKind>,
    pub visibility: Option<Visibility>,
    pub status: Option<MaterialStatus>,
    #[validate(length(max = 120))]
    pub course: Option<String>,
    #[validate(range(min = 1, max = 10))]
    pub year: Option<i64>,
    #[validate(range(min = 1, max = 2))]
    pub semester: Option<i64>,
    pub material_type: Option<MaterialType>,
    #[validate(length(max = 255))]
    pub author: Option<String>,
    #[validate(range(min = 1000, max = 9999))]
    pub publication_year: Option<i64>,
}

impl MaterialPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.kind.is_none()
            && self.visibility.is_none()
            && self.status.is_none()
            && self.course.is_none()
            && self.year.is_none()
            && self.semester.is_none()
            && self.material_type.is_none()
            && self.author.is_none()
            && self.publication_year.is_none()
    }

    /// Merges onto `material`, keeping the kind/visibility/type invariants.
    pub fn apply(self, mut material: Material) -> Result<Material, AppError> {
        if let Some(title) = self.title.as_deref() {
            material.title = sanitize_required("title", title, 255)?;
        }
        if let Some(description) = self.description.as_deref() {
            material.description = sanitize_optional(Some(description));
        }
        if let Some(course) = self.course.as_deref() {
            material.course = sanitize_optional(Some(course));
        }
        if let Some(author) = self.author.as_deref() {
            material.author = sanitize_optional(Some(author));
        }
        if let Some(kind) = self.kind {
            material.kind = kind;
        }
        if let Some(status) = self.status {
            material.status = status;
        }
        material.year = self.year.or(material.year);
        material.semester = self.semester.or(material.semester);
        material.material_type = self.material_type.or(material.material_type);
        material.publication_year = self.publication_year.or(material.publication_year);

        material.visibility = match material.kind {
            MaterialKind::Module => Visibility::Private,
            MaterialKind::Publication => self.visibility.unwrap_or(material.visibility),
        };

        if material.kind == MaterialKind::Publication && material.material_type.is_none() {
            return Err(AppError::rejected(
                "MATERIAL_TYPE_REQUIRED",
                "Publications require a material type",
            ));
        }

        Ok(material)
    }
}

#[patch("/materials/<id>", data = "<patch>")]
pub async fn update(
    id: &str,
    patch: Json<MaterialPatch>,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiResult<Material> {
    user.require_permission(Permission::ManageMaterials)?;
    let patch = patch.into_inner().validate_custom()?;
    if patch.is_empty() {
        return Err(AppError::rejected("EMPTY_UPDATE", "Nothing to update"));
    }

    let material = existing_material(db, id).await?;
    let merged = patch.apply(material)?;
    let saved = save_material(db, &merged).await?;

    audit::record(db, &user.id, AuditAction::MaterialUpdate, Some(&saved.id), None);
    Ok(ok(saved))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StatusChange {
    pub status: MaterialStatus,
}

#[patch("/materials/<id>/status", data = "<change>")]
pub async fn update_status(
    id: &str,
    change: Json<StatusChange>,
    user: AuthUser,
    db: &State<SqlitePool>,
) -> ApiResult<Material> {
    user.require_permission(Permission::ManageMaterials)?;
    let id = parse_id("id", id)?;

    let material = set_material_status(db, &id, change.status)
        .await?
        .ok_or_else(|| AppError::not_found("Material not found"))?;

    audit::record(
        db,
        &user.id,
        AuditAction::MaterialUpdate,
        Some(&material.id),
        Some(json!({ "status": material.status })),
    );
    Ok(ok(material))
}

#[delete("/materials/<id>")]
pub async fn delete(
    id: &str,
    user: AuthUser,
    db: &State<SqlitePool>,
    config: &State<AppConfig>,
) -> Result<Status, AppError> {
    user.require_permission(Permission::ManageMaterials)?;
    let id = parse_id("id", id)?;

    let material = delete_material(db, &id)
        .await?
        .ok_or_else(|| AppError::not_found("Material not found"))?;

    remove_quietly(&resolve_stored(&config.storage.pdf_dir, &material.pdf_path)).await;
    if let Some(cover) = material.cover_path.as_deref() {
        remove_quietly(&resolve_stored(&config.storage.cover_dir, cover)).await;
    }

    info!(material_id = %material.id, "Material deleted");
    audit::record(db, &user.id, AuditAction::MaterialDelete, Some(&material.id), None);
    Ok(Status::NoContent)
}

#[get("/materials/<id>/reader-url")]
pub async fn reader_url(id: &str, user: AuthUser, db: &State<SqlitePool>) -> ApiResult<ReaderUrl> {
    let material = accessible_material(db, &user, id).await?;
    Ok(ok(ReaderUrl {
        url: format!("/api/materials/{}/pdf", material.id),
    }))
}

pub(crate) async fn deliver_cover(
    material: &Material,
    config: &AppConfig,
) -> Result<CoverDelivery, AppError> {
    let stored = material
        .cover_path
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::NotFound {
            code: "COVER_NOT_FOUND",
            message: "Cover image not found".to_string(),
        })?;
    open_cover(&resolve_stored(&config.storage.cover_dir, stored)).await
}

pub(crate) async fn deliver_pdf(
    material: &Material,
    config: &AppConfig,
    range: RangeHeader,
) -> Result<PdfDelivery, AppError> {
    if material.pdf_path.is_empty() {
        return Err(AppError::NotFound {
            code: "PDF_NOT_FOUND",
            message: "PDF file not found".to_string(),
        });
    }
    open_pdf(
        &resolve_stored(&config.storage.pdf_dir, &material.pdf_path),
        &material.id,
        range.0.as_deref(),
    )
    .await
}

#[get("/materials/<id>/cover")]
pub async fn cover(
    id: &str,
    user: AuthUser,
    db: &State<SqlitePool>,
    config: &State<AppConfig>,
) -> Result<CoverDelivery, AppError> {
    let material = accessible_material(db, &user, id).await?;
    deliver_cover(&material, config).await
}

#[get("/materials/<id>/pdf")]
pub async fn pdf(
    id: &str,
    range: RangeHeader,
    user: AuthUser,
    db: &State<SqlitePool>,
    config: &State<AppConfig>,
) -> Result<PdfDelivery, AppError> {
    let material = accessible_material(db, &user, id).await?;
    deliver_pdf(&material, config, range).await
}
