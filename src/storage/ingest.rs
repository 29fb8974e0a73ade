use std::path::{Path, PathBuf};

use rocket::fs::TempFile;
use sqlx::SqlitePool;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::db::materials::{NewMaterial, insert_material};
use crate::error::AppError;
use crate::models::{Material, MaterialKind, MaterialStatus, MaterialType, Visibility};

use super::{
    CoverSettings, check_cover_claim, stored_name, transcode_cover, validate_cover_signature,
    validate_pdf,
};

/// An uploaded file moved into storage under a generated name.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub path: PathBuf,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

impl StagedFile {
    /// Lower-cased extension of the client-supplied file name, without the dot.
    pub fn extension(&self) -> Option<String> {
        extension_of(self.file_name.as_deref()?)
    }
}

fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
}

/// Every file a request has written. Dropping the batch deletes them all
/// unless [`UploadBatch::commit`] ran first.
#[derive(Debug, Default)]
pub struct UploadBatch {
    paths: Vec<PathBuf>,
}

impl UploadBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn commit(mut self) {
        debug!(files = self.paths.len(), "Upload batch committed");
        self.paths.clear();
    }
}

impl Drop for UploadBatch {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Discarded upload file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Could not discard upload file"),
            }
        }
    }
}

/// Moves a multipart file into `dir` as `<uuid><.ext>`, registering the
/// destination before anything is written.
pub async fn stage_upload(
    file: &mut TempFile<'_>,
    dir: &Path,
    batch: &mut UploadBatch,
) -> Result<StagedFile, AppError> {
    let file_name = file
        .raw_name()
        .map(|name| name.dangerous_unsafe_unsanitized_raw().as_str().to_string());
    let content_type = file
        .content_type()
        .map(|ct| format!("{}/{}", ct.top(), ct.sub()).to_ascii_lowercase());

    let suffix = file_name
        .as_deref()
        .and_then(extension_of)
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default();
    let path = dir.join(format!("{}{}", Uuid::new_v4(), suffix));

    batch.register(path.clone());
    file.move_copy_to(&path).await?;

    Ok(StagedFile {
        path,
        file_name,
        content_type,
    })
}

/// Catalog metadata submitted alongside the files.
#[derive(Debug, Clone)]
pub struct MaterialDraft {
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
}

impl MaterialDraft {
    pub fn effective_visibility(&self) -> Visibility {
        match self.kind {
            MaterialKind::Module => Visibility::Private,
            MaterialKind::Publication => self.visibility.unwrap_or(Visibility::Private),
        }
    }
}

pub struct Ingestion<'a> {
    pub pool: &'a SqlitePool,
    pub cover_settings: CoverSettings,
    pub created_by: &'a str,
}

impl Ingestion<'_> {
    /// Validates, transcodes and records a new material. Nothing written by
    /// the request survives a failure at any step.
    #[instrument(skip(self, draft, pdf, cover, batch), fields(kind = %draft.kind))]
    pub async fn ingest(
        &self,
        draft: MaterialDraft,
        pdf: Option<StagedFile>,
        cover: Option<StagedFile>,
        mut batch: UploadBatch,
    ) -> Result<Material, AppError> {
        let pdf = pdf.ok_or_else(|| AppError::rejected("PDF_REQUIRED", "A PDF file is required"))?;

        if draft.kind == MaterialKind::Module && cover.is_none() {
            return Err(AppError::rejected(
                "COVER_REQUIRED",
                "Modules require a cover image",
            ));
        }
        if draft.kind == MaterialKind::Publication && draft.material_type.is_none() {
            return Err(AppError::rejected(
                "MATERIAL_TYPE_REQUIRED",
                "Publications require a material type",
            ));
        }

        validate_pdf(&pdf).await?;
        if let Some(cover) = &cover {
            check_cover_claim(cover)?;
            validate_cover_signature(cover).await?;
        }

        let cover_path = match cover {
            Some(cover) => {
                let target = cover.path.with_file_name(format!("{}.jpg", Uuid::new_v4()));
                batch.register(target.clone());
                transcode_cover(&cover.path, &target, self.cover_settings).await?;
                Some(stored_name(&target))
            }
            None => None,
        };

        let new_material = NewMaterial {
            title: draft.title.clone(),
            description: draft.description.clone(),
            kind: draft.kind,
            visibility: draft.effective_visibility(),
            status: MaterialStatus::Active,
            course: draft.course.clone(),
            year: draft.year,
            semester: draft.semester,
            material_type: draft.material_type,
            author: draft.author.clone(),
            publication_year: draft.publication_year,
            cover_path,
            pdf_path: stored_name(&pdf.path),
            created_by: Some(self.created_by.to_string()),
        };

        let material = insert_material(self.pool, &new_material).await?;
        batch.commit();

        info!(material_id = %material.id, "Material ingested");
        Ok(material)
    }
}
