use std::path::Path;

use tokio::io::AsyncReadExt;
use tracing::{instrument, warn};

use crate::error::AppError;

use super::StagedFile;

pub const PDF_MIME: &str = "application/pdf";
const PDF_MAGIC: &[u8] = b"%PDF";
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8];
const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            "image/png" => Some(ImageFormat::Png),
            "image/webp" => Some(ImageFormat::Webp),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().trim_start_matches('.') {
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "png" => Some(ImageFormat::Png),
            "webp" => Some(ImageFormat::Webp),
            _ => None,
        }
    }

    /// Identifies a format from the leading bytes of a file.
    pub fn sniff(head: &[u8]) -> Option<Self> {
        if head.starts_with(JPEG_MAGIC) {
            Some(ImageFormat::Jpeg)
        } else if head.starts_with(PNG_MAGIC) {
            Some(ImageFormat::Png)
        } else if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP" {
            Some(ImageFormat::Webp)
        } else {
            None
        }
    }
}

pub fn is_pdf_signature(head: &[u8]) -> bool {
    head.starts_with(PDF_MAGIC)
}

/// Reads up to `len` bytes from the start of a file.
pub async fn read_head(path: &Path, len: usize) -> Result<Vec<u8>, AppError> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut head).await?;
    Ok(head)
}

fn invalid_pdf() -> AppError {
    AppError::rejected("INVALID_PDF", "The content file must be a PDF document")
}

#[instrument(skip(file), fields(path = %file.path.display()))]
pub async fn validate_pdf(file: &StagedFile) -> Result<(), AppError> {
    let mime_ok = file
        .content_type
        .as_deref()
        .is_some_and(|mime| mime.eq_ignore_ascii_case(PDF_MIME));
    let extension_ok = file.extension().as_deref() == Some("pdf");

    if !mime_ok || !extension_ok {
        warn!(content_type = ?file.content_type, file_name = ?file.file_name, "PDF claim rejected");
        return Err(invalid_pdf());
    }

    if !is_pdf_signature(&read_head(&file.path, PDF_MAGIC.len()).await?) {
        warn!("PDF signature mismatch");
        return Err(invalid_pdf());
    }

    Ok(())
}

/// Claimed MIME and extension must name the same supported image family.
pub fn check_cover_claim(file: &StagedFile) -> Result<ImageFormat, AppError> {
    let by_mime = file.content_type.as_deref().and_then(ImageFormat::from_mime);
    let by_extension = file.extension().as_deref().and_then(ImageFormat::from_extension);

    match (by_mime, by_extension) {
        (Some(mime), Some(ext)) if mime == ext => Ok(mime),
        _ => {
            warn!(content_type = ?file.content_type, file_name = ?file.file_name, "Cover claim rejected");
            Err(AppError::rejected(
                "INVALID_COVER",
                "The cover must be a JPEG, PNG or WEBP image",
            ))
        }
    }
}

#[instrument(skip(file), fields(path = %file.path.display()))]
pub async fn validate_cover_signature(file: &StagedFile) -> Result<ImageFormat, AppError> {
    ImageFormat::sniff(&read_head(&file.path, 12).await?).ok_or_else(|| {
        warn!("Cover signature mismatch");
        AppError::rejected(
            "INVALID_COVER_SIGNATURE",
            "The cover content does not match a supported image format",
        )
    })
}
