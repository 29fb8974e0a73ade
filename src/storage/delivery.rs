use std::io::{ErrorKind, SeekFrom};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use rocket::Request;
use rocket::http::{ContentType, Status};
use rocket::request::{FromRequest, Outcome};
use rocket::response::{self, Responder, Response};
use rocket::tokio::fs::File;
use rocket::tokio::io::{AsyncReadExt, AsyncSeekExt, Take};
use tracing::{info, instrument};

use crate::error::AppError;

static RANGE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^bytes=(\d*)-(\d*)$").expect("range pattern compiles"));

/// Inclusive byte span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parses `bytes=<start?>-<end?>` against a file of `size` bytes.
/// Anything malformed or out of bounds is unsatisfiable.
pub fn resolve_range(header: &str, size: u64) -> Result<ByteRange, AppError> {
    let unsatisfiable = || AppError::RangeNotSatisfiable { size };

    let caps = RANGE_PATTERN
        .captures(header.trim())
        .ok_or_else(unsatisfiable)?;
    let bound = |idx: usize| -> Result<Option<u64>, AppError> {
        match caps.get(idx).map(|m| m.as_str()).filter(|s| !s.is_empty()) {
            Some(digits) => digits.parse().map(Some).map_err(|_| unsatisfiable()),
            None => Ok(None),
        }
    };

    let start = bound(1)?.unwrap_or(0);
    let end = match bound(2)? {
        Some(end) => end,
        None => size.checked_sub(1).ok_or_else(unsatisfiable)?,
    };

    if start >= size || end >= size || start > end {
        return Err(unsatisfiable());
    }

    Ok(ByteRange { start, end })
}

/// Raw `Range` header, if the client sent one.
pub struct RangeHeader(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RangeHeader {
    type Error = std::convert::Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(RangeHeader(
            request.headers().get_one("Range").map(str::to_string),
        ))
    }
}

enum PdfBody {
    Full(File),
    Partial(Take<File>),
}

/// A PDF streamed from disk, whole or as a single byte span.
pub struct PdfDelivery {
    body: PdfBody,
    size: u64,
    span: Option<ByteRange>,
    filename: String,
}

impl PdfDelivery {
    pub fn span(&self) -> Option<ByteRange> {
        self.span
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

fn missing(code: &'static str, message: &str) -> AppError {
    AppError::NotFound {
        code,
        message: message.to_string(),
    }
}

async fn probe_size(path: &Path, code: &'static str, message: &str) -> Result<u64, AppError> {
    match rocket::tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        Ok(_) => Err(missing(code, message)),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(missing(code, message)),
        Err(e) => Err(e.into()),
    }
}

#[instrument(skip(range))]
pub async fn open_pdf(
    path: &Path,
    material_id: &str,
    range: Option<&str>,
) -> Result<PdfDelivery, AppError> {
    let is_pdf = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        return Err(AppError::rejected(
            "INVALID_PDF",
            "Stored content is not a PDF document",
        ));
    }

    let size = probe_size(path, "PDF_NOT_FOUND", "PDF file not found").await?;
    let filename = format!("material-{}.pdf", material_id);
    let mut file = File::open(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => missing("PDF_NOT_FOUND", "PDF file not found"),
        _ => e.into(),
    })?;

    let Some(header) = range else {
        info!(size, "Serving full PDF");
        return Ok(PdfDelivery {
            body: PdfBody::Full(file),
            size,
            span: None,
            filename,
        });
    };

    let span = resolve_range(header, size)?;
    file.seek(SeekFrom::Start(span.start)).await?;
    info!(start = span.start, end = span.end, size, "Serving PDF range");

    Ok(PdfDelivery {
        body: PdfBody::Partial(file.take(span.len())),
        size,
        span: Some(span),
        filename,
    })
}

impl<'r> Responder<'r, 'static> for PdfDelivery {
    fn respond_to(self, _req: &'r Request<'_>) -> response::Result<'static> {
        let mut response = Response::build();
        response
            .header(ContentType::PDF)
            .raw_header(
                "Content-Disposition",
                format!("inline; filename=\"{}\"", self.filename),
            )
            .raw_header("Cache-Control", "no-store")
            .raw_header("Pragma", "no-cache")
            .raw_header("X-Content-Type-Options", "nosniff")
            .raw_header("Accept-Ranges", "bytes");

        match (self.body, self.span) {
            (PdfBody::Partial(body), Some(span)) => response
                .status(Status::PartialContent)
                .raw_header(
                    "Content-Range",
                    format!("bytes {}-{}/{}", span.start, span.end, self.size),
                )
                .raw_header("Content-Length", span.len().to_string())
                .streamed_body(body),
            (PdfBody::Full(body), _) => response
                .status(Status::Ok)
                .sized_body(usize::try_from(self.size).ok(), body),
            (PdfBody::Partial(body), None) => response.status(Status::Ok).streamed_body(body),
        };

        response.ok()
    }
}

pub fn cover_content_type(path: &Path) -> ContentType {
    let ext = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => ContentType::JPEG,
        "png" => ContentType::PNG,
        "webp" => ContentType::new("image", "webp"),
        _ => ContentType::Binary,
    }
}

/// A cover image read in one shot.
pub struct CoverDelivery {
    bytes: Vec<u8>,
    content_type: ContentType,
}

#[instrument]
pub async fn open_cover(path: &Path) -> Result<CoverDelivery, AppError> {
    probe_size(path, "COVER_NOT_FOUND", "Cover image not found").await?;
    let bytes = rocket::tokio::fs::read(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => missing("COVER_NOT_FOUND", "Cover image not found"),
        _ => e.into(),
    })?;

    Ok(CoverDelivery {
        bytes,
        content_type: cover_content_type(path),
    })
}

impl<'r> Responder<'r, 'static> for CoverDelivery {
    fn respond_to(self, _req: &'r Request<'_>) -> response::Result<'static> {
        Response::build()
            .header(self.content_type)
            .raw_header("X-Content-Type-Options", "nosniff")
            .raw_header("Cache-Control", "private, max-age=300")
            .sized_body(self.bytes.len(), std::io::Cursor::new(self.bytes))
            .ok()
    }
}
