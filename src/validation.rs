use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::db::Page;
use crate::error::AppError;

static SCRIPT_BLOCKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").expect("script pattern compiles")
});
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern compiles"));

/// Flattens validator errors into one readable message, fields sorted.
pub fn describe(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, field_errors)| {
            field_errors.iter().map(move |error| {
                let detail = error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("invalid ({})", error.code));
                format!("{}: {}", field, detail)
            })
        })
        .collect();
    messages.sort();
    messages.join("; ")
}

pub trait ValidateExt: Sized {
    /// Runs `validator` rules, mapping failures to `VALIDATION_ERROR`.
    fn validate_custom(self) -> Result<Self, AppError>;
}

impl<T: Validate> ValidateExt for T {
    fn validate_custom(self) -> Result<Self, AppError> {
        match self.validate() {
            Ok(()) => Ok(self),
            Err(errors) => Err(AppError::Validation(describe(&errors))),
        }
    }
}

/// Strips markup (script and style bodies included) and trims.
pub fn sanitize_text(input: &str) -> String {
    let without_blocks = SCRIPT_BLOCKS.replace_all(input, "");
    TAGS.replace_all(&without_blocks, "").trim().to_string()
}

/// Sanitizes optional text; blank results become `None`.
pub fn sanitize_optional(input: Option<&str>) -> Option<String> {
    input.map(sanitize_text).filter(|s| !s.is_empty())
}

/// Sanitizes required text, rejecting values that are empty afterwards.
pub fn sanitize_required(field: &str, input: &str, max_chars: usize) -> Result<String, AppError> {
    let clean = sanitize_text(input);
    let len = clean.chars().count();
    if len == 0 {
        return Err(AppError::Validation(format!("{}: must not be empty", field)));
    }
    if len > max_chars {
        return Err(AppError::Validation(format!(
            "{}: must be at most {} characters",
            field, max_chars
        )));
    }
    Ok(clean)
}

/// Path and body ids are UUIDs; anything else is a client error.
pub fn parse_id(field: &str, raw: &str) -> Result<String, AppError> {
    Uuid::parse_str(raw)
        .map(|id| id.to_string())
        .map_err(|_| AppError::Validation(format!("{}: must be a valid id", field)))
}

pub fn page_params(page: Option<i64>, limit: Option<i64>) -> Result<Page, AppError> {
    let page = page.unwrap_or(1);
    let limit = limit.unwrap_or(20);

    if page < 1 {
        return Err(AppError::Validation("page: must be at least 1".to_string()));
    }
    if !(1..=100).contains(&limit) {
        return Err(AppError::Validation(
            "limit: must be between 1 and 100".to_string(),
        ));
    }
    // `Page::offset` multiplies these; keep the product representable.
    if (page - 1).checked_mul(limit).is_none() {
        return Err(AppError::Validation("page: is out of range".to_string()));
    }

    Ok(Page { page, limit })
}
