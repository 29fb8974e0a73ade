use opentelemetry_semantic_conventions::{attribute::OTEL_STATUS_CODE, trace::ERROR_TYPE};
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::{Request, tokio};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Span, error, warn};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Invalid token")]
    InvalidToken,

    #[error("User not found")]
    UserNotFound,

    #[error("User is inactive")]
    UserInactive,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("{0}")]
    Forbidden(String),

    #[error("{message}")]
    NotFound { code: &'static str, message: String },

    #[error("{0}")]
    Validation(String),

    /// Domain precondition failures surfaced as 400 with their own code.
    #[error("{message}")]
    Rejected { code: &'static str, message: String },

    #[error("{message}")]
    Conflict { code: &'static str, message: String },

    #[error("Requested range not satisfiable")]
    RangeNotSatisfiable { size: u64 },

    #[error("Cover transcoding failed: {0}")]
    Transcode(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Wire shape of every error response.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
}

impl ErrorBody {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            message: message.to_string(),
            code: code.to_string(),
        }
    }
}

impl AppError {
    pub fn forbidden() -> Self {
        AppError::Forbidden("Permission denied".to_string())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound {
            code: "NOT_FOUND",
            message: message.into(),
        }
    }

    pub fn rejected(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Rejected {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_)
            | AppError::Io(_)
            | AppError::Transcode(_)
            | AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Unauthenticated => "UNAUTHENTICATED",
            AppError::InvalidToken => "INVALID_TOKEN",
            AppError::UserNotFound => "USER_NOT_FOUND",
            AppError::UserInactive => "USER_INACTIVE",
            AppError::InvalidCredentials => "INVALID_CREDENTIALS",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound { code, .. } => code,
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Rejected { code, .. } => code,
            AppError::Conflict { code, .. } => code,
            AppError::RangeNotSatisfiable { .. } => "RANGE_NOT_SATISFIABLE",
        }
    }

    pub fn status_code(&self) -> Status {
        match self {
            AppError::Database(_)
            | AppError::Io(_)
            | AppError::Transcode(_)
            | AppError::Internal(_) => Status::InternalServerError,
            AppError::Unauthenticated
            | AppError::InvalidToken
            | AppError::UserNotFound
            | AppError::InvalidCredentials => Status::Unauthorized,
            AppError::UserInactive | AppError::Forbidden(_) => Status::Forbidden,
            AppError::NotFound { .. } => Status::NotFound,
            AppError::Validation(_) | AppError::Rejected { .. } => Status::BadRequest,
            AppError::Conflict { .. } => Status::Conflict,
            AppError::RangeNotSatisfiable { .. } => Status::RangeNotSatisfiable,
        }
    }

    /// Message safe to show to clients. Server faults never leak detail.
    pub fn public_message(&self) -> String {
        if self.status_code().code >= 500 {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }

    pub fn log_and_record(&self, ctx: &str) {
        let current_span = Span::current();
        let is_valid_span = !current_span.is_none();

        let message = self.to_string();
        let error_kind = match self {
            AppError::Database(err) => {
                error!(error = %message, context = %ctx, db_error = %err, "Database error");
                "database_error"
            }
            AppError::Io(err) => {
                error!(error = %message, context = %ctx, io_error = %err, "I/O error");
                "io_error"
            }
            AppError::Transcode(msg) => {
                error!(message = %msg, context = %ctx, "Cover transcoding error");
                "transcode_error"
            }
            AppError::Internal(msg) => {
                error!(message = %msg, context = %ctx, "Internal server error");
                "internal_error"
            }
            AppError::Unauthenticated
            | AppError::InvalidToken
            | AppError::UserNotFound
            | AppError::InvalidCredentials => {
                warn!(code = self.code(), context = %ctx, "Authentication error");
                "authentication_error"
            }
            AppError::UserInactive | AppError::Forbidden(_) => {
                warn!(code = self.code(), message = %message, context = %ctx, "Authorization error");
                "authorization_error"
            }
            AppError::NotFound { .. } => {
                warn!(code = self.code(), message = %message, context = %ctx, "Not found error");
                "not_found_error"
            }
            AppError::Validation(_) | AppError::Rejected { .. } | AppError::Conflict { .. } => {
                warn!(code = self.code(), message = %message, context = %ctx, "Rejected request");
                "validation_error"
            }
            AppError::RangeNotSatisfiable { size } => {
                warn!(size = %size, context = %ctx, "Range not satisfiable");
                "range_error"
            }
        };

        if is_valid_span {
            current_span.record("error", tracing::field::display(true));
            current_span.record(ERROR_TYPE, tracing::field::display(error_kind));
            current_span.record("error.message", tracing::field::display(&message));

            if self.status_code().code >= 500 {
                current_span.record(OTEL_STATUS_CODE, tracing::field::display("ERROR"));
            }
        }
    }
}

impl<'r> Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        self.log_and_record(&format!("Request to {} {}", req.method(), req.uri()));

        if let AppError::RangeNotSatisfiable { size } = self {
            return Response::build()
                .status(Status::RangeNotSatisfiable)
                .raw_header("Content-Range", format!("bytes */{}", size))
                .ok();
        }

        let body = ErrorBody::new(self.code(), &self.public_message());
        Custom(self.status_code(), Json(body)).respond_to(req)
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(error: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("Cryptography error: {}", error))
    }
}

impl From<image::ImageError> for AppError {
    fn from(error: image::ImageError) -> Self {
        AppError::Transcode(error.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(error: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Background task failed: {}", error))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {}", error))
    }
}
