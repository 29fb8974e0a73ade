use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use sqlx::SqlitePool;
use tracing::Instrument;

use crate::config::AppConfig;
use crate::db::admin::current_semester;
use crate::db::users::get_auth_user;
use crate::error::{AppError, ErrorBody};

use super::{AuthUser, TokenService};

/// Failure recorded by the session guard so catchers can echo the precise code.
#[derive(Debug, Clone)]
struct GuardFailure {
    code: &'static str,
    message: String,
}

fn bearer_token(request: &Request<'_>) -> Option<String> {
    request
        .headers()
        .get_one("Authorization")
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn cookie_token(request: &Request<'_>, cookie_name: &str) -> Option<String> {
    request
        .cookies()
        .get(cookie_name)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}

fn state<'r, T: Send + Sync + 'static>(request: &'r Request<'_>) -> Result<&'r T, AppError> {
    request.rocket().state::<T>().ok_or_else(|| {
        AppError::Internal(format!(
            "{} not found in managed state",
            std::any::type_name::<T>()
        ))
    })
}

async fn resolve_session(request: &Request<'_>) -> Result<AuthUser, AppError> {
    let config = state::<AppConfig>(request)?;
    let tokens = state::<TokenService>(request)?;
    let pool = state::<SqlitePool>(request)?;

    let token = bearer_token(request)
        .or_else(|| cookie_token(request, &config.cookie_name))
        .ok_or(AppError::Unauthenticated)?;

    let user_id = tokens.verify(&token)?;
    let user = get_auth_user(pool, &user_id)
        .await?
        .ok_or(AppError::UserNotFound)?;

    if !user.is_active() {
        return Err(AppError::UserInactive);
    }

    // The override is cosmetic; a failing settings read must not block the request.
    let semester = match current_semester(pool).await {
        Ok(semester) => semester,
        Err(e) => {
            tracing::warn!(error = %e, "Could not read academic semester");
            None
        }
    };

    Ok(user.with_current_semester(semester))
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = AppError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let auth_span = tracing::info_span!("user_auth_guard");

        match resolve_session(request).instrument(auth_span.clone()).await {
            Ok(user) => {
                auth_span.in_scope(|| {
                    tracing::info!(user_id = %user.id, role = %user.role, "User authenticated")
                });
                Outcome::Success(user)
            }
            Err(err) => {
                auth_span.in_scope(|| err.log_and_record("Session resolution"));
                let failure = GuardFailure {
                    code: err.code(),
                    message: err.public_message(),
                };
                request.local_cache(|| Some(failure));
                Outcome::Error((err.status_code(), err))
            }
        }
    }
}

fn error_body(status: Status, code: &str, message: &str) -> Custom<Json<ErrorBody>> {
    Custom(status, Json(ErrorBody::new(code, message)))
}

fn guard_failure(req: &Request<'_>) -> Option<GuardFailure> {
    req.local_cache(|| Option::<GuardFailure>::None).clone()
}

#[catch(400)]
pub fn bad_request(_req: &Request) -> Custom<Json<ErrorBody>> {
    error_body(Status::BadRequest, "VALIDATION_ERROR", "Malformed request")
}

#[catch(401)]
pub fn unauthorized(req: &Request) -> Custom<Json<ErrorBody>> {
    match guard_failure(req) {
        Some(failure) => error_body(Status::Unauthorized, failure.code, &failure.message),
        None => error_body(Status::Unauthorized, "UNAUTHENTICATED", "Not authenticated"),
    }
}

#[catch(403)]
pub fn forbidden(req: &Request) -> Custom<Json<ErrorBody>> {
    match guard_failure(req) {
        Some(failure) => error_body(Status::Forbidden, failure.code, &failure.message),
        None => error_body(Status::Forbidden, "FORBIDDEN", "Permission denied"),
    }
}

#[catch(404)]
pub fn not_found(_req: &Request) -> Custom<Json<ErrorBody>> {
    error_body(Status::NotFound, "NOT_FOUND", "Not found")
}

#[catch(413)]
pub fn payload_too_large(_req: &Request) -> Custom<Json<ErrorBody>> {
    error_body(
        Status::PayloadTooLarge,
        "PAYLOAD_TOO_LARGE",
        "Upload exceeds the configured size limit",
    )
}

#[catch(422)]
pub fn unprocessable(_req: &Request) -> Custom<Json<ErrorBody>> {
    error_body(
        Status::BadRequest,
        "VALIDATION_ERROR",
        "Request body does not match the expected shape",
    )
}

#[catch(500)]
pub fn internal_error(req: &Request) -> Custom<Json<ErrorBody>> {
    tracing::error!(uri = %req.uri(), "Unhandled server error");
    error_body(
        Status::InternalServerError,
        "INTERNAL_ERROR",
        "Internal server error",
    )
}

#[catch(default)]
pub fn fallback(status: Status, _req: &Request) -> Custom<Json<ErrorBody>> {
    error_body(status, "ERROR", status.reason().unwrap_or("Request failed"))
}
