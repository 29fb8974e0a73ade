use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite};
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use validator::Validate;

use crate::auth::{AuthUser, Authenticator, BcryptHasher, LegacyStore, SessionUser, TokenService};
use crate::config::AppConfig;
use crate::validation::ValidateExt;

use super::{ApiResult, ok};

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 64, message = "is required"))]
    pub code: String,
    #[validate(length(min = 1, message = "is required"))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user: SessionUser,
    pub needs_profile: bool,
    pub needs_password_change: bool,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub message: String,
}

#[post("/auth/login", data = "<login>")]
pub async fn login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<SqlitePool>,
    legacy: &State<LegacyStore>,
    hasher: &State<BcryptHasher>,
    tokens: &State<TokenService>,
    config: &State<AppConfig>,
) -> ApiResult<LoginResponse> {
    let login = login.into_inner().validate_custom()?;

    let authenticator = Authenticator {
        pool: db.inner(),
        legacy: legacy.inner(),
        hasher: hasher.inner(),
        tokens: tokens.inner(),
    };
    let outcome = authenticator.login(login.code.trim(), &login.password).await?;

    let max_age = rocket::time::Duration::seconds(tokens.ttl().as_secs() as i64);
    cookies.add(
        Cookie::build((config.cookie_name.clone(), outcome.token.clone()))
            .http_only(true)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(max_age),
    );

    Ok(ok(LoginResponse {
        user: SessionUser::from(&outcome.user),
        needs_profile: outcome.needs_profile(),
        needs_password_change: outcome.needs_password_change(),
        token: outcome.token,
    }))
}

#[post("/auth/logout")]
pub fn logout(cookies: &CookieJar<'_>, config: &State<AppConfig>) -> Json<LogoutResponse> {
    cookies.remove(Cookie::build(config.cookie_name.clone()).path("/"));
    Json(LogoutResponse {
        message: "logged-out".to_string(),
    })
}

#[get("/auth/me")]
pub fn me(user: AuthUser) -> ApiResult<SessionUser> {
    Ok(ok(SessionUser::from(&user)))
}
