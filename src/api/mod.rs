pub mod academic;
pub mod auth;
pub mod collections;
pub mod courses;
pub mod favorites;
pub mod materials;
pub mod me;
pub mod meta;
pub mod public;
pub mod reader_notes;
pub mod reading_progress;
pub mod users;

use rocket::Route;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};

use crate::db::Paged;
use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct PageMeta {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiList<T> {
    pub data: Vec<T>,
    pub message: String,
    pub meta: PageMeta,
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;
pub type ApiCreated<T> = Result<Custom<Json<ApiResponse<T>>>, AppError>;
pub type ApiListResult<T> = Result<Json<ApiList<T>>, AppError>;

pub fn ok<T>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        data,
        message: "ok".to_string(),
    })
}

pub fn created<T>(data: T) -> Custom<Json<ApiResponse<T>>> {
    Custom(Status::Created, ok(data))
}

pub fn paged<T>(result: Paged<T>) -> Json<ApiList<T>> {
    Json(ApiList {
        data: result.items,
        message: "ok".to_string(),
        meta: PageMeta {
            page: result.page.page,
            limit: result.page.limit,
            total: result.total,
        },
    })
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

pub fn routes() -> Vec<Route> {
    routes![
        health,
        auth::login,
        auth::logout,
        auth::me,
        me::complete_profile,
        me::update_me,
        me::change_password,
        materials::list,
        materials::cross_cutting_themes,
        materials::my_course_modules,
        materials::detail,
        materials::create,
        materials::update,
        materials::update_status,
        materials::delete,
        materials::reader_url,
        materials::cover,
        materials::pdf,
        public::list,
        public::detail,
        public::reader_url,
        public::cover,
        public::pdf,
        favorites::list,
        favorites::add,
        favorites::remove,
        collections::list,
        collections::detail,
        collections::create,
        collections::update,
        collections::delete,
        collections::add_item,
        collections::remove_item,
        reading_progress::get,
        reading_progress::materials,
        reading_progress::save_page,
        reading_progress::add_time,
        reader_notes::list,
        reader_notes::create,
        reader_notes::delete,
        users::stats,
        users::audit_log,
        users::list,
        users::create,
        users::update,
        users::reset_password,
        users::delete,
        courses::list,
        courses::create,
        courses::update,
        courses::delete,
        academic::get,
        academic::update,
        meta::courses,
        meta::academic,
        meta::years,
        meta::semesters,
        meta::material_types,
    ]
}
