use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{AcademicSettings, AuditLogEntry, Course, DbAuditLogEntry, DbCourse, to_utc};

use super::{Page, Paged, is_unique_violation, now};

fn course_exists() -> AppError {
    AppError::Conflict {
        code: "COURSE_EXISTS",
        message: "A course with this name already exists".to_string(),
    }
}

// Courses

#[instrument(skip(pool))]
pub async fn list_courses(pool: &SqlitePool, active_only: bool) -> Result<Vec<Course>, AppError> {
    info!("Listing courses");
    let sql = if active_only {
        "SELECT id, name, active, duration_years, created_at, updated_at FROM courses WHERE active = TRUE ORDER BY name"
    } else {
        "SELECT id, name, active, duration_years, created_at, updated_at FROM courses ORDER BY name"
    };

    let rows = sqlx::query_as::<_, DbCourse>(sql).fetch_all(pool).await?;
    Ok(rows.into_iter().map(Course::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_course(pool: &SqlitePool, id: &str) -> Result<Option<Course>, AppError> {
    let row = sqlx::query_as::<_, DbCourse>(
        "SELECT id, name, active, duration_years, created_at, updated_at FROM courses WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Course::from))
}

#[instrument(skip(pool))]
pub async fn create_course(
    pool: &SqlitePool,
    name: &str,
    active: bool,
    duration_years: i64,
) -> Result<Course, AppError> {
    info!("Creating course");
    let id = Uuid::new_v4().to_string();
    let timestamp = now();

    sqlx::query(
        "INSERT INTO courses (id, name, active, duration_years, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(active)
    .bind(duration_years)
    .bind(timestamp)
    .bind(timestamp)
    .execute(pool)
    .await
    .map_err(AppError::from)
    .map_err(|e| if is_unique_violation(&e) { course_exists() } else { e })?;

    get_course(pool, &id)
        .await?
        .ok_or_else(|| AppError::Internal("Created course vanished".to_string()))
}

#[instrument(skip(pool))]
pub async fn update_course(
    pool: &SqlitePool,
    id: &str,
    name: Option<&str>,
    active: Option<bool>,
    duration_years: Option<i64>,
) -> Result<Option<Course>, AppError> {
    info!("Updating course");
    let result = sqlx::query(
        "UPDATE courses SET name = COALESCE(?, name), active = COALESCE(?, active),
             duration_years = COALESCE(?, duration_years), updated_at = ?
         WHERE id = ?",
    )
    .bind(name)
    .bind(active)
    .bind(duration_years)
    .bind(now())
    .bind(id)
    .execute(pool)
    .await
    .map_err(AppError::from)
    .map_err(|e| if is_unique_violation(&e) { course_exists() } else { e })?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    get_course(pool, id).await
}

#[instrument(skip(pool))]
pub async fn delete_course(pool: &SqlitePool, id: &str) -> Result<bool, AppError> {
    info!("Deleting course");
    let result = sqlx::query("DELETE FROM courses WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[instrument(skip(pool))]
pub async fn max_course_duration(pool: &SqlitePool) -> Result<Option<i64>, AppError> {
    let max: Option<i64> =
        sqlx::query_scalar("SELECT MAX(duration_years) FROM courses WHERE active = TRUE")
            .fetch_one(pool)
            .await?;
    Ok(max)
}

// Academic settings

#[derive(sqlx::FromRow)]
struct DbAcademicSettings {
    current_semester: Option<i64>,
    updated_at: Option<chrono::NaiveDateTime>,
}

impl From<DbAcademicSettings> for AcademicSettings {
    fn from(db: DbAcademicSettings) -> Self {
        Self {
            current_semester: db.current_semester.unwrap_or(1),
            updated_at: to_utc(db.updated_at),
        }
    }
}

/// Current global semester, if one has been configured. Read-only.
#[instrument(skip(pool))]
pub async fn current_semester(pool: &SqlitePool) -> Result<Option<i64>, AppError> {
    let semester: Option<i64> =
        sqlx::query_scalar("SELECT current_semester FROM academic_settings WHERE id = 1")
            .fetch_optional(pool)
            .await?;
    Ok(semester)
}

/// Reads the settings row, creating it with semester 1 on first use.
#[instrument(skip(pool))]
pub async fn get_or_init_academic(pool: &SqlitePool) -> Result<AcademicSettings, AppError> {
    info!("Reading academic settings");
    sqlx::query(
        "INSERT INTO academic_settings (id, current_semester, updated_at) VALUES (1, 1, ?)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(now())
    .execute(pool)
    .await?;

    let row = sqlx::query_as::<_, DbAcademicSettings>(
        "SELECT current_semester, updated_at FROM academic_settings WHERE id = 1",
    )
    .fetch_one(pool)
    .await?;
    Ok(AcademicSettings::from(row))
}

#[instrument(skip(pool))]
pub async fn set_current_semester(
    pool: &SqlitePool,
    semester: i64,
) -> Result<AcademicSettings, AppError> {
    info!("Setting current semester");
    let row = sqlx::query_as::<_, DbAcademicSettings>(
        "INSERT INTO academic_settings (id, current_semester, updated_at) VALUES (1, ?, ?)
         ON CONFLICT (id) DO UPDATE SET current_semester = excluded.current_semester,
             updated_at = excluded.updated_at
         RETURNING current_semester, updated_at",
    )
    .bind(semester)
    .bind(now())
    .fetch_one(pool)
    .await?;
    Ok(AcademicSettings::from(row))
}

// Audit log

#[instrument(skip(pool, metadata))]
pub async fn insert_audit_entry(
    pool: &SqlitePool,
    user_id: &str,
    action: &str,
    target_id: Option<&str>,
    metadata: Option<&serde_json::Value>,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO audit_logs (id, user_id, action, target_id, metadata, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(action)
    .bind(target_id)
    .bind(metadata.map(|m| m.to_string()))
    .bind(now())
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilters {
    pub action: Option<String>,
    pub user_id: Option<String>,
    pub target_id: Option<String>,
}

fn push_audit_filters<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filters: &'a AuditFilters) {
    builder.push(" WHERE 1 = 1");
    if let Some(action) = filters.action.as_deref() {
        builder.push(" AND action = ").push_bind(action);
    }
    if let Some(user_id) = filters.user_id.as_deref() {
        builder.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(target_id) = filters.target_id.as_deref() {
        builder.push(" AND target_id = ").push_bind(target_id);
    }
}

#[instrument(skip(pool))]
pub async fn list_audit_entries(
    pool: &SqlitePool,
    filters: &AuditFilters,
    page: Page,
) -> Result<Paged<AuditLogEntry>, AppError> {
    info!("Listing audit entries");
    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM audit_logs");
    push_audit_filters(&mut count, filters);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new(
        "SELECT id, user_id, action, target_id, metadata, created_at FROM audit_logs",
    );
    push_audit_filters(&mut select, filters);
    select
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());

    let rows = select
        .build_query_as::<DbAuditLogEntry>()
        .fetch_all(pool)
        .await?;

    Ok(Paged {
        items: rows.into_iter().map(AuditLogEntry::from).collect(),
        total,
        page,
    })
}
