use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::{AuthUser, DbAuthUser, Role, UserStatus};
use crate::error::AppError;
use crate::models::{UserStats, to_utc};

use super::{Page, Paged, is_unique_violation, like_pattern, now};

const USER_SELECT: &str = "SELECT u.id, u.code, u.name, u.role, u.status, u.must_change_password, \
     p.course, p.year, p.semester, p.completed_profile, u.created_at, u.updated_at \
     FROM users u LEFT JOIN user_profile p ON p.user_id = u.id";

fn code_exists() -> AppError {
    AppError::Conflict {
        code: "USER_CODE_EXISTS",
        message: "A user with this code already exists".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub code: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub status: UserStatus,
    pub must_change_password: bool,
    pub course: Option<String>,
    pub year: Option<i64>,
    pub semester: Option<i64>,
    pub completed_profile: bool,
}

/// Administrative view of an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    #[serde(flatten)]
    pub user: AuthUser,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbUserSummary {
    #[sqlx(flatten)]
    pub user: DbAuthUser,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl TryFrom<DbUserSummary> for UserSummary {
    type Error = AppError;

    fn try_from(db: DbUserSummary) -> Result<Self, Self::Error> {
        Ok(Self {
            user: AuthUser::try_from(db.user)?,
            created_at: to_utc(db.created_at),
            updated_at: to_utc(db.updated_at),
        })
    }
}

/// Inserts a user and its profile in one transaction. Returns the new id.
#[instrument(skip(pool, new_user), fields(code = %new_user.code, role = %new_user.role))]
pub async fn create_user_with_profile(
    pool: &SqlitePool,
    new_user: &NewUser,
) -> Result<String, AppError> {
    info!("Creating user with profile");
    let id = Uuid::new_v4().to_string();
    let timestamp = now();

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO users (id, code, name, password_hash_local, role, status, must_change_password, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&new_user.code)
    .bind(&new_user.name)
    .bind(&new_user.password_hash)
    .bind(new_user.role.as_str())
    .bind(new_user.status.as_str())
    .bind(new_user.must_change_password)
    .bind(timestamp)
    .bind(timestamp)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO user_profile (user_id, course, year, semester, completed_profile, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&new_user.course)
    .bind(new_user.year)
    .bind(new_user.semester)
    .bind(new_user.completed_profile)
    .bind(timestamp)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(id)
}

#[instrument(skip(pool))]
pub async fn get_auth_user(pool: &SqlitePool, id: &str) -> Result<Option<AuthUser>, AppError> {
    info!("Fetching user with profile");
    let row = sqlx::query_as::<_, DbAuthUser>(&format!("{} WHERE u.id = ?", USER_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(AuthUser::try_from).transpose()
}

#[instrument(skip(pool))]
pub async fn get_user_summary(pool: &SqlitePool, id: &str) -> Result<Option<UserSummary>, AppError> {
    info!("Fetching user summary");
    let row = sqlx::query_as::<_, DbUserSummary>(&format!("{} WHERE u.id = ?", USER_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(UserSummary::try_from).transpose()
}

#[instrument(skip(pool))]
pub async fn get_password_hash(pool: &SqlitePool, id: &str) -> Result<Option<String>, AppError> {
    let hash: Option<String> =
        sqlx::query_scalar("SELECT password_hash_local FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
    Ok(hash)
}

#[instrument(skip(pool, password_hash))]
pub async fn set_password(
    pool: &SqlitePool,
    id: &str,
    password_hash: &str,
    must_change_password: bool,
) -> Result<bool, AppError> {
    info!("Updating password");
    let result = sqlx::query(
        "UPDATE users SET password_hash_local = ?, must_change_password = ?, updated_at = ? WHERE id = ?",
    )
    .bind(password_hash)
    .bind(must_change_password)
    .bind(now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub course: Option<String>,
    pub year: Option<i64>,
    pub semester: Option<i64>,
    pub completed_profile: Option<bool>,
}

impl ProfileChanges {
    pub fn is_empty(&self) -> bool {
        self.course.is_none()
            && self.year.is_none()
            && self.semester.is_none()
            && self.completed_profile.is_none()
    }
}

async fn upsert_profile(
    tx: &mut sqlx::SqliteConnection,
    user_id: &str,
    changes: &ProfileChanges,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO user_profile (user_id, course, year, semester, completed_profile, updated_at)
         VALUES (?, ?, ?, ?, COALESCE(?, FALSE), ?)
         ON CONFLICT (user_id) DO UPDATE SET
             course = COALESCE(excluded.course, user_profile.course),
             year = COALESCE(excluded.year, user_profile.year),
             semester = COALESCE(excluded.semester, user_profile.semester),
             completed_profile = COALESCE(?, user_profile.completed_profile),
             updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(&changes.course)
    .bind(changes.year)
    .bind(changes.semester)
    .bind(changes.completed_profile)
    .bind(now())
    .bind(changes.completed_profile)
    .execute(&mut *tx)
    .await?;

    Ok(())
}

/// Self-service update: display name plus profile fields, all optional.
#[instrument(skip(pool, changes))]
pub async fn update_own_profile(
    pool: &SqlitePool,
    id: &str,
    name: Option<&str>,
    changes: &ProfileChanges,
) -> Result<(), AppError> {
    info!("Updating own profile");
    let mut tx = pool.begin().await?;

    if let Some(name) = name {
        sqlx::query("UPDATE users SET name = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(now())
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }

    if !changes.is_empty() {
        upsert_profile(&mut tx, id, changes).await?;
    }

    tx.commit().await?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub code: Option<String>,
    pub name: Option<String>,
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    pub must_change_password: Option<bool>,
    pub profile: ProfileChanges,
}

/// Administrative update of an account and its profile in one transaction.
/// Returns the row as persisted, or `None` when the user does not exist.
#[instrument(skip(pool, changes))]
pub async fn update_user(
    pool: &SqlitePool,
    id: &str,
    changes: &UserChanges,
) -> Result<Option<UserSummary>, AppError> {
    info!("Updating user");
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "UPDATE users SET
             code = COALESCE(?, code),
             name = COALESCE(?, name),
             role = COALESCE(?, role),
             status = COALESCE(?, status),
             must_change_password = COALESCE(?, must_change_password),
             updated_at = ?
         WHERE id = ?",
    )
    .bind(&changes.code)
    .bind(&changes.name)
    .bind(changes.role.map(|r| r.as_str()))
    .bind(changes.status.map(|s| s.as_str()))
    .bind(changes.must_change_password)
    .bind(now())
    .bind(id)
    .execute(&mut *tx)
    .await
    .map_err(AppError::from)
    .map_err(|e| if is_unique_violation(&e) { code_exists() } else { e })?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(None);
    }

    if !changes.profile.is_empty() {
        upsert_profile(&mut tx, id, &changes.profile).await?;
    }

    tx.commit().await?;

    get_user_summary(pool, id).await
}

/// Creates an account on behalf of an administrator.
#[instrument(skip(pool, new_user), fields(code = %new_user.code))]
pub async fn create_user(pool: &SqlitePool, new_user: &NewUser) -> Result<UserSummary, AppError> {
    let id = create_user_with_profile(pool, new_user)
        .await
        .map_err(|e| if is_unique_violation(&e) { code_exists() } else { e })?;

    get_user_summary(pool, &id)
        .await?
        .ok_or_else(|| AppError::Internal("Created user vanished".to_string()))
}

#[instrument(skip(pool))]
pub async fn delete_user(pool: &SqlitePool, id: &str) -> Result<bool, AppError> {
    info!("Deleting user");
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM user_profile WHERE user_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    tx.commit().await?;
    Ok(true)
}

#[derive(Debug, Clone, Default)]
pub struct UserFilters {
    pub q: Option<String>,
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    pub course: Option<String>,
    pub year: Option<i64>,
}

fn push_user_filters<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filters: &'a UserFilters) {
    builder.push(" WHERE 1 = 1");

    if let Some(q) = filters.q.as_deref().filter(|q| !q.is_empty()) {
        let pattern = like_pattern(q);
        builder.push(" AND (u.code LIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" ESCAPE '\\' OR u.name LIKE ");
        builder.push_bind(pattern);
        builder.push(" ESCAPE '\\')");
    }
    if let Some(role) = filters.role {
        builder.push(" AND u.role = ").push_bind(role.as_str());
    }
    if let Some(status) = filters.status {
        builder.push(" AND u.status = ").push_bind(status.as_str());
    }
    if let Some(course) = filters.course.as_deref() {
        builder.push(" AND p.course = ").push_bind(course);
    }
    if let Some(year) = filters.year {
        builder.push(" AND p.year = ").push_bind(year);
    }
}

#[instrument(skip(pool))]
pub async fn list_users(
    pool: &SqlitePool,
    filters: &UserFilters,
    page: Page,
) -> Result<Paged<UserSummary>, AppError> {
    info!("Listing users");
    let mut count = QueryBuilder::<Sqlite>::new(
        "SELECT COUNT(*) FROM users u LEFT JOIN user_profile p ON p.user_id = u.id",
    );
    push_user_filters(&mut count, filters);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new(USER_SELECT);
    push_user_filters(&mut select, filters);
    select
        .push(" ORDER BY u.created_at DESC, u.code LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());

    let rows = select
        .build_query_as::<DbUserSummary>()
        .fetch_all(pool)
        .await?;
    let items = rows
        .into_iter()
        .map(UserSummary::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Paged { items, total, page })
}

#[instrument(skip(pool))]
pub async fn user_stats(pool: &SqlitePool) -> Result<UserStats, AppError> {
    info!("Counting users");
    let row: (i64, i64, i64, i64, i64, i64) = sqlx::query_as(
        "SELECT COUNT(*),
                COALESCE(SUM(status = 'ACTIVE'), 0),
                COALESCE(SUM(status = 'INACTIVE'), 0),
                COALESCE(SUM(role = 'ADMIN'), 0),
                COALESCE(SUM(role = 'CONTENT_MANAGER'), 0),
                COALESCE(SUM(role = 'USER'), 0)
         FROM users",
    )
    .fetch_one(pool)
    .await?;

    Ok(UserStats {
        total: row.0,
        active: row.1,
        inactive: row.2,
        admins: row.3,
        content_managers: row.4,
        users: row.5,
    })
}
