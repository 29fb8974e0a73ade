use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::access::{restrict_to_accessible, restrict_to_public};
use crate::auth::AuthUser;
use crate::error::AppError;
use crate::models::{
    DbMaterial, Material, MaterialKind, MaterialStatus, MaterialType, Visibility,
};

use super::{Page, Paged, like_pattern, now};

pub const MATERIAL_COLUMNS: &str = "m.id, m.title, m.description, m.kind, m.visibility, m.status, \
     m.course, m.year, m.semester, m.material_type, m.author, m.publication_year, \
     m.cover_path, m.pdf_path, m.created_at, m.updated_at";

#[derive(Debug, Clone)]
pub struct NewMaterial {
    pub title: String,
    pub description: Option<String>,
    pub kind: MaterialKind,
    pub visibility: Visibility,
    pub status: MaterialStatus,
    pub course: Option<String>,
    pub year: Option<i64>,
    pub semester: Option<i64>,
    pub material_type: Option<MaterialType>,
    pub author: Option<String>,
    pub publication_year: Option<i64>,
    pub cover_path: Option<String>,
    pub pdf_path: String,
    pub created_by: Option<String>,
}

fn into_materials(rows: Vec<DbMaterial>) -> Result<Vec<Material>, AppError> {
    rows.into_iter().map(Material::try_from).collect()
}

#[instrument(skip(pool, material), fields(title = %material.title))]
pub async fn insert_material(pool: &SqlitePool, material: &NewMaterial) -> Result<Material, AppError> {
    info!("Inserting material");
    let id = Uuid::new_v4().to_string();
    let timestamp = now();

    sqlx::query(
        "INSERT INTO materials (id, title, description, kind, visibility, status, course, year, semester,
             material_type, author, publication_year, cover_path, pdf_path, created_by, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&material.title)
    .bind(&material.description)
    .bind(material.kind.as_str())
    .bind(material.visibility.as_str())
    .bind(material.status.as_str())
    .bind(&material.course)
    .bind(material.year)
    .bind(material.semester)
    .bind(material.material_type.map(|t| t.as_str()))
    .bind(&material.author)
    .bind(material.publication_year)
    .bind(&material.cover_path)
    .bind(&material.pdf_path)
    .bind(&material.created_by)
    .bind(timestamp)
    .bind(timestamp)
    .execute(pool)
    .await?;

    get_material(pool, &id)
        .await?
        .ok_or_else(|| AppError::Internal("Inserted material vanished".to_string()))
}

#[instrument(skip(pool))]
pub async fn get_material(pool: &SqlitePool, id: &str) -> Result<Option<Material>, AppError> {
    info!("Fetching material");
    let row = sqlx::query_as::<_, DbMaterial>(&format!(
        "SELECT {} FROM materials m WHERE m.id = ?",
        MATERIAL_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(Material::try_from).transpose()
}

/// Who is looking at the catalog.
#[derive(Debug, Clone, Copy)]
pub enum Audience<'a> {
    Member(&'a AuthUser),
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    CreatedAt,
    #[default]
    UpdatedAt,
}

#[derive(Debug, Clone, Default)]
pub struct MaterialFilters {
    pub q: Option<String>,
    pub kind: Option<MaterialKind>,
    pub material_type: Option<MaterialType>,
    pub course: Option<String>,
    pub year: Option<i64>,
    pub semester: Option<i64>,
    pub author: Option<String>,
    pub publication_year: Option<i64>,
    pub visibility: Option<Visibility>,
    pub status: Option<MaterialStatus>,
    pub sort_by: SortBy,
}

fn push_material_filters<'a>(
    builder: &mut QueryBuilder<'a, Sqlite>,
    audience: Audience<'_>,
    filters: &'a MaterialFilters,
) {
    builder.push(" WHERE 1 = 1");

    match audience {
        Audience::Public => restrict_to_public(builder, "m"),
        Audience::Member(user) => {
            restrict_to_accessible(builder, "m", user);
            let status = if user.is_staff() {
                filters.status
            } else {
                Some(MaterialStatus::Active)
            };
            if let Some(status) = status {
                builder.push(" AND m.status = ").push_bind(status.as_str());
            }
        }
    }

    if let Some(q) = filters.q.as_deref().filter(|q| !q.is_empty()) {
        let pattern = like_pattern(q);
        builder.push(" AND (");
        for (idx, column) in ["m.title", "m.description", "m.course", "m.author"]
            .into_iter()
            .enumerate()
        {
            if idx > 0 {
                builder.push(" OR ");
            }
            builder.push(format!("{} LIKE ", column));
            builder.push_bind(pattern.clone());
            builder.push(" ESCAPE '\\'");
        }
        builder.push(")");
    }
    if let Some(kind) = filters.kind {
        builder.push(" AND m.kind = ").push_bind(kind.as_str());
    }
    if let Some(material_type) = filters.material_type {
        builder
            .push(" AND m.material_type = ")
            .push_bind(material_type.as_str());
    }
    if let Some(course) = filters.course.as_deref() {
        builder.push(" AND m.course = ").push_bind(course);
    }
    if let Some(year) = filters.year {
        builder.push(" AND m.year = ").push_bind(year);
    }
    if let Some(semester) = filters.semester {
        builder.push(" AND m.semester = ").push_bind(semester);
    }
    if let Some(author) = filters.author.as_deref() {
        builder
            .push(" AND m.author LIKE ")
            .push_bind(like_pattern(author))
            .push(" ESCAPE '\\'");
    }
    if let Some(publication_year) = filters.publication_year {
        builder
            .push(" AND m.publication_year = ")
            .push_bind(publication_year);
    }
    if let Some(visibility) = filters.visibility {
        builder.push(" AND m.visibility = ").push_bind(visibility.as_str());
    }
}

#[instrument(skip(pool, audience))]
pub async fn list_materials(
    pool: &SqlitePool,
    audience: Audience<'_>,
    filters: &MaterialFilters,
    page: Page,
) -> Result<Paged<Material>, AppError> {
    info!("Listing materials");
    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM materials m");
    push_material_filters(&mut count, audience, filters);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let order = match filters.sort_by {
        SortBy::CreatedAt => "m.created_at",
        SortBy::UpdatedAt => "m.updated_at",
    };

    let mut select =
        QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM materials m", MATERIAL_COLUMNS));
    push_material_filters(&mut select, audience, filters);
    select
        .push(format!(" ORDER BY {} DESC, m.id LIMIT ", order))
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());

    let rows = select.build_query_as::<DbMaterial>().fetch_all(pool).await?;

    Ok(Paged {
        items: into_materials(rows)?,
        total,
        page,
    })
}

/// Private cross-cutting-theme publications. Non-staff only see active ones
/// of their own course.
#[instrument(skip(pool, user), fields(user_id = %user.id))]
pub async fn list_cross_cutting_themes(
    pool: &SqlitePool,
    user: &AuthUser,
) -> Result<Vec<Material>, AppError> {
    info!("Listing cross-cutting themes");
    let mut builder =
        QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM materials m WHERE m.kind = ", MATERIAL_COLUMNS));
    builder.push_bind(MaterialKind::Publication.as_str());
    builder.push(" AND m.visibility = ");
    builder.push_bind(Visibility::Private.as_str());
    builder.push(" AND m.material_type = ");
    builder.push_bind(MaterialType::CrossCuttingTheme.as_str());

    if !user.is_staff() {
        let Some(course) = user.enrolled_course() else {
            return Ok(Vec::new());
        };
        builder.push(" AND m.status = ");
        builder.push_bind(MaterialStatus::Active.as_str());
        builder.push(" AND m.course = ");
        builder.push_bind(course.to_string());
    }
    builder.push(" ORDER BY m.updated_at DESC, m.id");

    let rows = builder.build_query_as::<DbMaterial>().fetch_all(pool).await?;
    into_materials(rows)
}

#[instrument(skip(pool))]
pub async fn list_course_modules(pool: &SqlitePool, course: &str) -> Result<Vec<Material>, AppError> {
    info!("Listing modules for course");
    let rows = sqlx::query_as::<_, DbMaterial>(&format!(
        "SELECT {} FROM materials m
         WHERE m.kind = 'MODULE' AND m.status = 'ACTIVE' AND m.course = ?
         ORDER BY m.year, m.semester, m.title",
        MATERIAL_COLUMNS
    ))
    .bind(course)
    .fetch_all(pool)
    .await?;

    into_materials(rows)
}

/// Writes every mutable column of an already-merged material.
#[instrument(skip(pool, material), fields(material_id = %material.id))]
pub async fn save_material(pool: &SqlitePool, material: &Material) -> Result<Material, AppError> {
    info!("Saving material");
    sqlx::query(
        "UPDATE materials SET title = ?, description = ?, kind = ?, visibility = ?, status = ?,
             course = ?, year = ?, semester = ?, material_type = ?, author = ?, publication_year = ?,
             updated_at = ?
         WHERE id = ?",
    )
    .bind(&material.title)
    .bind(&material.description)
    .bind(material.kind.as_str())
    .bind(material.visibility.as_str())
    .bind(material.status.as_str())
    .bind(&material.course)
    .bind(material.year)
    .bind(material.semester)
    .bind(material.material_type.map(|t| t.as_str()))
    .bind(&material.author)
    .bind(material.publication_year)
    .bind(now())
    .bind(&material.id)
    .execute(pool)
    .await?;

    get_material(pool, &material.id)
        .await?
        .ok_or_else(|| AppError::not_found("Material not found"))
}

#[instrument(skip(pool))]
pub async fn set_material_status(
    pool: &SqlitePool,
    id: &str,
    status: MaterialStatus,
) -> Result<Option<Material>, AppError> {
    info!("Updating material status");
    let result = sqlx::query("UPDATE materials SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now())
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }
    get_material(pool, id).await
}

/// Deletes the row and returns it so the caller can remove its files.
#[instrument(skip(pool))]
pub async fn delete_material(pool: &SqlitePool, id: &str) -> Result<Option<Material>, AppError> {
    info!("Deleting material");
    let Some(material) = get_material(pool, id).await? else {
        return Ok(None);
    };

    sqlx::query("DELETE FROM materials WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(Some(material))
}
