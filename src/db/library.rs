use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::access::restrict_to_accessible;
use crate::auth::AuthUser;
use crate::error::AppError;
use crate::models::{
    Collection, DbCollection, DbMaterialProgress, DbReaderNote, DbReadingProgress,
    MaterialProgress, ReaderNote, ReadingProgress,
};

use super::materials::MATERIAL_COLUMNS;
use super::{Page, Paged, now};

// Favorites

#[instrument(skip(pool))]
pub async fn list_favorite_ids(pool: &SqlitePool, user_id: &str) -> Result<Vec<String>, AppError> {
    info!("Listing favorites");
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT material_id FROM favorites WHERE user_id = ? ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

#[instrument(skip(pool))]
pub async fn add_favorite(pool: &SqlitePool, user_id: &str, material_id: &str) -> Result<(), AppError> {
    info!("Adding favorite");
    sqlx::query(
        "INSERT INTO favorites (user_id, material_id, created_at) VALUES (?, ?, ?)
         ON CONFLICT (user_id, material_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(material_id)
    .bind(now())
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn remove_favorite(
    pool: &SqlitePool,
    user_id: &str,
    material_id: &str,
) -> Result<(), AppError> {
    info!("Removing favorite");
    sqlx::query("DELETE FROM favorites WHERE user_id = ? AND material_id = ?")
        .bind(user_id)
        .bind(material_id)
        .execute(pool)
        .await?;
    Ok(())
}

// Collections

async fn collection_items(
    conn: &mut SqliteConnection,
    collection_id: &str,
) -> Result<Vec<String>, AppError> {
    let ids = sqlx::query_scalar::<_, String>(
        "SELECT material_id FROM collection_items WHERE collection_id = ? ORDER BY added_at, material_id",
    )
    .bind(collection_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Adds the ids that name existing materials; unknown ids are skipped.
async fn insert_items(
    conn: &mut SqliteConnection,
    collection_id: &str,
    material_ids: &[String],
) -> Result<(), AppError> {
    for material_id in material_ids {
        sqlx::query(
            "INSERT INTO collection_items (collection_id, material_id, added_at)
             SELECT ?, id, ? FROM materials WHERE id = ?
             ON CONFLICT (collection_id, material_id) DO NOTHING",
        )
        .bind(collection_id)
        .bind(now())
        .bind(material_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn owned_collection_row(
    conn: &mut SqliteConnection,
    user_id: &str,
    id: &str,
) -> Result<Option<DbCollection>, AppError> {
    let row = sqlx::query_as::<_, DbCollection>(
        "SELECT id, name, description, created_at, updated_at
         FROM collections WHERE id = ? AND user_id = ?",
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

#[instrument(skip(pool))]
pub async fn list_collections(pool: &SqlitePool, user_id: &str) -> Result<Vec<Collection>, AppError> {
    info!("Listing collections");
    let mut conn = pool.acquire().await?;
    let rows = sqlx::query_as::<_, DbCollection>(
        "SELECT id, name, description, created_at, updated_at
         FROM collections WHERE user_id = ? ORDER BY updated_at DESC, id",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut collections = Vec::with_capacity(rows.len());
    for row in rows {
        let items = collection_items(&mut conn, row.id.as_deref().unwrap_or_default()).await?;
        collections.push(Collection::from_row(row, items));
    }
    Ok(collections)
}

#[instrument(skip(pool))]
pub async fn get_collection(
    pool: &SqlitePool,
    user_id: &str,
    id: &str,
) -> Result<Option<Collection>, AppError> {
    let mut conn = pool.acquire().await?;
    let Some(row) = owned_collection_row(&mut conn, user_id, id).await? else {
        return Ok(None);
    };
    let items = collection_items(&mut conn, id).await?;
    Ok(Some(Collection::from_row(row, items)))
}

#[instrument(skip(pool, description, material_ids))]
pub async fn create_collection(
    pool: &SqlitePool,
    user_id: &str,
    name: &str,
    description: Option<&str>,
    material_ids: &[String],
) -> Result<Collection, AppError> {
    info!("Creating collection");
    let id = Uuid::new_v4().to_string();
    let timestamp = now();

    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO collections (id, user_id, name, description, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(user_id)
    .bind(name)
    .bind(description)
    .bind(timestamp)
    .bind(timestamp)
    .execute(&mut *tx)
    .await?;
    insert_items(&mut tx, &id, material_ids).await?;

    let row = owned_collection_row(&mut tx, user_id, &id)
        .await?
        .ok_or_else(|| AppError::Internal("Created collection vanished".to_string()))?;
    let items = collection_items(&mut tx, &id).await?;
    tx.commit().await?;

    Ok(Collection::from_row(row, items))
}

#[derive(Debug, Clone, Default)]
pub struct CollectionChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub material_ids: Option<Vec<String>>,
}

impl CollectionChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.material_ids.is_none()
    }
}

/// Applies changes to an owned collection; a given id list replaces the items.
#[instrument(skip(pool, changes))]
pub async fn update_collection(
    pool: &SqlitePool,
    user_id: &str,
    id: &str,
    changes: &CollectionChanges,
) -> Result<Option<Collection>, AppError> {
    info!("Updating collection");
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "UPDATE collections SET name = COALESCE(?, name), description = COALESCE(?, description), updated_at = ?
         WHERE id = ? AND user_id = ?",
    )
    .bind(&changes.name)
    .bind(&changes.description)
    .bind(now())
    .bind(id)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(None);
    }

    if let Some(material_ids) = &changes.material_ids {
        sqlx::query("DELETE FROM collection_items WHERE collection_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_items(&mut tx, id, material_ids).await?;
    }

    let row = owned_collection_row(&mut tx, user_id, id).await?;
    let items = collection_items(&mut tx, id).await?;
    tx.commit().await?;

    Ok(row.map(|row| Collection::from_row(row, items)))
}

#[instrument(skip(pool))]
pub async fn delete_collection(pool: &SqlitePool, user_id: &str, id: &str) -> Result<bool, AppError> {
    info!("Deleting collection");
    let result = sqlx::query("DELETE FROM collections WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Returns `None` when the collection is not the caller's.
#[instrument(skip(pool))]
pub async fn add_collection_item(
    pool: &SqlitePool,
    user_id: &str,
    id: &str,
    material_id: &str,
) -> Result<Option<Collection>, AppError> {
    info!("Adding collection item");
    let mut tx = pool.begin().await?;
    if owned_collection_row(&mut tx, user_id, id).await?.is_none() {
        tx.rollback().await?;
        return Ok(None);
    }

    insert_items(&mut tx, id, &[material_id.to_string()]).await?;
    sqlx::query("UPDATE collections SET updated_at = ? WHERE id = ?")
        .bind(now())
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let row = owned_collection_row(&mut tx, user_id, id).await?;
    let items = collection_items(&mut tx, id).await?;
    tx.commit().await?;

    Ok(row.map(|row| Collection::from_row(row, items)))
}

#[instrument(skip(pool))]
pub async fn remove_collection_item(
    pool: &SqlitePool,
    user_id: &str,
    id: &str,
    material_id: &str,
) -> Result<bool, AppError> {
    info!("Removing collection item");
    let result = sqlx::query(
        "DELETE FROM collection_items
         WHERE collection_id = ? AND material_id = ?
           AND EXISTS (SELECT 1 FROM collections c WHERE c.id = ? AND c.user_id = ?)",
    )
    .bind(id)
    .bind(material_id)
    .bind(id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

// Reading progress

const PROGRESS_COLUMNS: &str = "rp.material_id, rp.current_page, rp.total_pages, rp.percentage, \
     rp.reading_time_seconds, rp.updated_at";

/// Page position as a percentage, capped at 100. Zero when the total is unknown.
pub fn progress_percentage(current_page: i64, total_pages: i64) -> f64 {
    if total_pages <= 0 {
        return 0.0;
    }
    (current_page as f64 / total_pages as f64 * 100.0).min(100.0)
}

#[instrument(skip(pool))]
pub async fn get_progress(
    pool: &SqlitePool,
    user_id: &str,
    material_id: &str,
) -> Result<Option<ReadingProgress>, AppError> {
    info!("Fetching reading progress");
    let row = sqlx::query_as::<_, DbReadingProgress>(&format!(
        "SELECT {} FROM reading_progress rp WHERE rp.user_id = ? AND rp.material_id = ?",
        PROGRESS_COLUMNS
    ))
    .bind(user_id)
    .bind(material_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(ReadingProgress::from))
}

/// Progress rows for materials the user can still open.
#[instrument(skip(pool, user), fields(user_id = %user.id))]
pub async fn list_progress(pool: &SqlitePool, user: &AuthUser) -> Result<Vec<ReadingProgress>, AppError> {
    info!("Listing reading progress");
    let mut builder = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM reading_progress rp JOIN materials m ON m.id = rp.material_id WHERE rp.user_id = ",
        PROGRESS_COLUMNS
    ));
    builder.push_bind(user.id.clone());
    restrict_to_accessible(&mut builder, "m", user);
    builder.push(" ORDER BY rp.updated_at DESC");

    let rows = builder
        .build_query_as::<DbReadingProgress>()
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(ReadingProgress::from).collect())
}

#[instrument(skip(pool, user), fields(user_id = %user.id))]
pub async fn list_progress_materials(
    pool: &SqlitePool,
    user: &AuthUser,
    page: Page,
) -> Result<Paged<MaterialProgress>, AppError> {
    info!("Listing materials with reading progress");
    let mut count = QueryBuilder::<Sqlite>::new(
        "SELECT COUNT(*) FROM reading_progress rp JOIN materials m ON m.id = rp.material_id WHERE rp.user_id = ",
    );
    count.push_bind(user.id.clone());
    restrict_to_accessible(&mut count, "m", user);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {}, rp.current_page, rp.total_pages, rp.percentage, rp.reading_time_seconds,
                rp.updated_at AS last_read_at
         FROM reading_progress rp JOIN materials m ON m.id = rp.material_id WHERE rp.user_id = ",
        MATERIAL_COLUMNS
    ));
    select.push_bind(user.id.clone());
    restrict_to_accessible(&mut select, "m", user);
    select
        .push(" ORDER BY rp.updated_at DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());

    let rows = select
        .build_query_as::<DbMaterialProgress>()
        .fetch_all(pool)
        .await?;
    let items = rows
        .into_iter()
        .map(MaterialProgress::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Paged { items, total, page })
}

/// Records the page position. Accumulated reading time is left untouched.
#[instrument(skip(pool))]
pub async fn save_page_position(
    pool: &SqlitePool,
    user_id: &str,
    material_id: &str,
    current_page: i64,
    total_pages: i64,
) -> Result<ReadingProgress, AppError> {
    info!("Saving page position");
    sqlx::query(
        "INSERT INTO reading_progress (user_id, material_id, current_page, total_pages, percentage, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT (user_id, material_id) DO UPDATE SET
             current_page = excluded.current_page,
             total_pages = excluded.total_pages,
             percentage = excluded.percentage,
             updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(material_id)
    .bind(current_page)
    .bind(total_pages)
    .bind(progress_percentage(current_page, total_pages))
    .bind(now())
    .execute(pool)
    .await?;

    get_progress(pool, user_id, material_id)
        .await?
        .ok_or_else(|| AppError::Internal("Saved progress vanished".to_string()))
}

/// Adds `seconds` to the running total for this user and material.
#[instrument(skip(pool))]
pub async fn add_reading_time(
    pool: &SqlitePool,
    user_id: &str,
    material_id: &str,
    seconds: i64,
) -> Result<ReadingProgress, AppError> {
    info!("Accumulating reading time");
    sqlx::query(
        "INSERT INTO reading_progress (user_id, material_id, reading_time_seconds, updated_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (user_id, material_id) DO UPDATE SET
             reading_time_seconds = reading_progress.reading_time_seconds + excluded.reading_time_seconds,
             updated_at = excluded.updated_at",
    )
    .bind(user_id)
    .bind(material_id)
    .bind(seconds)
    .bind(now())
    .execute(pool)
    .await?;

    get_progress(pool, user_id, material_id)
        .await?
        .ok_or_else(|| AppError::Internal("Saved progress vanished".to_string()))
}

// Reader notes

#[instrument(skip(pool))]
pub async fn list_notes(
    pool: &SqlitePool,
    user_id: &str,
    material_id: &str,
) -> Result<Vec<ReaderNote>, AppError> {
    info!("Listing reader notes");
    let rows = sqlx::query_as::<_, DbReaderNote>(
        "SELECT id, material_id, page, text, created_at, updated_at
         FROM reader_notes WHERE user_id = ? AND material_id = ?
         ORDER BY page, created_at",
    )
    .bind(user_id)
    .bind(material_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(ReaderNote::from).collect())
}

#[instrument(skip(pool, text))]
pub async fn create_note(
    pool: &SqlitePool,
    user_id: &str,
    material_id: &str,
    page: i64,
    text: &str,
) -> Result<ReaderNote, AppError> {
    info!("Creating reader note");
    let id = Uuid::new_v4().to_string();
    let timestamp = now();

    let row = sqlx::query_as::<_, DbReaderNote>(
        "INSERT INTO reader_notes (id, user_id, material_id, page, text, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         RETURNING id, material_id, page, text, created_at, updated_at",
    )
    .bind(&id)
    .bind(user_id)
    .bind(material_id)
    .bind(page)
    .bind(text)
    .bind(timestamp)
    .bind(timestamp)
    .fetch_one(pool)
    .await?;
    Ok(ReaderNote::from(row))
}

#[instrument(skip(pool))]
pub async fn delete_note(pool: &SqlitePool, user_id: &str, id: &str) -> Result<bool, AppError> {
    info!("Deleting reader note");
    let result = sqlx::query("DELETE FROM reader_notes WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
