use chrono::{DateTime, NaiveDateTime, Utc};
use rocket::FromFormField;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Adds `as_str`, `FromStr` and `Display` for enums stored as upper-case text.
#[macro_export]
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err($crate::error::AppError::Validation(format!(
                        "Unknown {}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromFormField)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaterialKind {
    #[field(value = "MODULE")]
    Module,
    #[field(value = "PUBLICATION")]
    Publication,
}

text_enum!(MaterialKind {
    Module => "MODULE",
    Publication => "PUBLICATION",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromFormField)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    #[field(value = "PUBLIC")]
    Public,
    #[field(value = "PRIVATE")]
    Private,
}

text_enum!(Visibility {
    Public => "PUBLIC",
    Private => "PRIVATE",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromFormField)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaterialStatus {
    #[field(value = "ACTIVE")]
    Active,
    #[field(value = "INACTIVE")]
    Inactive,
}

text_enum!(MaterialStatus {
    Active => "ACTIVE",
    Inactive => "INACTIVE",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromFormField)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaterialType {
    #[field(value = "BOOK")]
    Book,
    #[field(value = "SCIENTIFIC_ARTICLE")]
    ScientificArticle,
    #[field(value = "MAGAZINE_ARTICLE")]
    MagazineArticle,
    #[field(value = "MANUAL")]
    Manual,
    #[field(value = "CROSS_CUTTING_THEME")]
    CrossCuttingTheme,
    #[field(value = "HANDOUT")]
    Handout,
    #[field(value = "TECHNICAL_REPORT")]
    TechnicalReport,
    #[field(value = "THESIS")]
    Thesis,
    #[field(value = "DISSERTATION")]
    Dissertation,
    #[field(value = "OTHER")]
    Other,
}

text_enum!(MaterialType {
    Book => "BOOK",
    ScientificArticle => "SCIENTIFIC_ARTICLE",
    MagazineArticle => "MAGAZINE_ARTICLE",
    Manual => "MANUAL",
    CrossCuttingTheme => "CROSS_CUTTING_THEME",
    Handout => "HANDOUT",
    TechnicalReport => "TECHNICAL_REPORT",
    Thesis => "THESIS",
    Dissertation => "DISSERTATION",
    Other => "OTHER",
});

pub fn to_utc(value: Option<NaiveDateTime>) -> DateTime<Utc> {
    value
        .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
        .unwrap_or_else(Utc::now)
}

fn stored<T>(column: &str, value: Option<String>) -> Result<T, AppError>
where
    T: std::str::FromStr<Err = AppError>,
{
    let value = value.unwrap_or_default();
    value
        .parse()
        .map_err(|_| AppError::Internal(format!("Unexpected {} value in storage: {}", column, value)))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Material {
    pub id: String,
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
    pub has_cover: bool,
    #[serde(skip)]
    pub cover_path: Option<String>,
    #[serde(skip)]
    pub pdf_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Default, Debug)]
pub struct DbMaterial {
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub kind: Option<String>,
    pub visibility: Option<String>,
    pub status: Option<String>,
    pub course: Option<String>,
    pub year: Option<i64>,
    pub semester: Option<i64>,
    pub material_type: Option<String>,
    pub author: Option<String>,
    pub publication_year: Option<i64>,
    pub cover_path: Option<String>,
    pub pdf_path: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl TryFrom<DbMaterial> for Material {
    type Error = AppError;

    fn try_from(db: DbMaterial) -> Result<Self, Self::Error> {
        let material_type = match db.material_type {
            Some(text) if !text.is_empty() => Some(stored("material_type", Some(text))?),
            _ => None,
        };

        Ok(Self {
            id: db.id.unwrap_or_default(),
            title: db.title.unwrap_or_default(),
            description: db.description,
            kind: stored("kind", db.kind)?,
            visibility: stored("visibility", db.visibility)?,
            status: stored("status", db.status)?,
            course: db.course,
            year: db.year,
            semester: db.semester,
            material_type,
            author: db.author,
            publication_year: db.publication_year,
            has_cover: db.cover_path.as_deref().is_some_and(|p| !p.is_empty()),
            cover_path: db.cover_path,
            pdf_path: db.pdf_path.unwrap_or_default(),
            created_at: to_utc(db.created_at),
            updated_at: to_utc(db.updated_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialProgress {
    #[serde(flatten)]
    pub material: Material,
    pub current_page: i64,
    pub total_pages: i64,
    pub percentage: f64,
    pub reading_time_seconds: i64,
    pub last_read_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbMaterialProgress {
    #[sqlx(flatten)]
    pub material: DbMaterial,
    pub current_page: Option<i64>,
    pub total_pages: Option<i64>,
    pub percentage: Option<f64>,
    pub reading_time_seconds: Option<i64>,
    pub last_read_at: Option<NaiveDateTime>,
}

impl TryFrom<DbMaterialProgress> for MaterialProgress {
    type Error = AppError;

    fn try_from(db: DbMaterialProgress) -> Result<Self, Self::Error> {
        Ok(Self {
            material: Material::try_from(db.material)?,
            current_page: db.current_page.unwrap_or_default(),
            total_pages: db.total_pages.unwrap_or_default(),
            percentage: db.percentage.unwrap_or_default(),
            reading_time_seconds: db.reading_time_seconds.unwrap_or_default(),
            last_read_at: to_utc(db.last_read_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingProgress {
    pub material_id: String,
    pub current_page: i64,
    pub total_pages: i64,
    pub percentage: f64,
    pub reading_time_seconds: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbReadingProgress {
    pub material_id: Option<String>,
    pub current_page: Option<i64>,
    pub total_pages: Option<i64>,
    pub percentage: Option<f64>,
    pub reading_time_seconds: Option<i64>,
    pub updated_at: Option<NaiveDateTime>,
}

impl From<DbReadingProgress> for ReadingProgress {
    fn from(db: DbReadingProgress) -> Self {
        Self {
            material_id: db.material_id.unwrap_or_default(),
            current_page: db.current_page.unwrap_or_default(),
            total_pages: db.total_pages.unwrap_or_default(),
            percentage: db.percentage.unwrap_or_default(),
            reading_time_seconds: db.reading_time_seconds.unwrap_or_default(),
            updated_at: to_utc(db.updated_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub material_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbCollection {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl Collection {
    pub fn from_row(db: DbCollection, material_ids: Vec<String>) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            name: db.name.unwrap_or_default(),
            description: db.description,
            material_ids,
            created_at: to_utc(db.created_at),
            updated_at: to_utc(db.updated_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderNote {
    pub id: String,
    pub material_id: String,
    pub page: i64,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbReaderNote {
    pub id: Option<String>,
    pub material_id: Option<String>,
    pub page: Option<i64>,
    pub text: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl From<DbReaderNote> for ReaderNote {
    fn from(db: DbReaderNote) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            material_id: db.material_id.unwrap_or_default(),
            page: db.page.unwrap_or_default(),
            text: db.text.unwrap_or_default(),
            created_at: to_utc(db.created_at),
            updated_at: to_utc(db.updated_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub duration_years: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbCourse {
    pub id: Option<String>,
    pub name: Option<String>,
    pub active: Option<bool>,
    pub duration_years: Option<i64>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl From<DbCourse> for Course {
    fn from(db: DbCourse) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            name: db.name.unwrap_or_default(),
            active: db.active.unwrap_or(true),
            duration_years: db.duration_years.unwrap_or(4),
            created_at: to_utc(db.created_at),
            updated_at: to_utc(db.updated_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcademicSettings {
    pub current_semester: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub user_id: Option<String>,
    pub action: String,
    pub target_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbAuditLogEntry {
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub target_id: Option<String>,
    pub metadata: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbAuditLogEntry> for AuditLogEntry {
    fn from(db: DbAuditLogEntry) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            user_id: db.user_id,
            action: db.action.unwrap_or_default(),
            target_id: db.target_id,
            metadata: db
                .metadata
                .and_then(|raw| serde_json::from_str(&raw).ok()),
            created_at: to_utc(db.created_at),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserStats {
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
    pub admins: i64,
    pub content_managers: i64,
    pub users: i64,
}
