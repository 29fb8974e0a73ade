use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Once;
use std::time::Duration;

use rocket::http::Header;
use rocket::local::asynchronous::{Client, LocalResponse};
use serde_json::Value;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;
use tracing::log::LevelFilter;

use crate::auth::{BcryptHasher, PasswordHasher, Role, TokenService, UserStatus};
use crate::config::{AppConfig, PoolConfig, StorageConfig};
use crate::db::admin::set_current_semester;
use crate::db::materials::{NewMaterial, insert_material};
use crate::db::users::{NewUser, create_user_with_profile};
use crate::error::AppError;
use crate::models::{MaterialKind, MaterialStatus, MaterialType, Visibility};
use crate::storage::CoverSettings;
use crate::{AppState, init_rocket};

static INIT: Once = Once::new();
pub const STANDARD_PASSWORD: &str = "password123";
const TEST_SECRET: &str = "integration-test-signing-secret";
const TEST_BCRYPT_COST: u32 = 4;

const LEGACY_SCHEMA: &str = "CREATE TABLE cead_users (
    code TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    password_hash TEXT NOT NULL
)";

/// A single-connection in-memory database; the connection never idles out.
pub async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap()
}

pub fn pdf_bytes(body_len: usize) -> Vec<u8> {
    let mut bytes = b"%PDF-1.4\n".to_vec();
    bytes.extend(std::iter::repeat_n(b'a', body_len));
    bytes.extend_from_slice(b"\n%%EOF\n");
    bytes
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

pub struct TestUser {
    pub code: String,
    pub name: String,
    pub role: Role,
    pub status: UserStatus,
    pub course: Option<String>,
    pub year: Option<i64>,
    pub must_change_password: bool,
    pub completed_profile: bool,
}

pub struct LegacyAccount {
    pub code: String,
    pub name: String,
    pub password: String,
}

#[derive(Clone)]
pub struct MaterialSeed {
    pub kind: MaterialKind,
    pub visibility: Visibility,
    pub status: MaterialStatus,
    pub course: Option<String>,
    pub material_type: Option<MaterialType>,
    pub pdf: Option<Vec<u8>>,
    pub cover: Option<Vec<u8>>,
}

impl MaterialSeed {
    pub fn module(course: &str) -> Self {
        Self {
            kind: MaterialKind::Module,
            visibility: Visibility::Private,
            status: MaterialStatus::Active,
            course: Some(course.to_string()),
            material_type: None,
            pdf: Some(pdf_bytes(64)),
            cover: None,
        }
    }

    pub fn publication(visibility: Visibility, course: Option<&str>) -> Self {
        Self {
            kind: MaterialKind::Publication,
            visibility,
            status: MaterialStatus::Active,
            course: course.map(String::from),
            material_type: Some(MaterialType::Book),
            pdf: Some(pdf_bytes(64)),
            cover: None,
        }
    }

    pub fn material_type(mut self, material_type: MaterialType) -> Self {
        self.material_type = Some(material_type);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.status = MaterialStatus::Inactive;
        self
    }

    pub fn pdf(mut self, bytes: Vec<u8>) -> Self {
        self.pdf = Some(bytes);
        self
    }

    /// Catalog row whose PDF was never written to disk.
    pub fn without_pdf_file(mut self) -> Self {
        self.pdf = None;
        self
    }

    pub fn cover(mut self, bytes: Vec<u8>) -> Self {
        self.cover = Some(bytes);
        self
    }
}

#[derive(Default)]
pub struct TestEnvBuilder {
    users: Vec<TestUser>,
    legacy: Vec<LegacyAccount>,
    materials: Vec<(String, MaterialSeed)>,
    semester: Option<i64>,
}

impl TestEnvBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_user(mut self, code: &str, role: Role, course: Option<&str>) -> Self {
        let staff = role.is_staff();
        self.users.push(TestUser {
            code: code.to_string(),
            name: format!("{} name", code),
            role,
            status: UserStatus::Active,
            course: course.map(String::from),
            year: course.map(|_| 1),
            must_change_password: false,
            completed_profile: staff || course.is_some(),
        });
        self
    }

    pub fn user(self, code: &str, course: Option<&str>) -> Self {
        self.push_user(code, Role::User, course)
    }

    pub fn content_manager(self, code: &str) -> Self {
        self.push_user(code, Role::ContentManager, None)
    }

    pub fn admin(self, code: &str) -> Self {
        self.push_user(code, Role::Admin, None)
    }

    pub fn inactive_user(mut self, code: &str) -> Self {
        self = self.push_user(code, Role::User, Some("Engenharia"));
        if let Some(user) = self.users.last_mut() {
            user.status = UserStatus::Inactive;
        }
        self
    }

    pub fn user_needing_password_change(mut self, code: &str) -> Self {
        self = self.push_user(code, Role::User, Some("Engenharia"));
        if let Some(user) = self.users.last_mut() {
            user.must_change_password = true;
        }
        self
    }

    pub fn legacy_account(mut self, code: &str, name: &str, password: &str) -> Self {
        self.legacy.push(LegacyAccount {
            code: code.to_string(),
            name: name.to_string(),
            password: password.to_string(),
        });
        self
    }

    pub fn material(mut self, key: &str, seed: MaterialSeed) -> Self {
        self.materials.push((key.to_string(), seed));
        self
    }

    pub fn semester(mut self, semester: i64) -> Self {
        self.semester = Some(semester);
        self
    }

    pub async fn build(self) -> Result<TestEnv, AppError> {
        INIT.call_once(|| {
            let _ = env_logger::builder()
                .filter_level(LevelFilter::Debug)
                .is_test(true)
                .try_init();
        });

        let pool = memory_pool().await;
        sqlx::migrate!("./migrations").run(&pool).await?;

        let legacy = memory_pool().await;
        sqlx::query(LEGACY_SCHEMA).execute(&legacy).await?;

        let storage = tempfile::tempdir()?;
        let pdf_dir = storage.path().join("pdfs");
        let cover_dir = storage.path().join("covers");
        std::fs::create_dir_all(&pdf_dir)?;
        std::fs::create_dir_all(&cover_dir)?;

        let config = AppConfig {
            jwt_secret: TEST_SECRET.to_string(),
            token_ttl: Duration::from_secs(3600),
            cookie_name: "auth_token".to_string(),
            local_database_url: "sqlite::memory:".to_string(),
            legacy_database_url: "sqlite::memory:".to_string(),
            storage: StorageConfig {
                pdf_dir: pdf_dir.clone(),
                cover_dir: cover_dir.clone(),
            },
            pool: PoolConfig::default(),
            bcrypt_cost: TEST_BCRYPT_COST,
            default_user_password: "123456".to_string(),
            upload_limit_bytes: 5 * 1024 * 1024,
            cover: CoverSettings::default(),
        };

        let hasher = BcryptHasher::new(TEST_BCRYPT_COST);
        let mut user_ids = HashMap::new();
        for user in &self.users {
            let id = create_user_with_profile(
                &pool,
                &NewUser {
                    code: user.code.clone(),
                    name: user.name.clone(),
                    password_hash: hasher.hash(STANDARD_PASSWORD)?,
                    role: user.role,
                    status: user.status,
                    must_change_password: user.must_change_password,
                    course: user.course.clone(),
                    year: user.year,
                    semester: user.course.as_ref().map(|_| 1),
                    completed_profile: user.completed_profile,
                },
            )
            .await?;
            user_ids.insert(user.code.clone(), id);
        }

        for account in &self.legacy {
            sqlx::query("INSERT INTO cead_users (code, name, password_hash) VALUES (?, ?, ?)")
                .bind(&account.code)
                .bind(&account.name)
                .bind(hasher.hash(&account.password)?)
                .execute(&legacy)
                .await?;
        }

        let mut material_ids = HashMap::new();
        for (key, seed) in &self.materials {
            let pdf_name = format!("{}.pdf", uuid::Uuid::new_v4());
            if let Some(bytes) = &seed.pdf {
                std::fs::write(pdf_dir.join(&pdf_name), bytes)?;
            }
            let cover_path = match &seed.cover {
                Some(bytes) => {
                    let name = format!("{}.png", uuid::Uuid::new_v4());
                    std::fs::write(cover_dir.join(&name), bytes)?;
                    Some(name)
                }
                None => None,
            };

            let material = insert_material(
                &pool,
                &NewMaterial {
                    title: format!("Material {}", key),
                    description: Some(format!("Seeded material {}", key)),
                    kind: seed.kind,
                    visibility: seed.visibility,
                    status: seed.status,
                    course: seed.course.clone(),
                    year: Some(1),
                    semester: Some(1),
                    material_type: seed.material_type,
                    author: Some("Seed Author".to_string()),
                    publication_year: Some(2020),
                    cover_path,
                    pdf_path: pdf_name,
                    created_by: None,
                },
            )
            .await?;
            material_ids.insert(key.clone(), material.id);
        }

        if let Some(semester) = self.semester {
            set_current_semester(&pool, semester).await?;
        }

        Ok(TestEnv {
            pool,
            legacy,
            config,
            storage,
            tokens: TokenService::new(TEST_SECRET, Duration::from_secs(3600)),
            user_ids,
            material_ids,
        })
    }
}

pub struct TestEnv {
    pub pool: SqlitePool,
    pub legacy: SqlitePool,
    pub config: AppConfig,
    pub storage: TempDir,
    pub tokens: TokenService,
    user_ids: HashMap<String, String>,
    material_ids: HashMap<String, String>,
}

impl TestEnv {
    pub fn user_id(&self, code: &str) -> String {
        self.user_ids[code].clone()
    }

    pub fn material_id(&self, key: &str) -> String {
        self.material_ids[key].clone()
    }

    pub fn pdf_dir(&self) -> PathBuf {
        self.config.storage.pdf_dir.clone()
    }

    pub fn cover_dir(&self) -> PathBuf {
        self.config.storage.cover_dir.clone()
    }

    /// `Authorization` header carrying a fresh token for a seeded user.
    pub fn bearer(&self, code: &str) -> Header<'static> {
        let token = self.tokens.issue(&self.user_id(code)).unwrap();
        Header::new("Authorization", format!("Bearer {}", token))
    }

    pub async fn client(&self) -> Client {
        let state = AppState {
            config: self.config.clone(),
            local: self.pool.clone(),
            legacy: self.legacy.clone(),
        };
        Client::tracked(init_rocket(state)).await.unwrap()
    }
}

pub fn files_in(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub async fn json_body(response: LocalResponse<'_>) -> Value {
    response.into_json::<Value>().await.unwrap()
}

/// Hand-built `multipart/form-data` body.
pub struct Multipart {
    boundary: String,
    body: Vec<u8>,
}

impl Multipart {
    pub fn new() -> Self {
        Self {
            boundary: "biblioteca-test-boundary".to_string(),
            body: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary, name, value
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                self.boundary, name, file_name, content_type
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn content_type(&self) -> Header<'static> {
        Header::new(
            "Content-Type",
            format!("multipart/form-data; boundary={}", self.boundary),
        )
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        self.body
    }
}
