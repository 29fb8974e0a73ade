#[macro_use]
extern crate rocket;

mod access;
mod api;
mod audit;
mod auth;
mod config;
mod db;
mod env;
mod error;
mod models;
mod storage;
mod telemetry;
mod validation;
#[cfg(test)]
mod test;

use std::sync::Mutex;

use anyhow::Context;
use rocket::data::{ByteUnit, Limits};
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket};
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use auth::{BcryptHasher, LegacyStore, TokenService};
use config::AppConfig;
use telemetry::{OtelGuard, TelemetryFairing, init_telemetry};

/// Everything the server needs, resolved before the first request.
pub struct AppState {
    pub config: AppConfig,
    pub local: SqlitePool,
    pub legacy: SqlitePool,
}

async fn bootstrap() -> anyhow::Result<AppState> {
    env::load_environment().context("Failed to load environment files")?;
    let config = AppConfig::from_env().context("Invalid configuration")?;

    let local = db::connect_pool(&config.local_database_url, &config.pool, true)
        .await
        .context("Failed to open the library database")?;
    let legacy = db::connect_pool(&config.legacy_database_url, &config.pool, false)
        .await
        .context("Failed to open the CEAD database")?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&local)
        .await
        .context("Database migration failed")?;
    info!("Migrations completed successfully");

    for dir in [&config.storage.pdf_dir, &config.storage.cover_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create storage directory {}", dir.display()))?;
    }

    Ok(AppState {
        config,
        local,
        legacy,
    })
}

#[launch]
async fn rocket() -> _ {
    let guard = init_telemetry();
    if guard.exporting() {
        info!("Exporting spans over OTLP");
    }

    let state = match bootstrap().await {
        Ok(state) => state,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            drop(guard);
            std::process::exit(1);
        }
    };

    init_rocket(state).manage(Mutex::new(guard))
}

pub fn init_rocket(state: AppState) -> Rocket<Build> {
    info!("Starting biblioteca");
    let AppState {
        config,
        local,
        legacy,
    } = state;

    let upload_limit = ByteUnit::from(config.upload_limit_bytes);
    let limits = Limits::default()
        .limit("file", upload_limit)
        .limit("data-form", upload_limit);
    let figment = rocket::Config::figment().merge(("limits", limits));

    let tokens = TokenService::new(&config.jwt_secret, config.token_ttl);
    let hasher = BcryptHasher::new(config.bcrypt_cost);

    rocket::custom(figment)
        .manage(local)
        .manage(LegacyStore::new(legacy))
        .manage(tokens)
        .manage(hasher)
        .manage(config)
        .mount("/api", api::routes())
        .register(
            "/api",
            catchers![
                auth::bad_request,
                auth::unauthorized,
                auth::forbidden,
                auth::not_found,
                auth::payload_too_large,
                auth::unprocessable,
                auth::internal_error,
                auth::fallback,
            ],
        )
        .attach(TelemetryFairing)
        .attach(AdHoc::on_shutdown("Close pools", |rocket| {
            Box::pin(async move {
                if let Some(pool) = rocket.state::<SqlitePool>() {
                    pool.close().await;
                }
                if let Some(legacy) = rocket.state::<LegacyStore>() {
                    legacy.close().await;
                }
                info!("Database pools closed");

                match rocket.state::<Mutex<OtelGuard>>().map(|guard| guard.lock()) {
                    Some(Ok(mut guard)) => guard.shutdown(),
                    Some(Err(_)) => warn!("Telemetry guard poisoned, skipping flush"),
                    None => {}
                }
            })
        }))
}
