use std::path::Path;

use tracing::{info, warn};

/// Layers the env files for the active Rocket profile over the process
/// environment. Later files override earlier ones.
pub fn load_environment() -> Result<(), dotenvy::Error> {
    let profile = dotenvy::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string());

    for env_file in env_files_for(&profile) {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn env_files_for(profile: &str) -> [&'static str; 3] {
    if profile == "production" {
        ["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        ["config/common.env", "config/dev.env", ".secrets.env"]
    }
}

fn load_env_file(path: &str) -> Result<(), dotenvy::Error> {
    if !Path::new(path).exists() {
        warn!("Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}
