pub mod delivery;
pub mod ingest;
pub mod signature;
pub mod transcode;

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

pub use delivery::*;
pub use ingest::*;
pub use signature::*;
pub use transcode::*;

/// Catalog rows store file names; the directory comes from configuration.
pub fn resolve_stored(dir: &Path, stored: &str) -> PathBuf {
    dir.join(stored)
}

/// Best-effort unlink. Failures are logged and swallowed.
pub async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Could not remove file"),
    }
}

pub fn stored_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
