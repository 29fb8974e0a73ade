use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageReader};
use rocket::tokio::task;
use tracing::{info, instrument};

use crate::error::AppError;

use super::remove_quietly;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverSettings {
    pub max_width: u32,
    pub quality: u8,
}

impl Default for CoverSettings {
    fn default() -> Self {
        Self {
            max_width: 1200,
            quality: 80,
        }
    }
}

/// Re-encodes `source` as an orientation-corrected, width-capped JPEG at
/// `target`, then deletes `source`. On failure both files are removed.
#[instrument(skip(settings), fields(source = %source.display(), target = %target.display()))]
pub async fn transcode_cover(
    source: &Path,
    target: &Path,
    settings: CoverSettings,
) -> Result<(), AppError> {
    let (src, dst): (PathBuf, PathBuf) = (source.to_path_buf(), target.to_path_buf());
    let outcome = task::spawn_blocking(move || encode_cover(&src, &dst, settings))
        .await
        .map_err(AppError::from)
        .and_then(|result| result);

    remove_quietly(source).await;
    if outcome.is_err() {
        remove_quietly(target).await;
    }

    outcome
}

fn encode_cover(source: &Path, target: &Path, settings: CoverSettings) -> Result<(), AppError> {
    let mut decoder = ImageReader::open(source)?
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);

    if image.width() > settings.max_width {
        let height = (u64::from(image.height()) * u64::from(settings.max_width)
            / u64::from(image.width()))
        .max(1) as u32;
        image = image.resize_exact(settings.max_width, height, FilterType::Lanczos3);
    }

    let rgb = image.to_rgb8();
    let mut writer = BufWriter::new(File::create(target)?);
    JpegEncoder::new_with_quality(&mut writer, settings.quality).encode_image(&rgb)?;
    writer.flush()?;

    info!(width = rgb.width(), height = rgb.height(), "Cover transcoded");
    Ok(())
}
