//! Thumbnails for image artifacts

use image::{ImageFormat, ImageReader};
use std::io::Cursor;
use stowage_core::AppError;
use stowage_storage::Storage;

/// Images larger than this are not decoded for thumbnails
pub const MAX_THUMBNAIL_SOURCE_BYTES: u64 = 64 * 1024 * 1024;

/// Decode `data` and encode a PNG that fits in `max_dimension` x `max_dimension`
pub fn render_thumbnail(data: &[u8], max_dimension: u32) -> Result<Vec<u8>, AppError> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| AppError::InvalidInput(format!("Failed to read image: {}", e)))?
        .decode()
        .map_err(|e| AppError::InvalidInput(format!("Failed to decode image: {}", e)))?;

    let thumb = img.thumbnail(max_dimension, max_dimension);

    let mut out = Cursor::new(Vec::new());
    thumb
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| AppError::Internal(format!("Failed to encode thumbnail: {}", e)))?;

    Ok(out.into_inner())
}

/// Render a thumbnail of the blob at `source_key` and store it at `target_key`.
#[tracing::instrument(skip(storage))]
pub async fn generate_thumbnail(
    storage: &dyn Storage,
    source_key: &str,
    target_key: &str,
    size_bytes: u64,
    max_dimension: u32,
) -> Result<u64, AppError> {
    if size_bytes > MAX_THUMBNAIL_SOURCE_BYTES {
        return Err(AppError::PayloadTooLarge(format!(
            "Image of {} bytes is too large for a thumbnail",
            size_bytes
        )));
    }

    let data = storage.get(source_key).await?;
    let png = tokio::task::spawn_blocking(move || render_thumbnail(&data, max_dimension))
        .await
        .map_err(|e| AppError::Internal(format!("Thumbnail task failed: {}", e)))??;

    let written = storage.put(target_key, png.into()).await?;
    tracing::debug!(size_bytes = written, "Thumbnail stored");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 30, 30]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_thumbnail_keeps_aspect_ratio() {
        let thumb = render_thumbnail(&png(64, 32), 16).unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!(decoded.dimensions(), (16, 8));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(render_thumbnail(b"definitely not an image", 16).is_err());
    }
}
