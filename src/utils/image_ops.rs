use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::types::BoundingBox;

/// Decode image bytes on the blocking pool.
///
/// Decoding a full page is CPU-bound and would stall the runtime if done inline.
pub async fn decode_image_async(bytes: Arc<Vec<u8>>) -> Result<DynamicImage> {
    tokio::task::spawn_blocking(move || {
        image::load_from_memory(&bytes).context("Failed to decode image from memory")
    })
    .await
    .context("Failed to spawn blocking task for image decoding")?
}

/// Read and decode an image file
pub async fn load_image_async(path: PathBuf) -> Result<DynamicImage> {
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read image {}", path.display()))?;
    decode_image_async(Arc::new(bytes)).await
}

/// Encode an image to PNG bytes
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut png_bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .context("Failed to encode image as PNG")?;
    Ok(png_bytes)
}

/// Crop one region; the box is clamped to the image first
pub fn crop_region(img: &DynamicImage, bbox: &BoundingBox) -> Option<DynamicImage> {
    let bbox = bbox.clamped(img.width(), img.height())?;
    Some(img.crop_imm(
        bbox.x1 as u32,
        bbox.y1 as u32,
        bbox.width() as u32,
        bbox.height() as u32,
    ))
}

/// Crop many regions in a single blocking task.
///
/// Boxes that clamp to nothing yield a 1x1 white crop so indices stay aligned.
pub async fn crop_regions_async(
    img: Arc<DynamicImage>,
    boxes: Vec<BoundingBox>,
) -> Result<Vec<DynamicImage>> {
    tokio::task::spawn_blocking(move || {
        let crops = boxes
            .iter()
            .map(|bbox| {
                crop_region(&img, bbox).unwrap_or_else(|| {
                    DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
                        1,
                        1,
                        image::Rgba([255, 255, 255, 255]),
                    ))
                })
            })
            .collect();
        Ok(crops)
    })
    .await
    .context("Failed to spawn blocking task for region cropping")?
}

/// Wrap PNG bytes as a `data:` URL
pub fn to_data_url(png_bytes: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        general_purpose::STANDARD.encode(png_bytes)
    )
}
