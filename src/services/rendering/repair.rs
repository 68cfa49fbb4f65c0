use image::{GrayImage, Luma, Rgba, RgbaImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;
use imageproc::region_labelling::{connected_components, Connectivity};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::core::config::RenderingConfig;
use crate::core::errors::{RenderingError, RenderingResult};
use crate::core::types::{BackgroundMasks, BoundingBox};
use crate::services::rendering::inpaint::Inpainter;

// Sigma OpenCV derives for a 5x5 Gaussian kernel
const EDGE_BLUR_SIGMA: f32 = 1.1;
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Result of background repair
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub image: RgbaImage,
    /// Boxes of text regions repaired by dark fill
    pub dark_regions: Vec<BoundingBox>,
    /// Whether inpainting failed and the median fill was used
    pub used_median_fallback: bool,
}

/// One connected component of the dilated text mask
#[derive(Debug, Clone)]
struct TextRegion {
    bbox: BoundingBox,
    pixels: Vec<(u32, u32)>,
    dark: bool,
}

pub(crate) fn ensure_same_size(image: &RgbaImage, mask: &GrayImage) -> RenderingResult<()> {
    if image.dimensions() != mask.dimensions() {
        return Err(RenderingError::MaskSizeMismatch {
            mask_width: mask.width(),
            mask_height: mask.height(),
            width: image.width(),
            height: image.height(),
        });
    }
    Ok(())
}

fn luminance(p: &Rgba<u8>) -> f32 {
    0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
}

/// True when every pixel's channels lie within `tolerance` of each other
pub fn is_grayscale_like(image: &RgbaImage, tolerance: u8) -> bool {
    image.as_raw().par_chunks_exact(4).all(|p| {
        let max = p[0].max(p[1]).max(p[2]);
        let min = p[0].min(p[1]).min(p[2]);
        max - min <= tolerance
    })
}

fn is_empty(mask: &GrayImage) -> bool {
    mask.as_raw().iter().all(|&v| v == 0)
}

/// Label connected text regions and classify each as dark or not
fn analyze_regions(
    image: &RgbaImage,
    text_mask: &GrayImage,
    config: &RenderingConfig,
) -> Vec<TextRegion> {
    let labels = connected_components(text_mask, Connectivity::Eight, Luma([0u8]));
    let mut regions: Vec<TextRegion> = Vec::new();

    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if regions.len() < label {
            regions.resize_with(label, || TextRegion {
                bbox: BoundingBox::new(i32::MAX, i32::MAX, i32::MIN, i32::MIN),
                pixels: Vec::new(),
                dark: false,
            });
        }
        let region = &mut regions[label - 1];
        region.bbox.x1 = region.bbox.x1.min(x as i32);
        region.bbox.y1 = region.bbox.y1.min(y as i32);
        region.bbox.x2 = region.bbox.x2.max(x as i32 + 1);
        region.bbox.y2 = region.bbox.y2.max(y as i32 + 1);
        region.pixels.push((x, y));
    }
    regions.retain(|r| !r.pixels.is_empty());

    if !is_grayscale_like(image, config.grayscale_tolerance) {
        return regions;
    }

    for region in &mut regions {
        let mean = neighbourhood_luminance(image, region);
        region.dark = mean < config.dark_luminance_threshold;
        debug!(
            "Text region {:?}: mean luminance {:.1} ({})",
            region.bbox,
            mean,
            if region.dark { "dark" } else { "light" }
        );
    }
    regions
}

/// Mean luminance over the region dilated by a 5x5 square
fn neighbourhood_luminance(image: &RgbaImage, region: &TextRegion) -> f32 {
    const PAD: i32 = 2;
    let (w, h) = image.dimensions();
    let Some(window) = BoundingBox::new(
        region.bbox.x1 - PAD,
        region.bbox.y1 - PAD,
        region.bbox.x2 + PAD,
        region.bbox.y2 + PAD,
    )
    .clamped(w, h) else {
        return 255.0;
    };

    let mut local = GrayImage::new(window.width() as u32, window.height() as u32);
    for &(x, y) in &region.pixels {
        local.put_pixel(
            (x as i32 - window.x1) as u32,
            (y as i32 - window.y1) as u32,
            Luma([255]),
        );
    }
    let grown = dilate(&local, Norm::LInf, PAD as u8);

    let (sum, count) = grown
        .enumerate_pixels()
        .filter(|(_, _, v)| v[0] > 0)
        .fold((0f64, 0usize), |(sum, count), (lx, ly, _)| {
            let p = image.get_pixel(lx + window.x1 as u32, ly + window.y1 as u32);
            (sum + luminance(p) as f64, count + 1)
        });

    if count == 0 {
        255.0
    } else {
        (sum / count as f64) as f32
    }
}

/// Regions classified as dark on `image`, after the same dilation repair uses.
///
/// Works on both original and already repaired images, since dark fill keeps
/// the region dark.
pub fn dark_regions(
    image: &RgbaImage,
    masks: &BackgroundMasks,
    config: &RenderingConfig,
) -> RenderingResult<Vec<BoundingBox>> {
    ensure_same_size(image, &masks.text)?;
    if is_empty(&masks.text) {
        return Ok(Vec::new());
    }
    let text_mask = dilate(&masks.text, Norm::LInf, 1);
    Ok(analyze_regions(image, &text_mask, config)
        .into_iter()
        .filter(|r| r.dark)
        .map(|r| r.bbox)
        .collect())
}

/// Erase original text under both masks.
///
/// Bubble pixels become white. Text regions on dark grayscale panels are filled
/// with a low luminance through a blurred mask; everything else is inpainted,
/// falling back to the median colour of unmasked pixels.
pub fn repair_background(
    image: &RgbaImage,
    masks: &BackgroundMasks,
    config: &RenderingConfig,
    inpainter: &dyn Inpainter,
) -> RenderingResult<RepairOutcome> {
    ensure_same_size(image, &masks.bubble)?;
    ensure_same_size(image, &masks.text)?;

    let mut out = image.clone();
    for (pixel, m) in out.pixels_mut().zip(masks.bubble.pixels()) {
        if m[0] > 0 {
            *pixel = WHITE;
        }
    }

    if is_empty(&masks.text) {
        return Ok(RepairOutcome {
            image: out,
            dark_regions: Vec::new(),
            used_median_fallback: false,
        });
    }

    let text_mask = dilate(&masks.text, Norm::LInf, 1);
    let regions = analyze_regions(image, &text_mask, config);
    let (w, h) = image.dimensions();

    let mut dark_mask = GrayImage::new(w, h);
    let mut light_mask = GrayImage::new(w, h);
    for region in &regions {
        let target = if region.dark {
            &mut dark_mask
        } else {
            &mut light_mask
        };
        for &(x, y) in &region.pixels {
            target.put_pixel(x, y, Luma([255]));
        }
    }

    let dark_regions: Vec<BoundingBox> = regions
        .iter()
        .filter(|r| r.dark)
        .map(|r| r.bbox)
        .collect();

    if !dark_regions.is_empty() {
        fill_dark(&mut out, &dark_mask, config.dark_fill_value);
    }

    let mut used_median_fallback = false;
    if !is_empty(&light_mask) {
        match inpainter.inpaint(&out, &light_mask, config.inpaint_radius) {
            Ok(inpainted) => out = inpainted,
            Err(e) => {
                warn!(
                    "Inpainting ({}) failed, using median fill: {}",
                    inpainter.name(),
                    e
                );
                fill_median(&mut out, &light_mask, &text_mask);
                used_median_fallback = true;
            }
        }
    }

    debug!(
        "Repaired {} text regions ({} dark, median fallback: {})",
        regions.len(),
        dark_regions.len(),
        used_median_fallback
    );

    Ok(RepairOutcome {
        image: out,
        dark_regions,
        used_median_fallback,
    })
}

/// Blend `value` into the image through a blurred copy of `mask`
fn fill_dark(image: &mut RgbaImage, mask: &GrayImage, value: u8) {
    let soft = gaussian_blur_f32(mask, EDGE_BLUR_SIGMA);
    let width = image.width() as usize;
    let fill = value as f32;

    image
        .par_chunks_mut(width * 4)
        .zip(soft.as_raw().par_chunks(width))
        .for_each(|(row, alpha_row)| {
            for (px, &a) in row.chunks_exact_mut(4).zip(alpha_row) {
                let alpha = a as f32 / 255.0;
                for c in px.iter_mut().take(3) {
                    *c = (*c as f32 * (1.0 - alpha) + fill * alpha).round() as u8;
                }
            }
        });
}

/// Fill `target` pixels with the per-channel median of pixels outside `exclude`
fn fill_median(image: &mut RgbaImage, target: &GrayImage, exclude: &GrayImage) {
    let mut channels: [Vec<u8>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for (p, m) in image.pixels().zip(exclude.pixels()) {
        if m[0] == 0 {
            for c in 0..3 {
                channels[c].push(p[c]);
            }
        }
    }

    if channels[0].is_empty() {
        warn!("No unmasked pixels for median fill; leaving region as is");
        return;
    }

    let mut median = [0u8; 3];
    for (c, values) in channels.iter_mut().enumerate() {
        let mid = values.len() / 2;
        let (_, m, _) = values.select_nth_unstable(mid);
        median[c] = *m;
    }

    for (p, m) in image.pixels_mut().zip(target.pixels()) {
        if m[0] > 0 {
            *p = Rgba([median[0], median[1], median[2], p[3]]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::rendering::inpaint::DiffusionInpainter;

    struct FailingInpainter;

    impl Inpainter for FailingInpainter {
        fn inpaint(&self, _: &RgbaImage, _: &GrayImage, _: u32) -> RenderingResult<RgbaImage> {
            Err(RenderingError::InpaintFailed("boom".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn text_mask(w: u32, h: u32, bbox: BoundingBox) -> BackgroundMasks {
        let mut masks = BackgroundMasks::empty(w, h);
        for y in bbox.y1 as u32..bbox.y2 as u32 {
            for x in bbox.x1 as u32..bbox.x2 as u32 {
                masks.text.put_pixel(x, y, Luma([255]));
            }
        }
        masks
    }

    #[test]
    fn test_bubble_is_filled_white() {
        let img = RgbaImage::from_pixel(10, 10, Rgba([30, 30, 30, 255]));
        let mut masks = BackgroundMasks::empty(10, 10);
        masks.bubble.put_pixel(3, 3, Luma([255]));

        let out = repair_background(&img, &masks, &RenderingConfig::default(), &DiffusionInpainter)
            .unwrap();
        assert_eq!(out.image.get_pixel(3, 3), &WHITE);
        assert_eq!(out.image.get_pixel(5, 5), &Rgba([30, 30, 30, 255]));
    }

    #[test]
    fn test_dark_panel_uses_direct_fill() {
        let mut img = RgbaImage::from_pixel(40, 40, Rgba([20, 20, 20, 255]));
        // White lettering on a dark panel
        for x in 15..25 {
            img.put_pixel(x, 20, Rgba([250, 250, 250, 255]));
        }
        let masks = text_mask(40, 40, BoundingBox::new(14, 18, 26, 23));

        let out = repair_background(&img, &masks, &RenderingConfig::default(), &FailingInpainter)
            .unwrap();
        assert_eq!(out.dark_regions.len(), 1);
        assert!(!out.used_median_fallback);
        assert!(out.image.get_pixel(20, 20)[0] < 20);
    }

    #[test]
    fn test_light_panel_falls_back_to_median() {
        let mut img = RgbaImage::from_pixel(40, 40, Rgba([220, 220, 220, 255]));
        for x in 15..25 {
            img.put_pixel(x, 20, Rgba([0, 0, 0, 255]));
        }
        let masks = text_mask(40, 40, BoundingBox::new(14, 18, 26, 23));

        let out = repair_background(&img, &masks, &RenderingConfig::default(), &FailingInpainter)
            .unwrap();
        assert!(out.dark_regions.is_empty());
        assert!(out.used_median_fallback);
        assert_eq!(out.image.get_pixel(20, 20), &Rgba([220, 220, 220, 255]));
    }

    #[test]
    fn test_color_image_is_never_dark_filled() {
        let img = RgbaImage::from_pixel(20, 20, Rgba([10, 40, 10, 255]));
        let masks = text_mask(20, 20, BoundingBox::new(5, 5, 10, 10));
        let out = repair_background(&img, &masks, &RenderingConfig::default(), &DiffusionInpainter)
            .unwrap();
        assert!(out.dark_regions.is_empty());
    }

    #[test]
    fn test_mask_size_mismatch() {
        let img = RgbaImage::new(10, 10);
        let masks = BackgroundMasks::empty(5, 5);
        assert!(matches!(
            repair_background(&img, &masks, &RenderingConfig::default(), &DiffusionInpainter),
            Err(RenderingError::MaskSizeMismatch { .. })
        ));
    }
}
