use image::{GrayImage, Rgba, RgbaImage};
use rayon::prelude::*;
use std::sync::Arc;

use crate::core::errors::{RenderingError, RenderingResult};

/// Hole filling for masked pixels.
///
/// Implementations return a new image and leave the input untouched on error,
/// so the caller can fall back to a cheaper repair.
pub trait Inpainter: Send + Sync {
    fn inpaint(&self, image: &RgbaImage, mask: &GrayImage, radius: u32)
        -> RenderingResult<RgbaImage>;

    fn name(&self) -> &'static str;
}

/// Inpainter selected by build features
pub fn default_inpainter() -> Arc<dyn Inpainter> {
    #[cfg(feature = "opencv-inpaint")]
    {
        Arc::new(OpenCvInpainter)
    }
    #[cfg(not(feature = "opencv-inpaint"))]
    {
        Arc::new(DiffusionInpainter)
    }
}

/// Onion-peel fill: each pass fills the masked pixels touching known ones with
/// an inverse-square-distance average of the known pixels within `radius`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffusionInpainter;

impl DiffusionInpainter {
    fn fill_pixel(
        image: &RgbaImage,
        known: &[bool],
        x: u32,
        y: u32,
        radius: i64,
    ) -> Option<Rgba<u8>> {
        let (w, h) = (image.width() as i64, image.height() as i64);
        let (cx, cy) = (x as i64, y as i64);
        let mut acc = [0f64; 4];
        let mut total = 0f64;

        for ny in (cy - radius).max(0)..=(cy + radius).min(h - 1) {
            for nx in (cx - radius).max(0)..=(cx + radius).min(w - 1) {
                if !known[(ny * w + nx) as usize] {
                    continue;
                }
                let d2 = ((nx - cx).pow(2) + (ny - cy).pow(2)) as f64;
                if d2 > (radius * radius) as f64 {
                    continue;
                }
                let weight = 1.0 / d2.max(1.0);
                let p = image.get_pixel(nx as u32, ny as u32);
                for c in 0..4 {
                    acc[c] += p[c] as f64 * weight;
                }
                total += weight;
            }
        }

        (total > 0.0).then(|| {
            Rgba([
                (acc[0] / total).round() as u8,
                (acc[1] / total).round() as u8,
                (acc[2] / total).round() as u8,
                (acc[3] / total).round() as u8,
            ])
        })
    }
}

impl Inpainter for DiffusionInpainter {
    fn inpaint(
        &self,
        image: &RgbaImage,
        mask: &GrayImage,
        radius: u32,
    ) -> RenderingResult<RgbaImage> {
        let (w, h) = image.dimensions();
        if mask.dimensions() != (w, h) {
            return Err(RenderingError::MaskSizeMismatch {
                mask_width: mask.width(),
                mask_height: mask.height(),
                width: w,
                height: h,
            });
        }

        let mut known: Vec<bool> = mask.pixels().map(|p| p[0] == 0).collect();
        let mut remaining = known.iter().filter(|k| !**k).count();
        if remaining == 0 {
            return Ok(image.clone());
        }
        if remaining == known.len() {
            return Err(RenderingError::InpaintFailed(
                "mask covers the whole image".to_string(),
            ));
        }

        let mut out = image.clone();
        let radius = radius.max(1) as i64;
        let idx = |x: u32, y: u32| (y * w + x) as usize;

        while remaining > 0 {
            // Unknown pixels with at least one known 8-neighbour
            let front: Vec<(u32, u32)> = (0..h)
                .flat_map(|y| (0..w).map(move |x| (x, y)))
                .filter(|&(x, y)| {
                    !known[idx(x, y)]
                        && neighbours(x, y, w, h).any(|(nx, ny)| known[idx(nx, ny)])
                })
                .collect();

            if front.is_empty() {
                return Err(RenderingError::InpaintFailed(format!(
                    "{} pixels unreachable from known area",
                    remaining
                )));
            }

            let filled: Vec<((u32, u32), Option<Rgba<u8>>)> = front
                .par_iter()
                .map(|&(x, y)| ((x, y), Self::fill_pixel(&out, &known, x, y, radius)))
                .collect();

            for ((x, y), value) in filled {
                let value = value.ok_or_else(|| {
                    RenderingError::InpaintFailed(format!("no known pixel near ({x}, {y})"))
                })?;
                out.put_pixel(x, y, value);
                known[idx(x, y)] = true;
                remaining -= 1;
            }
        }

        Ok(out)
    }

    fn name(&self) -> &'static str {
        "diffusion"
    }
}

fn neighbours(x: u32, y: u32, w: u32, h: u32) -> impl Iterator<Item = (u32, u32)> {
    let (x, y) = (x as i64, y as i64);
    (-1i64..=1)
        .flat_map(move |dy| (-1i64..=1).map(move |dx| (dx, dy)))
        .filter(|&(dx, dy)| dx != 0 || dy != 0)
        .map(move |(dx, dy)| (x + dx, y + dy))
        .filter(move |&(nx, ny)| nx >= 0 && ny >= 0 && nx < w as i64 && ny < h as i64)
        .map(|(nx, ny)| (nx as u32, ny as u32))
}

/// OpenCV Navier-Stokes inpainting
#[cfg(feature = "opencv-inpaint")]
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenCvInpainter;

#[cfg(feature = "opencv-inpaint")]
impl Inpainter for OpenCvInpainter {
    fn inpaint(
        &self,
        image: &RgbaImage,
        mask: &GrayImage,
        radius: u32,
    ) -> RenderingResult<RgbaImage> {
        use opencv::core::{Mat, Scalar, Vec3b, CV_8UC1, CV_8UC3};
        use opencv::prelude::*;

        let cv_err = |e: opencv::Error| RenderingError::InpaintFailed(e.to_string());
        let (w, h) = image.dimensions();

        let mut src = Mat::new_rows_cols_with_default(h as i32, w as i32, CV_8UC3, Scalar::all(0.0))
            .map_err(cv_err)?;
        let mut cv_mask =
            Mat::new_rows_cols_with_default(h as i32, w as i32, CV_8UC1, Scalar::all(0.0))
                .map_err(cv_err)?;

        for y in 0..h {
            for x in 0..w {
                let p = image.get_pixel(x, y);
                *src.at_2d_mut::<Vec3b>(y as i32, x as i32).map_err(cv_err)? =
                    Vec3b::from_array([p[2], p[1], p[0]]);
                *cv_mask.at_2d_mut::<u8>(y as i32, x as i32).map_err(cv_err)? =
                    mask.get_pixel(x, y)[0];
            }
        }

        let mut dst = Mat::default();
        opencv::photo::inpaint(&src, &cv_mask, &mut dst, radius as f64, opencv::photo::INPAINT_NS)
            .map_err(cv_err)?;

        let mut out = image.clone();
        for y in 0..h {
            for x in 0..w {
                let px = *dst.at_2d::<Vec3b>(y as i32, x as i32).map_err(cv_err)?;
                let alpha = image.get_pixel(x, y)[3];
                out.put_pixel(x, y, Rgba([px[2], px[1], px[0], alpha]));
            }
        }
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "opencv-ns"
    }
}
