//! Text layout engine: background repair plus re-flowed, outlined text.

pub mod fonts;
pub mod inpaint;
pub mod repair;
pub mod wrap;

use image::{Rgba, RgbaImage};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::core::config::RenderingConfig;
use crate::core::errors::{RenderingError, RenderingResult};
use crate::core::types::{BackgroundMasks, BoundingBox, HorizontalAlign, TextBlock};
use crate::utils::metrics::Metrics;

pub use fonts::{CosmicRasterizer, FontSpec, FontVariant, TextRasterizer};
pub use inpaint::{default_inpainter, DiffusionInpainter, Inpainter};
pub use repair::RepairOutcome;

const OUTLINE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const FILL: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// The 8 neighbours at distance 1
pub const OUTLINE_NORMAL: [(i32, i32); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Offsets up to distance 2 without the centre and the four far corners
pub fn outline_dense() -> Vec<(i32, i32)> {
    (-2..=2)
        .flat_map(|dy| (-2..=2).map(move |dx| (dx, dy)))
        .filter(|&(dx, dy): &(i32, i32)| (dx, dy) != (0, 0) && !(dx.abs() == 2 && dy.abs() == 2))
        .collect()
}

/// One positioned line of a block
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub text: String,
    pub x: i32,
    pub y: i32,
}

/// Where a block's lines go
#[derive(Debug, Clone)]
pub struct BlockLayout {
    pub block_id: u32,
    pub font: FontSpec,
    pub lines: Vec<PlacedLine>,
    pub total_height: f32,
}

/// Counters from drawing a set of blocks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawReport {
    pub drawn: usize,
    pub empty: usize,
    pub failed: usize,
}

pub struct LayoutEngine {
    config: RenderingConfig,
    rasterizer: Arc<dyn TextRasterizer>,
    inpainter: Arc<dyn Inpainter>,
    metrics: Option<Metrics>,
}

impl LayoutEngine {
    /// Engine with cosmic-text fonts from `config.font_dir` and the default inpainter
    pub fn new(config: RenderingConfig) -> Self {
        let rasterizer = Arc::new(CosmicRasterizer::new(config.font_dir.clone()));
        Self::with_parts(config, rasterizer, default_inpainter())
    }

    pub fn with_parts(
        config: RenderingConfig,
        rasterizer: Arc<dyn TextRasterizer>,
        inpainter: Arc<dyn Inpainter>,
    ) -> Self {
        Self {
            config,
            rasterizer,
            inpainter,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &RenderingConfig {
        &self.config
    }

    /// Repair the background under `masks`, then draw every block onto it
    #[instrument(skip_all, fields(blocks = blocks.len()))]
    pub fn render_translation(
        &self,
        background: &RgbaImage,
        blocks: &[TextBlock],
        masks: &BackgroundMasks,
    ) -> RenderingResult<RgbaImage> {
        let RepairOutcome {
            image: mut canvas,
            dark_regions,
            ..
        } = self.repair_background(background, masks)?;
        self.draw_blocks(&mut canvas, blocks, &dark_regions);
        Ok(canvas)
    }

    pub fn repair_background(
        &self,
        background: &RgbaImage,
        masks: &BackgroundMasks,
    ) -> RenderingResult<RepairOutcome> {
        let outcome =
            repair::repair_background(background, masks, &self.config, self.inpainter.as_ref())?;
        if outcome.used_median_fallback {
            if let Some(metrics) = &self.metrics {
                metrics.record_inpaint_fallback();
            }
        }
        Ok(outcome)
    }

    /// Draw blocks onto an already repaired background.
    ///
    /// Dark regions are re-derived from the repaired pixels.
    pub fn redraw(
        &self,
        repaired: &RgbaImage,
        blocks: &[TextBlock],
        masks: &BackgroundMasks,
    ) -> RenderingResult<RgbaImage> {
        let dark_regions = repair::dark_regions(repaired, masks, &self.config)?;
        let mut canvas = repaired.clone();
        self.draw_blocks(&mut canvas, blocks, &dark_regions);
        Ok(canvas)
    }

    /// Draw each block; a failing block is logged and skipped
    pub fn draw_blocks(
        &self,
        canvas: &mut RgbaImage,
        blocks: &[TextBlock],
        dark_regions: &[BoundingBox],
    ) -> DrawReport {
        let mut report = DrawReport::default();
        let dense = outline_dense();

        for block in blocks {
            let layout = match self.layout_block(block, canvas.width(), canvas.height()) {
                Ok(Some(layout)) => layout,
                Ok(None) => {
                    report.empty += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Skipping block {}: {}", block.id, e);
                    report.failed += 1;
                    continue;
                }
            };

            let on_dark = dark_regions.iter().any(|r| r.intersects(&block.bbox));
            let offsets: &[(i32, i32)] = if on_dark { &dense[..] } else { &OUTLINE_NORMAL[..] };

            let drawn = layout.lines.iter().try_for_each(|line| {
                self.rasterizer.draw_line(
                    canvas,
                    &line.text,
                    &layout.font,
                    line.x,
                    line.y,
                    offsets,
                    OUTLINE,
                    FILL,
                )
            });
            match drawn {
                Ok(()) => report.drawn += 1,
                Err(e) => {
                    warn!("Skipping block {}: {}", block.id, e);
                    report.failed += 1;
                }
            }
        }

        if report.failed > 0 {
            if let Some(metrics) = &self.metrics {
                metrics.record_blocks_skipped(report.failed);
            }
        }
        debug!(
            "Drew {} blocks ({} empty, {} failed)",
            report.drawn, report.empty, report.failed
        );
        report
    }

    /// Wrap and position a block's translated text.
    ///
    /// Returns `Ok(None)` when there is nothing to draw.
    pub fn layout_block(
        &self,
        block: &TextBlock,
        image_width: u32,
        image_height: u32,
    ) -> RenderingResult<Option<BlockLayout>> {
        let Some(text) = block.translated_text.as_deref() else {
            return Ok(None);
        };
        if text.trim().is_empty() {
            return Ok(None);
        }

        let style = &block.style;
        let bbox = block
            .bbox
            .translated(style.offset_x, style.offset_y)
            .and_then(|shifted| shifted.clamped(image_width, image_height))
            .ok_or(RenderingError::InvalidBox {
                block_id: block.id,
                width: image_width,
                height: image_height,
            })?;

        let font = FontSpec::from_style(style);
        let max_width = (bbox.width() - self.config.wrap_margin as i32).max(1) as f32;
        let lines = wrap::wrap_text(text, max_width, |candidate| {
            self.rasterizer.line_width(candidate, &font)
        });
        if lines.is_empty() {
            return Ok(None);
        }

        let glyph_height = self.rasterizer.glyph_height(&font);
        let line_spacing = (font.size * 0.3).floor().max(6.0);
        let step = glyph_height + line_spacing;
        let total_height = lines.len() as f32 * step;
        let y_start = bbox.y1 as f32 + (bbox.height() as f32 - total_height) / 2.0;
        let margin = self.config.align_margin;

        let placed = lines
            .into_iter()
            .enumerate()
            .filter(|(_, line)| !line.is_empty())
            .map(|(i, text)| {
                let width = self.rasterizer.line_width(&text, &font);
                let x = match style.align {
                    HorizontalAlign::Left => bbox.x1 + margin,
                    HorizontalAlign::Right => bbox.x2 - width.round() as i32 - margin,
                    HorizontalAlign::Center => {
                        bbox.x1 + ((bbox.width() as f32 - width) / 2.0).round() as i32
                    }
                };
                let y = (y_start + i as f32 * step).round() as i32;
                PlacedLine { text, x, y }
            })
            .collect();

        Ok(Some(BlockLayout {
            block_id: block.id,
            font,
            lines: placed,
            total_height,
        }))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Fixed-advance rasterizer: every char is a `size/2` wide solid box
    pub struct BoxRasterizer;

    impl TextRasterizer for BoxRasterizer {
        fn line_width(&self, text: &str, font: &FontSpec) -> f32 {
            text.chars().count() as f32 * font.size / 2.0
        }

        fn glyph_height(&self, font: &FontSpec) -> f32 {
            font.size
        }

        fn draw_line(
            &self,
            canvas: &mut RgbaImage,
            text: &str,
            font: &FontSpec,
            x: i32,
            y: i32,
            outline_offsets: &[(i32, i32)],
            outline: Rgba<u8>,
            fill: Rgba<u8>,
        ) -> RenderingResult<()> {
            let w = self.line_width(text, font) as i32;
            let h = font.size as i32;
            let mut paint = |ox: i32, oy: i32, color: Rgba<u8>| {
                for py in y + oy..y + oy + h {
                    for px in x + ox..x + ox + w {
                        if px >= 0 && py >= 0 && px < canvas.width() as i32 && py < canvas.height() as i32 {
                            canvas.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            };
            for &(dx, dy) in outline_offsets {
                paint(dx, dy, outline);
            }
            paint(0, 0, fill);
            Ok(())
        }
    }

    pub fn engine() -> LayoutEngine {
        LayoutEngine::with_parts(
            RenderingConfig::default(),
            Arc::new(BoxRasterizer),
            Arc::new(DiffusionInpainter),
        )
    }
}
