use cosmic_text::{
    fontdb, Attrs, Buffer, Color as CosmicColor, Family, FontSystem, Metrics, Shaping, Style,
    SwashCache, Weight,
};
use image::{Rgba, RgbaImage};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::errors::RenderingResult;
use crate::core::types::{FontWeight, TextStyle};

/// Smallest and largest sizes a style may request
pub const MIN_FONT_SIZE: u32 = 8;
pub const MAX_FONT_SIZE: u32 = 32;

/// Snap a requested size to the nearest even size in `MIN_FONT_SIZE..=MAX_FONT_SIZE`
pub fn snap_font_size(requested: u32) -> u32 {
    let clamped = requested.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
    // Ties round down, like picking the first of two equally close sizes
    clamped - clamped % 2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FontVariant {
    Regular,
    Bold,
    Italic,
    BoldItalic,
}

impl FontVariant {
    pub fn from_style(style: &TextStyle) -> Self {
        match (style.weight, style.italic) {
            (FontWeight::Bold, true) => FontVariant::BoldItalic,
            (FontWeight::Bold, false) => FontVariant::Bold,
            (FontWeight::Normal, true) => FontVariant::Italic,
            (FontWeight::Normal, false) => FontVariant::Regular,
        }
    }

    /// Candidate file names, most preferred first
    fn candidates(&self) -> &'static [&'static str] {
        match self {
            FontVariant::Regular => &[
                "arial.ttf",
                "Arial.ttf",
                "arial-unicode.ttf",
                "DejaVuSans.ttf",
                "LiberationSans-Regular.ttf",
                "NotoSans-Regular.ttf",
            ],
            FontVariant::Bold => &[
                "arialbd.ttf",
                "Arial Bold.ttf",
                "DejaVuSans-Bold.ttf",
                "LiberationSans-Bold.ttf",
                "NotoSans-Bold.ttf",
            ],
            FontVariant::Italic => &[
                "ariali.ttf",
                "Arial Italic.ttf",
                "DejaVuSans-Oblique.ttf",
                "LiberationSans-Italic.ttf",
                "NotoSans-Italic.ttf",
            ],
            FontVariant::BoldItalic => &[
                "arialbi.ttf",
                "Arial Bold Italic.ttf",
                "DejaVuSans-BoldOblique.ttf",
                "LiberationSans-BoldItalic.ttf",
                "NotoSans-BoldItalic.ttf",
            ],
        }
    }

    fn all() -> [FontVariant; 4] {
        [
            FontVariant::Regular,
            FontVariant::Bold,
            FontVariant::Italic,
            FontVariant::BoldItalic,
        ]
    }
}

/// Font request for one block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontSpec {
    pub size: f32,
    pub variant: FontVariant,
}

impl FontSpec {
    pub fn from_style(style: &TextStyle) -> Self {
        Self {
            size: snap_font_size(style.font_size) as f32,
            variant: FontVariant::from_style(style),
        }
    }
}

/// Measures and draws single lines of text.
///
/// `draw_line` paints `outline` at every offset first, then `fill` at the origin.
pub trait TextRasterizer: Send + Sync {
    fn line_width(&self, text: &str, font: &FontSpec) -> f32;

    fn glyph_height(&self, font: &FontSpec) -> f32;

    #[allow(clippy::too_many_arguments)]
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
    ) -> RenderingResult<()>;
}

/// Family resolved for each variant; `None` means the generic fallback
#[derive(Debug, Default, Clone)]
struct ResolvedFamilies {
    regular: Option<String>,
    bold: Option<String>,
    italic: Option<String>,
    bold_italic: Option<String>,
}

impl ResolvedFamilies {
    fn slot(&mut self, variant: FontVariant) -> &mut Option<String> {
        match variant {
            FontVariant::Regular => &mut self.regular,
            FontVariant::Bold => &mut self.bold,
            FontVariant::Italic => &mut self.italic,
            FontVariant::BoldItalic => &mut self.bold_italic,
        }
    }

    fn get(&self, variant: FontVariant) -> Option<&str> {
        let own = match variant {
            FontVariant::Regular => &self.regular,
            FontVariant::Bold => &self.bold,
            FontVariant::Italic => &self.italic,
            FontVariant::BoldItalic => &self.bold_italic,
        };
        own.as_deref().or(self.regular.as_deref())
    }
}

struct CosmicState {
    font_system: FontSystem,
    swash_cache: SwashCache,
    families: ResolvedFamilies,
}

impl CosmicState {
    /// Load the first candidate that parses for each variant.
    ///
    /// System fonts are only scanned when no candidate at all was found.
    fn load(font_dir: &Path) -> Self {
        let mut db = fontdb::Database::new();
        let mut families = ResolvedFamilies::default();

        for variant in FontVariant::all() {
            for name in variant.candidates() {
                let path = font_dir.join(name);
                let Ok(data) = std::fs::read(&path) else {
                    continue;
                };
                let ids = db.load_font_source(fontdb::Source::Binary(Arc::new(data)));
                let family = ids
                    .first()
                    .and_then(|id| db.face(*id))
                    .and_then(|face| face.families.first())
                    .map(|(family, _)| family.clone());
                if let Some(family) = family {
                    debug!("✓ Font {:?}: {} from {}", variant, family, path.display());
                    *families.slot(variant) = Some(family);
                    break;
                }
            }
            if families.slot(variant).is_none() {
                debug!("⚠ No candidate font for {:?} in {}", variant, font_dir.display());
            }
        }

        if families.regular.is_none() {
            warn!(
                "No bundled fonts in {}; falling back to system sans-serif",
                font_dir.display()
            );
            db.load_system_fonts();
        }

        Self {
            font_system: FontSystem::new_with_locale_and_db("en-US".to_string(), db),
            swash_cache: SwashCache::new(),
            families,
        }
    }

    fn shape(&mut self, text: &str, font: &FontSpec) -> Buffer {
        // Line box equals the em size so stacked lines step by glyph height
        let metrics = Metrics::new(font.size, font.size);
        let mut buffer = Buffer::new(&mut self.font_system, metrics);
        buffer.set_size(&mut self.font_system, None, None);

        let attrs = attrs_for(&self.families, font.variant);
        buffer.set_text(&mut self.font_system, text, &attrs, Shaping::Advanced);
        buffer.shape_until_scroll(&mut self.font_system, false);
        buffer
    }
}

fn attrs_for(families: &ResolvedFamilies, variant: FontVariant) -> Attrs<'_> {
    let family = match families.get(variant) {
        Some(name) => Family::Name(name),
        None => Family::SansSerif,
    };
    let weight = match variant {
        FontVariant::Bold | FontVariant::BoldItalic => Weight::BOLD,
        _ => Weight::NORMAL,
    };
    let style = match variant {
        FontVariant::Italic | FontVariant::BoldItalic => Style::Italic,
        _ => Style::Normal,
    };
    Attrs::new().family(family).weight(weight).style(style)
}

/// cosmic-text rasterizer over a lazily loaded font database
pub struct CosmicRasterizer {
    font_dir: PathBuf,
    state: OnceCell<Mutex<CosmicState>>,
}

impl CosmicRasterizer {
    pub fn new(font_dir: impl Into<PathBuf>) -> Self {
        Self {
            font_dir: font_dir.into(),
            state: OnceCell::new(),
        }
    }

    fn state(&self) -> &Mutex<CosmicState> {
        self.state.get_or_init(|| {
            info!("Loading fonts from {}", self.font_dir.display());
            Mutex::new(CosmicState::load(&self.font_dir))
        })
    }
}

fn blend(canvas: &mut RgbaImage, x: i32, y: i32, color: CosmicColor) {
    if x < 0 || y < 0 || x >= canvas.width() as i32 || y >= canvas.height() as i32 {
        return;
    }
    let existing = canvas.get_pixel(x as u32, y as u32);

    // Alpha blend
    let alpha = color.a() as f32 / 255.0;
    let inv_alpha = 1.0 - alpha;
    let blended = Rgba([
        ((color.r() as f32 * alpha) + (existing[0] as f32 * inv_alpha)) as u8,
        ((color.g() as f32 * alpha) + (existing[1] as f32 * inv_alpha)) as u8,
        ((color.b() as f32 * alpha) + (existing[2] as f32 * inv_alpha)) as u8,
        existing[3].max(color.a()),
    ]);
    canvas.put_pixel(x as u32, y as u32, blended);
}

impl TextRasterizer for CosmicRasterizer {
    fn line_width(&self, text: &str, font: &FontSpec) -> f32 {
        if text.is_empty() {
            return 0.0;
        }
        let mut state = self.state().lock();
        let buffer = state.shape(text, font);
        buffer
            .layout_runs()
            .map(|run| run.line_w)
            .fold(0.0f32, f32::max)
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
        let mut guard = self.state().lock();
        let state = &mut *guard;
        let buffer = state.shape(text, font);

        let outline_color = CosmicColor::rgba(outline[0], outline[1], outline[2], outline[3]);
        for &(dx, dy) in outline_offsets {
            buffer.draw(
                &mut state.font_system,
                &mut state.swash_cache,
                outline_color,
                |px, py, w, h, color| {
                    for oy in 0..h as i32 {
                        for ox in 0..w as i32 {
                            blend(canvas, x + dx + px + ox, y + dy + py + oy, color);
                        }
                    }
                },
            );
        }

        let fill_color = CosmicColor::rgba(fill[0], fill[1], fill[2], fill[3]);
        buffer.draw(
            &mut state.font_system,
            &mut state.swash_cache,
            fill_color,
            |px, py, w, h, color| {
                for oy in 0..h as i32 {
                    for ox in 0..w as i32 {
                        blend(canvas, x + px + ox, y + py + oy, color);
                    }
                }
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snap_font_size() {
        assert_eq!(snap_font_size(16), 16);
        assert_eq!(snap_font_size(17), 16);
        assert_eq!(snap_font_size(4), MIN_FONT_SIZE);
        assert_eq!(snap_font_size(90), MAX_FONT_SIZE);
    }

    #[test]
    fn test_variant_from_style() {
        let style = TextStyle {
            weight: FontWeight::Bold,
            italic: true,
            ..TextStyle::default()
        };
        assert_eq!(FontVariant::from_style(&style), FontVariant::BoldItalic);
        assert_eq!(
            FontVariant::from_style(&TextStyle::default()),
            FontVariant::Regular
        );
    }

    #[test]
    fn test_missing_variant_uses_regular_family() {
        let families = ResolvedFamilies {
            regular: Some("Body".to_string()),
            ..ResolvedFamilies::default()
        };
        assert_eq!(families.get(FontVariant::Bold), Some("Body"));
        assert_eq!(ResolvedFamilies::default().get(FontVariant::Italic), None);
    }

    #[test]
    fn test_font_loading_is_lazy() {
        let rasterizer = CosmicRasterizer::new("definitely/not/a/font/dir");
        assert!(rasterizer.state.get().is_none());
    }
}
