// Data model shared by the pipeline, the layout engine and the session store

use chrono::{DateTime, Utc};
use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Axis-aligned box in image pixels, `x2`/`y2` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// Clamp to `[0, width] x [0, height]`. Returns `None` when nothing is left.
    pub fn clamped(&self, width: u32, height: u32) -> Option<Self> {
        let (w, h) = (width as i32, height as i32);
        let x1 = self.x1.min(self.x2).clamp(0, w);
        let x2 = self.x1.max(self.x2).clamp(0, w);
        let y1 = self.y1.min(self.y2).clamp(0, h);
        let y2 = self.y1.max(self.y2).clamp(0, h);
        (x1 < x2 && y1 < y2).then_some(Self { x1, y1, x2, y2 })
    }

    /// Shift by `(dx, dy)`. Returns `None` if any coordinate overflows.
    pub fn translated(&self, dx: i32, dy: i32) -> Option<Self> {
        Some(Self {
            x1: self.x1.checked_add(dx)?,
            y1: self.y1.checked_add(dy)?,
            x2: self.x2.checked_add(dx)?,
            y2: self.y2.checked_add(dy)?,
        })
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.x1 < other.x2 && other.x1 < self.x2 && self.y1 < other.y2 && other.y1 < self.y2
    }
}

/// Classification of the pixels under a detected region; selects the repair strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundClass {
    /// Speech bubble interior, repaired with a flat white fill
    Bubble,
    /// Text drawn over artwork, repaired by dark fill or inpainting
    TextOnBackground,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FontWeight {
    #[default]
    Normal,
    Bold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HorizontalAlign {
    Left,
    #[default]
    Center,
    Right,
}

pub const DEFAULT_FONT_SIZE: u32 = 16;

/// Per-block text style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextStyle {
    pub font_size: u32,
    pub weight: FontWeight,
    pub italic: bool,
    pub align: HorizontalAlign,
    pub offset_x: i32,
    pub offset_y: i32,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_size: DEFAULT_FONT_SIZE,
            weight: FontWeight::Normal,
            italic: false,
            align: HorizontalAlign::Center,
            offset_x: 0,
            offset_y: 0,
        }
    }
}

/// Partial style update; only `Some` fields are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StylePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<FontWeight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub align: Option<HorizontalAlign>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_x: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_y: Option<i32>,
}

impl TextStyle {
    pub fn merge(&mut self, patch: &StylePatch) {
        if let Some(font_size) = patch.font_size {
            self.font_size = font_size;
        }
        if let Some(weight) = patch.weight {
            self.weight = weight;
        }
        if let Some(italic) = patch.italic {
            self.italic = italic;
        }
        if let Some(align) = patch.align {
            self.align = align;
        }
        if let Some(offset_x) = patch.offset_x {
            self.offset_x = offset_x;
        }
        if let Some(offset_y) = patch.offset_y {
            self.offset_y = offset_y;
        }
    }
}

/// A localized text region with its source text, translation and style.
///
/// `translated_text == None` means not yet translated; `Some("")` is an
/// intentionally blank block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub id: u32,
    pub bbox: BoundingBox,
    pub background: BackgroundClass,
    #[serde(default)]
    pub confidence: f32,
    pub source_text: String,
    pub translated_text: Option<String>,
    #[serde(default)]
    pub style: TextStyle,
}

impl TextBlock {
    pub fn new(id: u32, bbox: BoundingBox, background: BackgroundClass) -> Self {
        Self {
            id,
            bbox,
            background,
            confidence: 0.0,
            source_text: String::new(),
            translated_text: None,
            style: TextStyle::default(),
        }
    }
}

/// Bubble and text-on-background masks, same size as the page
#[derive(Debug, Clone)]
pub struct BackgroundMasks {
    pub bubble: GrayImage,
    pub text: GrayImage,
}

impl BackgroundMasks {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            bubble: GrayImage::new(width, height),
            text: GrayImage::new(width, height),
        }
    }

    /// Rasterize block boxes into the mask matching each block's class
    pub fn from_blocks(width: u32, height: u32, blocks: &[TextBlock]) -> Self {
        let mut masks = Self::empty(width, height);
        for block in blocks {
            let Some(bbox) = block.bbox.clamped(width, height) else {
                continue;
            };
            let mask = match block.background {
                BackgroundClass::Bubble => &mut masks.bubble,
                BackgroundClass::TextOnBackground => &mut masks.text,
            };
            for y in bbox.y1 as u32..bbox.y2 as u32 {
                for x in bbox.x1 as u32..bbox.x2 as u32 {
                    mask.put_pixel(x, y, Luma([255]));
                }
            }
        }
        masks
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.bubble.dimensions()
    }
}

/// Reference to a durable artifact (file path or store key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(pub String);

impl ArtifactRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a batch input comes from
#[derive(Debug, Clone)]
pub enum SourceRef {
    Path(PathBuf),
    Bytes { name: String, bytes: Arc<Vec<u8>> },
}

impl SourceRef {
    pub fn name(&self) -> String {
        match self {
            SourceRef::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            SourceRef::Bytes { name, .. } => name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkStatus {
    Pending,
    Detecting,
    Recognizing,
    Translating,
    Composing,
    Done,
    Failed,
}

/// Per-stage wall time for one item
#[derive(Debug, Clone, Copy, Default)]
pub struct StageTimings {
    pub detect: Duration,
    pub recognize: Duration,
    pub translate: Duration,
    pub compose: Duration,
}

impl StageTimings {
    pub fn merge(&mut self, other: &StageTimings) {
        self.detect += other.detect;
        self.recognize += other.recognize;
        self.translate += other.translate;
        self.compose += other.compose;
    }
}

/// Successful item in the batch result contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    pub ordinal: usize,
    pub source_name: String,
    pub composed_ref: ArtifactRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub block_count: usize,
    pub processing_time_ms: f64,
}

/// Failed item in the batch result contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFailure {
    pub ordinal: usize,
    pub source_name: String,
    pub message: String,
}

/// Batch-wide counters and stage timings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchAnalytics {
    pub total_items: usize,
    pub successful: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_blocks: usize,
    pub detect_time_ms: f64,
    pub recognize_time_ms: f64,
    pub translate_time_ms: f64,
    pub compose_time_ms: f64,
    pub total_time_ms: f64,
}

/// Output of `submit_batch`: successes in ordinal order plus failures keyed by ordinal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub results: Vec<ItemResult>,
    pub errors: BTreeMap<usize, ItemFailure>,
    pub analytics: BatchAnalytics,
}

/// Persisted editable snapshot of one composed page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub group_id: String,
    pub ordinal: usize,
    pub created_at: DateTime<Utc>,
    pub source_name: String,
    #[serde(default)]
    pub source_language: String,
    #[serde(default)]
    pub target_language: String,
    pub original_ref: ArtifactRef,
    pub repaired_ref: ArtifactRef,
    pub bubble_mask_ref: ArtifactRef,
    pub text_mask_ref: ArtifactRef,
    pub blocks: Vec<TextBlock>,
}

impl Session {
    pub fn block_mut(&mut self, block_id: u32) -> Option<&mut TextBlock> {
        self.blocks.iter_mut().find(|b| b.id == block_id)
    }

    pub fn member(&self) -> GroupMember {
        GroupMember {
            session_id: self.session_id.clone(),
            source_name: self.source_name.clone(),
            ordinal: self.ordinal,
        }
    }
}

/// One session as seen from its group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub session_id: String,
    pub source_name: String,
    pub ordinal: usize,
}

/// `get_session` result: the session plus its resolved group
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session: Session,
    /// Every member of the group including this session, by ordinal
    pub members: Vec<GroupMember>,
    /// Members excluding this session, by ordinal
    pub siblings: Vec<GroupMember>,
}

/// Inputs for creating a session after a page is composed
#[derive(Debug, Clone)]
pub struct NewSession {
    pub group_id: Option<String>,
    pub ordinal: usize,
    pub source_name: String,
    pub source_language: String,
    pub target_language: String,
    pub original: PathBuf,
    pub repaired: PathBuf,
    pub blocks: Vec<TextBlock>,
    pub masks: BackgroundMasks,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_clamp() {
        let bbox = BoundingBox::new(-10, 5, 120, 40);
        assert_eq!(bbox.clamped(100, 100), Some(BoundingBox::new(0, 5, 100, 40)));

        // Entirely outside the page
        assert_eq!(BoundingBox::new(150, 0, 200, 10).clamped(100, 100), None);

        // Swapped corners are normalized
        assert_eq!(
            BoundingBox::new(50, 60, 10, 20).clamped(100, 100),
            Some(BoundingBox::new(10, 20, 50, 60))
        );
    }

    #[test]
    fn test_bbox_translate_overflow() {
        let bbox = BoundingBox::new(0, 0, 10, 10);
        assert_eq!(bbox.translated(5, -5), Some(BoundingBox::new(5, -5, 15, 5)));
        assert_eq!(bbox.translated(i32::MAX, 0), None);
    }

    #[test]
    fn test_style_merge_is_partial() {
        let mut style = TextStyle {
            align: HorizontalAlign::Left,
            italic: true,
            ..TextStyle::default()
        };
        style.merge(&StylePatch {
            font_size: Some(24),
            ..StylePatch::default()
        });

        assert_eq!(style.font_size, 24);
        assert_eq!(style.align, HorizontalAlign::Left);
        assert!(style.italic);
    }

    #[test]
    fn test_masks_from_blocks() {
        let blocks = vec![
            TextBlock::new(0, BoundingBox::new(0, 0, 4, 4), BackgroundClass::Bubble),
            TextBlock::new(1, BoundingBox::new(6, 6, 20, 20), BackgroundClass::TextOnBackground),
        ];
        let masks = BackgroundMasks::from_blocks(10, 10, &blocks);

        assert_eq!(masks.bubble.get_pixel(2, 2)[0], 255);
        assert_eq!(masks.bubble.get_pixel(7, 7)[0], 0);
        assert_eq!(masks.text.get_pixel(9, 9)[0], 255);
        assert_eq!(masks.text.get_pixel(2, 2)[0], 0);
    }

    #[test]
    fn test_style_defaults_deserialize() {
        let style: TextStyle = serde_json::from_str(r#"{"align":"right"}"#).unwrap();
        assert_eq!(style.font_size, DEFAULT_FONT_SIZE);
        assert_eq!(style.align, HorizontalAlign::Right);
        assert_eq!(style.weight, FontWeight::Normal);
    }
}
