// External collaborators: detection, recognition and translation back-ends
//
// The pipeline only sees these traits; concrete model/API clients live outside
// this crate and are injected at construction.

use async_trait::async_trait;
use image::DynamicImage;
use std::fmt;
use std::str::FromStr;

use crate::core::errors::{DetectionResult, RecognitionResult, TranslationResult};
use crate::core::types::{BackgroundClass, BoundingBox};

/// One detected region
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class: BackgroundClass,
}

#[async_trait]
pub trait Detector: Send + Sync {
    /// Regions with confidence >= `confidence_threshold`, in any order
    async fn detect(
        &self,
        image: &DynamicImage,
        confidence_threshold: f32,
    ) -> DetectionResult<Vec<Detection>>;
}

/// Recognition engine selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OcrEngine {
    #[default]
    Auto,
    MangaOcr,
    PaddleOcr,
    EasyOcr,
    Tesseract,
}

impl OcrEngine {
    /// Concrete engine for `language`; non-auto selectors are returned as is
    pub fn resolve(self, language: &str) -> OcrEngine {
        if self != OcrEngine::Auto {
            return self;
        }
        match language {
            "ja" => OcrEngine::MangaOcr,
            "zh" | "ko" | "en" => OcrEngine::PaddleOcr,
            "ru" => OcrEngine::EasyOcr,
            "fr" | "es" | "de" => OcrEngine::Tesseract,
            _ => OcrEngine::PaddleOcr,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OcrEngine::Auto => "auto",
            OcrEngine::MangaOcr => "manga-ocr",
            OcrEngine::PaddleOcr => "paddle-ocr",
            OcrEngine::EasyOcr => "easy-ocr",
            OcrEngine::Tesseract => "tesseract",
        }
    }
}

impl fmt::Display for OcrEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcrEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "auto" => Ok(OcrEngine::Auto),
            "manga-ocr" | "mangaocr" => Ok(OcrEngine::MangaOcr),
            "paddle-ocr" | "paddleocr" | "paddle" => Ok(OcrEngine::PaddleOcr),
            "easy-ocr" | "easyocr" => Ok(OcrEngine::EasyOcr),
            "tesseract" => Ok(OcrEngine::Tesseract),
            other => Err(format!("unknown OCR engine '{other}'")),
        }
    }
}

#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Text in `region`; may be empty
    async fn recognize(
        &self,
        region: &DynamicImage,
        language: &str,
        engine: OcrEngine,
    ) -> RecognitionResult<String>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    /// Index-aligned translations; empty strings pass through unchanged
    async fn translate(
        &self,
        texts: &[String],
        source_language: &str,
        target_language: &str,
    ) -> TranslationResult<Vec<String>>;
}

const SKIP_PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':', '、', '。', '！', '？', '；', '：'];

/// True for text not worth a translator round trip: empty or one punctuation mark
pub fn is_untranslatable(text: &str) -> bool {
    let trimmed = text.trim();
    let mut chars = trimmed.chars();
    match (chars.next(), chars.next()) {
        (None, _) => true,
        (Some(c), None) => SKIP_PUNCTUATION.contains(&c),
        _ => false,
    }
}

/// Sort detections into reading order.
///
/// Regions whose top edges lie within `row_threshold` of the row's first
/// region share a row; rows go top to bottom, regions left to right.
pub fn reading_order(mut detections: Vec<Detection>, row_threshold: i32) -> Vec<Detection> {
    detections.sort_by_key(|d| (d.bbox.y1, d.bbox.x1));

    let mut rows: Vec<Vec<Detection>> = Vec::new();
    for detection in detections {
        match rows.last_mut() {
            Some(row) if (detection.bbox.y1 - row[0].bbox.y1).abs() <= row_threshold => {
                row.push(detection)
            }
            _ => rows.push(vec![detection]),
        }
    }

    rows.into_iter()
        .flat_map(|mut row| {
            row.sort_by_key(|d| d.bbox.x1);
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: i32, y1: i32) -> Detection {
        Detection {
            bbox: BoundingBox::new(x1, y1, x1 + 10, y1 + 10),
            confidence: 0.9,
            class: BackgroundClass::Bubble,
        }
    }

    #[test]
    fn test_auto_engine_table() {
        assert_eq!(OcrEngine::Auto.resolve("ja"), OcrEngine::MangaOcr);
        assert_eq!(OcrEngine::Auto.resolve("ko"), OcrEngine::PaddleOcr);
        assert_eq!(OcrEngine::Auto.resolve("ru"), OcrEngine::EasyOcr);
        assert_eq!(OcrEngine::Auto.resolve("de"), OcrEngine::Tesseract);
        assert_eq!(OcrEngine::Auto.resolve("pt"), OcrEngine::PaddleOcr);
        assert_eq!(OcrEngine::Tesseract.resolve("ja"), OcrEngine::Tesseract);
    }

    #[test]
    fn test_engine_parse() {
        assert_eq!("AUTO".parse::<OcrEngine>(), Ok(OcrEngine::Auto));
        assert_eq!("manga_ocr".parse::<OcrEngine>(), Ok(OcrEngine::MangaOcr));
        assert!("nope".parse::<OcrEngine>().is_err());
    }

    #[test]
    fn test_untranslatable() {
        assert!(is_untranslatable(""));
        assert!(is_untranslatable("  "));
        assert!(is_untranslatable("。"));
        assert!(is_untranslatable("!"));
        assert!(!is_untranslatable("!!"));
        assert!(!is_untranslatable("a"));
    }

    #[test]
    fn test_reading_order_groups_rows() {
        // Second region is 20px lower but still in the first row
        let sorted = reading_order(vec![det(200, 120), det(300, 20), det(10, 0)], 30);
        let xs: Vec<i32> = sorted.iter().map(|d| d.bbox.x1).collect();
        assert_eq!(xs, vec![10, 300, 200]);
    }
}
