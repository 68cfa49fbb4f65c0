// Page pipeline: one item through Detect -> Recognize -> Translate -> Compose

use image::DynamicImage;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, info, instrument};

use crate::core::errors::{
    ItemContext, PipelineError, PipelineResult, RenderingError, TranslationError,
};
use crate::core::types::{
    ArtifactRef, BackgroundMasks, NewSession, SourceRef, StageTimings, TextBlock, WorkStatus,
};
use crate::services::collaborators::{
    is_untranslatable, reading_order, Detector, OcrEngine, Recognizer, Translator,
};
use crate::services::rendering::LayoutEngine;
use crate::services::session::SessionStore;
use crate::services::storage::{write_png, ArtifactStore};
use crate::utils::{crop_regions_async, decode_image_async, load_image_async, Metrics, Stage};

/// One submitted source and its progress.
///
/// Owns a scratch directory that is deleted when the item is dropped.
pub struct WorkItem {
    ordinal: usize,
    source: SourceRef,
    status: WorkStatus,
    error: Option<String>,
    output_name: String,
    scratch: TempDir,
}

impl WorkItem {
    pub fn new(ordinal: usize, source: SourceRef, temp_root: &Path) -> std::io::Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix(&format!("item{ordinal}_"))
            .tempdir_in(temp_root)?;
        let output_name = composed_name(&source.name());
        Ok(Self {
            ordinal,
            source,
            status: WorkStatus::Pending,
            error: None,
            output_name,
            scratch,
        })
    }

    /// Override the composed page's file name
    pub fn with_output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = name.into();
        self
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn source(&self) -> &SourceRef {
        &self.source
    }

    pub fn source_name(&self) -> String {
        self.source.name()
    }

    pub fn status(&self) -> WorkStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    fn advance(&mut self, status: WorkStatus) {
        debug!("Item {}: {:?} -> {:?}", self.ordinal, self.status, status);
        self.status = status;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = WorkStatus::Failed;
        self.error = Some(message.into());
    }
}

/// Per-batch knobs passed to every item
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub source_language: String,
    pub target_language: String,
    pub ocr_engine: OcrEngine,
    pub confidence_threshold: f32,
    pub row_threshold: i32,
}

/// What a successful item produced
#[derive(Debug, Clone)]
pub struct PageOutput {
    pub composed_ref: ArtifactRef,
    pub session_id: Option<String>,
    pub block_count: usize,
    pub timings: StageTimings,
}

/// Output file name for a source: its stem with a `.png` extension
pub fn composed_name(source_name: &str) -> String {
    let stem = Path::new(source_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "page".to_string());
    format!("{stem}.png")
}

/// Output names for a whole batch, one per source in order.
///
/// Sources sharing a stem get their ordinal as a prefix so no page overwrites another.
pub fn composed_names(source_names: &[String]) -> Vec<String> {
    let bases: Vec<String> = source_names.iter().map(|n| composed_name(n)).collect();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for base in &bases {
        *counts.entry(base.as_str()).or_default() += 1;
    }
    let mut used: HashSet<String> = bases
        .iter()
        .filter(|b| counts[b.as_str()] == 1)
        .cloned()
        .collect();

    bases
        .iter()
        .enumerate()
        .map(|(ordinal, base)| {
            if counts[base.as_str()] == 1 {
                return base.clone();
            }
            let stem = base.trim_end_matches(".png");
            let mut candidate = format!("{ordinal}_{stem}.png");
            let mut n = 1;
            while !used.insert(candidate.clone()) {
                candidate = format!("{ordinal}_{stem}_{n}.png");
                n += 1;
            }
            candidate
        })
        .collect()
}

fn stage_of(status: WorkStatus) -> Option<Stage> {
    match status {
        WorkStatus::Detecting => Some(Stage::Detect),
        WorkStatus::Recognizing => Some(Stage::Recognize),
        WorkStatus::Translating => Some(Stage::Translate),
        WorkStatus::Composing => Some(Stage::Compose),
        _ => None,
    }
}

pub struct PagePipeline {
    detector: Arc<dyn Detector>,
    recognizer: Arc<dyn Recognizer>,
    translator: Arc<dyn Translator>,
    engine: Arc<LayoutEngine>,
    output: Arc<dyn ArtifactStore>,
    sessions: Option<Arc<SessionStore>>,
    metrics: Metrics,
}

impl PagePipeline {
    pub fn new(
        detector: Arc<dyn Detector>,
        recognizer: Arc<dyn Recognizer>,
        translator: Arc<dyn Translator>,
        engine: Arc<LayoutEngine>,
        output: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            detector,
            recognizer,
            translator,
            engine,
            output,
            sessions: None,
            metrics: Metrics::new(),
        }
    }

    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn sessions(&self) -> Option<&Arc<SessionStore>> {
        self.sessions.as_ref()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Run every stage for `item`. `session_group` is set in edit mode.
    #[instrument(skip_all, fields(ordinal = item.ordinal(), source = %item.source_name()))]
    pub async fn process(
        &self,
        item: &mut WorkItem,
        settings: &PipelineSettings,
        session_group: Option<&str>,
    ) -> PipelineResult<PageOutput> {
        let result = self.run(item, settings, session_group).await;
        match &result {
            Ok(output) => {
                item.advance(WorkStatus::Done);
                info!(
                    "Item {} done: {} blocks -> {}",
                    item.ordinal(),
                    output.block_count,
                    output.composed_ref
                );
            }
            Err(e) => {
                if let Some(stage) = stage_of(item.status()) {
                    self.metrics.record_stage_failure(stage);
                }
                item.fail(e.to_string());
            }
        }
        result
    }

    async fn run(
        &self,
        item: &mut WorkItem,
        settings: &PipelineSettings,
        session_group: Option<&str>,
    ) -> PipelineResult<PageOutput> {
        let ordinal = item.ordinal();
        let mut timings = StageTimings::default();

        // Detect
        item.advance(WorkStatus::Detecting);
        let started = Instant::now();
        let image = Arc::new(self.load_source(item).await?);
        let mut blocks = self.detect(&image, settings, ordinal).await?;
        timings.detect = started.elapsed();
        self.metrics.record_stage_duration(Stage::Detect, timings.detect);

        // Recognize
        item.advance(WorkStatus::Recognizing);
        let started = Instant::now();
        self.recognize(&image, &mut blocks, settings, ordinal).await?;
        timings.recognize = started.elapsed();
        self.metrics
            .record_stage_duration(Stage::Recognize, timings.recognize);

        // Translate
        item.advance(WorkStatus::Translating);
        let started = Instant::now();
        self.translate(&mut blocks, settings, ordinal).await?;
        timings.translate = started.elapsed();
        self.metrics
            .record_stage_duration(Stage::Translate, timings.translate);

        // Compose
        item.advance(WorkStatus::Composing);
        let started = Instant::now();
        let (composed_ref, session_id) = self
            .compose(item, image, &blocks, settings, session_group)
            .await?;
        timings.compose = started.elapsed();
        self.metrics.record_stage_duration(Stage::Compose, timings.compose);

        Ok(PageOutput {
            composed_ref,
            session_id,
            block_count: blocks.len(),
            timings,
        })
    }

    async fn load_source(&self, item: &WorkItem) -> PipelineResult<DynamicImage> {
        let decoded = match item.source() {
            SourceRef::Path(path) => load_image_async(path.clone()).await,
            SourceRef::Bytes { bytes, .. } => decode_image_async(Arc::clone(bytes)).await,
        };
        decoded.map_err(|e| PipelineError::ImageLoadFailed {
            ordinal: item.ordinal(),
            reason: format!("{e:#}"),
        })
    }

    async fn detect(
        &self,
        image: &DynamicImage,
        settings: &PipelineSettings,
        ordinal: usize,
    ) -> PipelineResult<Vec<TextBlock>> {
        let (width, height) = (image.width(), image.height());
        let detections = self
            .detector
            .detect(image, settings.confidence_threshold)
            .await
            .for_item(ordinal)?;
        let found = detections.len();

        let clamped = detections
            .into_iter()
            .filter_map(|mut d| {
                d.bbox = d.bbox.clamped(width, height)?;
                Some(d)
            })
            .collect();

        let blocks: Vec<TextBlock> = reading_order(clamped, settings.row_threshold)
            .into_iter()
            .enumerate()
            .map(|(id, d)| {
                let mut block = TextBlock::new(id as u32, d.bbox, d.class);
                block.confidence = d.confidence;
                block
            })
            .collect();

        debug!(
            "Item {}: {} regions ({} dropped as degenerate)",
            ordinal,
            blocks.len(),
            found - blocks.len()
        );
        Ok(blocks)
    }

    async fn recognize(
        &self,
        image: &Arc<DynamicImage>,
        blocks: &mut [TextBlock],
        settings: &PipelineSettings,
        ordinal: usize,
    ) -> PipelineResult<()> {
        if blocks.is_empty() {
            return Ok(());
        }
        let boxes = blocks.iter().map(|b| b.bbox).collect();
        let crops = crop_regions_async(Arc::clone(image), boxes)
            .await
            .map_err(|e| PipelineError::TaskJoinFailed(format!("{e:#}")))?;

        let engine = settings.ocr_engine.resolve(&settings.source_language);
        for (block, crop) in blocks.iter_mut().zip(crops.iter()) {
            let text = self
                .recognizer
                .recognize(crop, &settings.source_language, engine)
                .await
                .map_err(|source| PipelineError::RecognitionFailed {
                    ordinal,
                    block_id: block.id,
                    source,
                })?;
            block.source_text = text.trim().to_string();
        }
        Ok(())
    }

    async fn translate(
        &self,
        blocks: &mut [TextBlock],
        settings: &PipelineSettings,
        ordinal: usize,
    ) -> PipelineResult<()> {
        let pending: Vec<usize> = (0..blocks.len())
            .filter(|&i| !is_untranslatable(&blocks[i].source_text))
            .collect();

        for block in blocks.iter_mut() {
            if is_untranslatable(&block.source_text) {
                block.translated_text = Some(block.source_text.clone());
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = pending
            .iter()
            .map(|&i| blocks[i].source_text.clone())
            .collect();
        let translated = self
            .translator
            .translate(&texts, &settings.source_language, &settings.target_language)
            .await
            .for_item(ordinal)?;

        if translated.len() != texts.len() {
            return Err(TranslationError::LengthMismatch {
                expected: texts.len(),
                got: translated.len(),
            })
            .for_item(ordinal);
        }

        for (i, text) in pending.into_iter().zip(translated) {
            blocks[i].translated_text = Some(text);
        }
        Ok(())
    }

    async fn compose(
        &self,
        item: &WorkItem,
        image: Arc<DynamicImage>,
        blocks: &[TextBlock],
        settings: &PipelineSettings,
        session_group: Option<&str>,
    ) -> PipelineResult<(ArtifactRef, Option<String>)> {
        let ordinal = item.ordinal();
        let masks = BackgroundMasks::from_blocks(image.width(), image.height(), blocks);

        let engine = Arc::clone(&self.engine);
        let owned_blocks = blocks.to_vec();
        let owned_masks = masks.clone();
        let source = Arc::clone(&image);
        let (repaired, composed) = tokio::task::spawn_blocking(move || {
            let background = source.to_rgba8();
            let outcome = engine.repair_background(&background, &owned_masks)?;
            let mut composed = outcome.image.clone();
            engine.draw_blocks(&mut composed, &owned_blocks, &outcome.dark_regions);
            Ok::<_, RenderingError>((outcome.image, composed))
        })
        .await
        .map_err(|e| PipelineError::TaskJoinFailed(e.to_string()))?
        .for_item(ordinal)?;

        let source_name = item.source_name();
        let composed_ref = self
            .output
            .put_image("", item.output_name(), DynamicImage::ImageRgba8(composed))
            .await
            .for_item(ordinal)?;

        let Some(group_id) = session_group else {
            return Ok((composed_ref, None));
        };
        let Some(sessions) = &self.sessions else {
            return Ok((composed_ref, None));
        };

        let original = item.scratch_dir().join("source.png");
        let repaired_path = item.scratch_dir().join("repaired.png");
        write_png(&original, (*image).clone()).await.for_item(ordinal)?;
        write_png(&repaired_path, DynamicImage::ImageRgba8(repaired))
            .await
            .for_item(ordinal)?;

        let session_id = sessions
            .create_session(NewSession {
                group_id: Some(group_id.to_string()),
                ordinal,
                source_name,
                source_language: settings.source_language.clone(),
                target_language: settings.target_language.clone(),
                original,
                repaired: repaired_path,
                blocks: blocks.to_vec(),
                masks,
            })
            .await
            .for_item(ordinal)?;

        Ok((composed_ref, Some(session_id)))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::core::config::SessionConfig;
    use crate::services::rendering::test_support::engine;
    use crate::services::storage::MemoryStore;

    fn pipeline(translator: Arc<dyn Translator>, output: &MemoryStore) -> PagePipeline {
        PagePipeline::new(
            Arc::new(MockDetector(Script::default())),
            Arc::new(MockRecognizer),
            translator,
            Arc::new(engine()),
            Arc::new(output.clone()),
        )
    }

    #[tokio::test]
    async fn test_process_runs_all_stages() {
        let temp = TempDir::new().unwrap();
        let output = MemoryStore::new();
        let pipeline = pipeline(Arc::new(UpperTranslator), &output);
        let mut item = WorkItem::new(0, page("p1.jpg", 60), temp.path()).unwrap();

        let out = pipeline.process(&mut item, &settings(), None).await.unwrap();
        assert_eq!(item.status(), WorkStatus::Done);
        assert_eq!(out.block_count, 2);
        assert_eq!(out.composed_ref.as_str(), "mem:///p1.png");
        assert!(out.session_id.is_none());
        assert_eq!(pipeline.metrics().stage_failures(Stage::Detect), 0);
    }

    #[tokio::test]
    async fn test_translation_length_mismatch_fails_item() {
        let temp = TempDir::new().unwrap();
        let output = MemoryStore::new();
        let pipeline = pipeline(Arc::new(ShortTranslator), &output);
        let mut item = WorkItem::new(3, page("p.png", 60), temp.path()).unwrap();

        let err = pipeline.process(&mut item, &settings(), None).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::TranslationFailed {
                ordinal: 3,
                source: TranslationError::LengthMismatch { expected: 1, got: 0 }
            }
        ));
        assert_eq!(item.status(), WorkStatus::Failed);
        assert!(item.error().is_some());
        assert_eq!(pipeline.metrics().stage_failures(Stage::Translate), 1);
        assert_eq!(output.artifact_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_source_fails_detect_stage() {
        let temp = TempDir::new().unwrap();
        let output = MemoryStore::new();
        let pipeline = pipeline(Arc::new(UpperTranslator), &output);
        let source = SourceRef::Path(temp.path().join("gone.png"));
        let mut item = WorkItem::new(2, source, temp.path()).unwrap();

        let err = pipeline.process(&mut item, &settings(), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::ImageLoadFailed { ordinal: 2, .. }));
        assert_eq!(pipeline.metrics().stage_failures(Stage::Detect), 1);
    }

    #[tokio::test]
    async fn test_edit_mode_creates_session() {
        let temp = TempDir::new().unwrap();
        let output = MemoryStore::new();
        let memory = MemoryStore::new();
        let sessions = Arc::new(SessionStore::new(
            Arc::new(memory.clone()),
            Arc::new(memory.clone()),
            &SessionConfig::default(),
        ));
        let pipeline = pipeline(Arc::new(UpperTranslator), &output).with_sessions(sessions.clone());
        let mut item = WorkItem::new(1, page("p2.png", 60), temp.path()).unwrap();

        let out = pipeline.process(&mut item, &settings(), Some("grp")).await.unwrap();
        let id = out.session_id.unwrap();
        let view = sessions.get_session(&id, false).await.unwrap().unwrap();
        assert_eq!(view.session.group_id, "grp");
        assert_eq!(view.session.ordinal, 1);

        // Reading order: the left region comes first; the narrow one passes through
        let texts: Vec<_> = view
            .session
            .blocks
            .iter()
            .map(|b| b.translated_text.clone().unwrap())
            .collect();
        assert_eq!(texts, vec!["TEXT18".to_string(), "。".to_string()]);
    }

    #[tokio::test]
    async fn test_scratch_removed_on_drop() {
        let temp = TempDir::new().unwrap();
        let item = WorkItem::new(0, page("p.png", 20), temp.path()).unwrap();
        let scratch = item.scratch_dir().to_path_buf();
        assert!(scratch.exists());
        drop(item);
        assert!(!scratch.exists());
    }

    #[test]
    fn test_composed_name() {
        assert_eq!(composed_name("ch1/page01.jpg"), "page01.png");
        assert_eq!(composed_name("page"), "page.png");
    }

    #[test]
    fn test_composed_names_disambiguate_shared_stems() {
        let names: Vec<String> = ["a.png", "b.jpg", "a.jpg", "0_a.png"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            composed_names(&names),
            vec!["0_a_1.png", "b.png", "2_a.png", "0_a.png"]
        );
    }
}
