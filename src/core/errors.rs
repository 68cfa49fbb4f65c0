// Error types for the translation pipeline, layout engine and session store
//
// One thiserror enum per concern with:
// - Ordinal context for per-item pipeline failures
// - Path context for storage failures
// - Source error chaining

use std::path::PathBuf;
use thiserror::Error;

/// Detector collaborator errors
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Detector backend failed: {0}")]
    BackendFailed(String),

    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidImageSize { width: u32, height: u32 },

    #[error("Detector timed out after {0}ms")]
    Timeout(u64),
}

/// Recognizer collaborator errors
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("Recognition engine '{engine}' failed: {reason}")]
    EngineFailed { engine: String, reason: String },

    #[error("Recognizer timed out after {0}ms")]
    Timeout(u64),
}

/// Translator collaborator errors
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("Translation backend failed: {0}")]
    BackendFailed(String),

    #[error("Translator returned {got} strings for {expected} inputs")]
    LengthMismatch { expected: usize, got: usize },

    #[error("Rate limit exceeded (retry after {0}s)")]
    RateLimited(u64),

    #[error("Translator timed out after {0}ms")]
    Timeout(u64),

    #[error("Circuit open: translator is failing fast")]
    CircuitOpen,
}

/// Layout engine errors
#[derive(Debug, Error)]
pub enum RenderingError {
    #[error("Block {block_id} has an empty box after clamping to {width}x{height}")]
    InvalidBox { block_id: u32, width: u32, height: u32 },

    #[error("Mask is {mask_width}x{mask_height} but image is {width}x{height}")]
    MaskSizeMismatch {
        mask_width: u32,
        mask_height: u32,
        width: u32,
        height: u32,
    },

    #[error("Inpainting failed: {0}")]
    InpaintFailed(String),

    #[error("Image processing failed: {0}")]
    ImageError(#[from] image::ImageError),
}

/// Durable storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Artifact not found: {0}")]
    ArtifactMissing(String),

    #[error("Image codec failed for {name}: {source}")]
    Image {
        name: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Editing session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session storage failed: {0}")]
    Store(#[from] StoreError),

    #[error("Session {0} could not be created: id space exhausted after retries")]
    IdCollision(String),

    #[error("Session {session_id} rendering failed: {source}")]
    Rendering {
        session_id: String,
        #[source]
        source: RenderingError,
    },

    #[error("Background task failed: {0}")]
    TaskJoinFailed(String),
}

/// Pipeline orchestration errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Image loading failed for item {ordinal}: {reason}")]
    ImageLoadFailed { ordinal: usize, reason: String },

    #[error("Detection failed on item {ordinal}: {source}")]
    DetectionFailed {
        ordinal: usize,
        #[source]
        source: DetectionError,
    },

    #[error("Recognition failed for block {block_id} on item {ordinal}: {source}")]
    RecognitionFailed {
        ordinal: usize,
        block_id: u32,
        #[source]
        source: RecognitionError,
    },

    #[error("Translation failed on item {ordinal}: {source}")]
    TranslationFailed {
        ordinal: usize,
        #[source]
        source: TranslationError,
    },

    #[error("Composition failed on item {ordinal}: {source}")]
    CompositionFailed {
        ordinal: usize,
        #[source]
        source: RenderingError,
    },

    #[error("Storage failed on item {ordinal}: {source}")]
    StorageFailed {
        ordinal: usize,
        #[source]
        source: StoreError,
    },

    #[error("Session creation failed on item {ordinal}: {source}")]
    SessionFailed {
        ordinal: usize,
        #[source]
        source: SessionError,
    },

    #[error("Item {0} was cancelled before it started")]
    Cancelled(usize),

    #[error("Item {ordinal} panicked: {reason}")]
    ItemPanicked { ordinal: usize, reason: String },

    #[error("Batch is empty")]
    EmptyBatch,

    #[error("max_workers must be > 0")]
    NoWorkers,

    #[error("Durable storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Task join failed: {0}")]
    TaskJoinFailed(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Confidence threshold must be in [0.0, 1.0], got {0}")]
    InvalidConfidenceThreshold(f32),

    #[error("max_workers must be > 0, got {0}")]
    InvalidWorkerCount(usize),

    #[error("Invalid session config: {0}")]
    InvalidSessionConfig(String),

    #[error("Invalid rendering config: {0}")]
    InvalidRenderingConfig(String),

    #[error("Invalid storage path: {0}")]
    InvalidStoragePath(String),
}

// Convenience type aliases for Results
pub type DetectionResult<T> = Result<T, DetectionError>;
pub type RecognitionResult<T> = Result<T, RecognitionError>;
pub type TranslationResult<T> = Result<T, TranslationError>;
pub type RenderingResult<T> = Result<T, RenderingError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type SessionResult<T> = Result<T, SessionError>;
pub type PipelineResult<T> = Result<T, PipelineError>;
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Attach the item ordinal to a stage error
pub trait ItemContext<T> {
    fn for_item(self, ordinal: usize) -> PipelineResult<T>;
}

impl<T> ItemContext<T> for DetectionResult<T> {
    fn for_item(self, ordinal: usize) -> PipelineResult<T> {
        self.map_err(|source| PipelineError::DetectionFailed { ordinal, source })
    }
}

impl<T> ItemContext<T> for TranslationResult<T> {
    fn for_item(self, ordinal: usize) -> PipelineResult<T> {
        self.map_err(|source| PipelineError::TranslationFailed { ordinal, source })
    }
}

impl<T> ItemContext<T> for RenderingResult<T> {
    fn for_item(self, ordinal: usize) -> PipelineResult<T> {
        self.map_err(|source| PipelineError::CompositionFailed { ordinal, source })
    }
}

impl<T> ItemContext<T> for StoreResult<T> {
    fn for_item(self, ordinal: usize) -> PipelineResult<T> {
        self.map_err(|source| PipelineError::StorageFailed { ordinal, source })
    }
}

impl<T> ItemContext<T> for SessionResult<T> {
    fn for_item(self, ordinal: usize) -> PipelineResult<T> {
        self.map_err(|source| PipelineError::SessionFailed { ordinal, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_context_carries_ordinal() {
        let failed: TranslationResult<()> = Err(TranslationError::LengthMismatch {
            expected: 3,
            got: 2,
        });
        let err = failed.for_item(7).unwrap_err();
        assert!(matches!(err, PipelineError::TranslationFailed { ordinal: 7, .. }));
        assert_eq!(
            err.to_string(),
            "Translation failed on item 7: Translator returned 2 strings for 3 inputs"
        );
    }
}
