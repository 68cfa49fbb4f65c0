pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{
    ConfigError, DetectionError, PipelineError, RecognitionError, RenderingError, SessionError,
    StoreError, TranslationError,
};
pub use types::{
    ArtifactRef, BackgroundClass, BackgroundMasks, BatchOutcome, BoundingBox, GroupMember,
    HorizontalAlign, ItemFailure, ItemResult, NewSession, Session, SessionView, SourceRef,
    StylePatch, TextBlock, TextStyle, WorkStatus,
};
