// Library exports for the manga page translation pipeline
//
// Batch orchestration over external detection, recognition and translation
// collaborators, a text layout engine, and editable translation sessions

// Core modules
pub mod core;
pub mod middleware;
pub mod orchestration;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use crate::core::{
    config::Config,
    errors::{
        ConfigError, DetectionError, PipelineError, RecognitionError, RenderingError,
        SessionError, StoreError, TranslationError,
    },
    types::{
        ArtifactRef, BatchOutcome, ItemFailure, ItemResult, Session, SessionView, SourceRef,
        StylePatch, TextBlock, TextStyle,
    },
};

pub use middleware::{BreakerTranslator, CircuitBreaker, CircuitBreakerConfig, CircuitState};

pub use orchestration::{collect_sources, BatchOrchestrator, BatchRequest};

pub use services::{
    Detector, LayoutEngine, OcrEngine, Recognizer, ServiceRegistry, SessionEditor, SessionStore,
    Translator,
};

pub use utils::Metrics;
