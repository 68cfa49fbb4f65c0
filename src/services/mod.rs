pub mod collaborators;
pub mod registry;
pub mod rendering;
pub mod session;
pub mod storage;

// Re-export commonly used services
pub use collaborators::{Detection, Detector, OcrEngine, Recognizer, Translator};
pub use registry::ServiceRegistry;
pub use rendering::LayoutEngine;
pub use session::{SessionEditor, SessionStore};
pub use storage::{ArtifactStore, DocumentStore, FsStore, MemoryStore};
