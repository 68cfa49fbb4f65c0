pub mod batch_orchestrator;
pub mod page_pipeline;

pub use batch_orchestrator::{collect_sources, BatchOrchestrator, BatchRequest};
pub use page_pipeline::{PagePipeline, PipelineSettings, WorkItem};
