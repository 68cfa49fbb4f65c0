// Batch Orchestrator: bounded, staggered workers over a shared item queue

use crossbeam::queue::SegQueue;
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::page_pipeline::{composed_names, PageOutput, PagePipeline, PipelineSettings, WorkItem};
use crate::core::config::Config;
use crate::core::errors::{PipelineError, PipelineResult};
use crate::core::types::{
    BatchAnalytics, BatchOutcome, ItemFailure, ItemResult, SourceRef, StageTimings,
};
use crate::services::collaborators::OcrEngine;
use crate::utils::natural_cmp;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "gif"];

/// One batch submission
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub items: Vec<SourceRef>,
    pub max_workers: usize,
    /// Delay between successive worker launches; zero launches all at once
    pub launch_stagger: Duration,
    pub edit_mode: bool,
    /// Shared group for edit mode. Generated once per batch when absent.
    pub group_id: Option<String>,
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    pub ocr_engine: Option<OcrEngine>,
}

impl BatchRequest {
    /// Request with worker and stagger defaults taken from `config`
    pub fn new(items: Vec<SourceRef>, config: &Config) -> Self {
        Self {
            items,
            max_workers: config.max_workers(),
            launch_stagger: config.launch_stagger(),
            edit_mode: false,
            group_id: None,
            source_language: None,
            target_language: None,
            ocr_engine: None,
        }
    }

    pub fn edit_mode(mut self, group_id: Option<String>) -> Self {
        self.edit_mode = true;
        self.group_id = group_id;
        self
    }

    pub fn languages(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_language = Some(source.into());
        self.target_language = Some(target.into());
        self
    }
}

/// What a worker sends back for each item it took
enum ItemReport {
    Done {
        ordinal: usize,
        source_name: String,
        output: PageOutput,
        elapsed: Duration,
    },
    Failed(ItemFailure),
}

/// Main batch orchestrator
pub struct BatchOrchestrator {
    config: Arc<Config>,
    pipeline: Arc<PagePipeline>,
}

impl BatchOrchestrator {
    pub fn new(config: Arc<Config>, pipeline: Arc<PagePipeline>) -> Self {
        Self { config, pipeline }
    }

    pub fn pipeline(&self) -> &Arc<PagePipeline> {
        &self.pipeline
    }

    /// Process a batch and wait for every item to finish or fail
    pub async fn submit_batch(&self, request: BatchRequest) -> PipelineResult<BatchOutcome> {
        self.submit_batch_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Like [`submit_batch`](Self::submit_batch), stopping early when `cancel` fires.
    ///
    /// In-flight items finish. Items no worker picked up are reported as cancelled.
    #[instrument(skip(self, request, cancel), fields(
        total_items = request.items.len(),
        max_workers = request.max_workers,
        edit_mode = request.edit_mode,
    ))]
    pub async fn submit_batch_with_cancel(
        &self,
        request: BatchRequest,
        cancel: CancellationToken,
    ) -> PipelineResult<BatchOutcome> {
        let total_start = Instant::now();

        if request.items.is_empty() {
            return Err(PipelineError::EmptyBatch);
        }
        if request.max_workers == 0 {
            return Err(PipelineError::NoWorkers);
        }
        self.prepare_storage().await?;

        let group_id = if request.edit_mode {
            if self.pipeline.sessions().is_none() {
                return Err(PipelineError::StorageUnavailable(
                    "edit mode requires a session store".to_string(),
                ));
            }
            Some(
                request
                    .group_id
                    .clone()
                    .unwrap_or_else(|| format!("group_{}", Uuid::new_v4().simple())),
            )
        } else {
            None
        };

        let settings = Arc::new(self.settings_for(&request));
        let total = request.items.len();
        let names: Vec<String> = request.items.iter().map(SourceRef::name).collect();
        let output_names = composed_names(&names);

        let queue = Arc::new(SegQueue::new());
        for ((ordinal, source), output_name) in
            request.items.into_iter().enumerate().zip(output_names)
        {
            let item = WorkItem::new(ordinal, source, &self.config.storage.temp_dir)
                .map_err(|e| {
                    PipelineError::StorageUnavailable(format!(
                        "cannot create scratch space in {}: {}",
                        self.config.storage.temp_dir.display(),
                        e
                    ))
                })?
                .with_output_name(output_name);
            queue.push(item);
        }

        let workers = request.max_workers.min(total);
        info!(
            "Starting batch: {} items, {} workers, stagger {:?}{}",
            total,
            workers,
            request.launch_stagger,
            group_id
                .as_deref()
                .map(|g| format!(", group {g}"))
                .unwrap_or_default()
        );

        // Closed once every item is reported so staggered workers stop waiting
        let launch_gate = cancel.child_token();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handles: Vec<_> = (0..workers)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    request.launch_stagger * worker_id as u32,
                    Arc::clone(&queue),
                    Arc::clone(&self.pipeline),
                    Arc::clone(&settings),
                    group_id.clone(),
                    tx.clone(),
                    cancel.clone(),
                    launch_gate.clone(),
                ))
            })
            .collect();
        drop(tx);

        let mut results = Vec::with_capacity(total);
        let mut errors = BTreeMap::new();
        let mut timings = StageTimings::default();
        let mut total_blocks = 0;

        while let Some(report) = rx.recv().await {
            match report {
                ItemReport::Done {
                    ordinal,
                    source_name,
                    output,
                    elapsed,
                } => {
                    timings.merge(&output.timings);
                    total_blocks += output.block_count;
                    results.push(ItemResult {
                        ordinal,
                        source_name,
                        composed_ref: output.composed_ref,
                        session_id: output.session_id,
                        block_count: output.block_count,
                        processing_time_ms: elapsed.as_secs_f64() * 1000.0,
                    });
                }
                ItemReport::Failed(failure) => {
                    errors.insert(failure.ordinal, failure);
                }
            }
            if results.len() + errors.len() == total {
                launch_gate.cancel();
            }
        }

        for (worker_id, joined) in join_all(handles).await.into_iter().enumerate() {
            if let Err(e) = joined {
                error!("Worker {} terminated abnormally: {}", worker_id, e);
            }
        }

        // Never picked up
        let mut cancelled = 0;
        while let Some(item) = queue.pop() {
            let ordinal = item.ordinal();
            errors.insert(
                ordinal,
                ItemFailure {
                    ordinal,
                    source_name: item.source_name(),
                    message: PipelineError::Cancelled(ordinal).to_string(),
                },
            );
            cancelled += 1;
        }

        // Lost to a panicked worker
        for (ordinal, source_name) in names.into_iter().enumerate() {
            let reported = errors.contains_key(&ordinal)
                || results.iter().any(|r: &ItemResult| r.ordinal == ordinal);
            if !reported {
                errors.insert(
                    ordinal,
                    ItemFailure {
                        ordinal,
                        source_name,
                        message: PipelineError::TaskJoinFailed(format!(
                            "worker stopped while processing item {ordinal}"
                        ))
                        .to_string(),
                    },
                );
            }
        }

        results.sort_by_key(|r| r.ordinal);

        let failed = errors.len() - cancelled;
        let analytics = BatchAnalytics {
            total_items: total,
            successful: results.len(),
            failed,
            cancelled,
            total_blocks,
            detect_time_ms: timings.detect.as_secs_f64() * 1000.0,
            recognize_time_ms: timings.recognize.as_secs_f64() * 1000.0,
            translate_time_ms: timings.translate.as_secs_f64() * 1000.0,
            compose_time_ms: timings.compose.as_secs_f64() * 1000.0,
            total_time_ms: total_start.elapsed().as_secs_f64() * 1000.0,
        };
        self.pipeline
            .metrics()
            .record_batch_processed(results.len(), failed, cancelled);

        info!(
            "Batch complete: {}/{} succeeded, {} failed, {} cancelled in {:.0}ms",
            analytics.successful, total, failed, cancelled, analytics.total_time_ms
        );

        Ok(BatchOutcome {
            group_id,
            results,
            errors,
            analytics,
        })
    }

    async fn prepare_storage(&self) -> PipelineResult<()> {
        for dir in [&self.config.storage.output_dir, &self.config.storage.temp_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                PipelineError::StorageUnavailable(format!("{}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    fn settings_for(&self, request: &BatchRequest) -> PipelineSettings {
        let languages = &self.config.languages;
        PipelineSettings {
            source_language: request
                .source_language
                .clone()
                .unwrap_or_else(|| languages.source_language.clone()),
            target_language: request
                .target_language
                .clone()
                .unwrap_or_else(|| languages.target_language.clone()),
            ocr_engine: request.ocr_engine.unwrap_or_else(|| {
                languages.ocr_engine.parse().unwrap_or_else(|e| {
                    warn!("{}; falling back to auto", e);
                    OcrEngine::Auto
                })
            }),
            confidence_threshold: self.config.detection.confidence_threshold,
            row_threshold: self.config.detection.row_threshold,
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    worker_id: usize,
    launch_delay: Duration,
    queue: Arc<SegQueue<WorkItem>>,
    pipeline: Arc<PagePipeline>,
    settings: Arc<PipelineSettings>,
    group_id: Option<String>,
    tx: mpsc::UnboundedSender<ItemReport>,
    cancel: CancellationToken,
    launch_gate: CancellationToken,
) {
    if !launch_delay.is_zero() {
        tokio::select! {
            _ = launch_gate.cancelled() => return,
            _ = tokio::time::sleep(launch_delay) => {}
        }
    }
    debug!("Worker {} started", worker_id);

    while !cancel.is_cancelled() {
        let Some(mut item) = queue.pop() else {
            break;
        };
        let ordinal = item.ordinal();
        let source_name = item.source_name();
        let started = Instant::now();

        // A panicking collaborator fails this item only
        let attempt = AssertUnwindSafe(pipeline.process(&mut item, &settings, group_id.as_deref()))
            .catch_unwind()
            .await;
        let processed = match attempt {
            Ok(processed) => processed,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                item.fail(reason.clone());
                Err(PipelineError::ItemPanicked { ordinal, reason })
            }
        };

        let report = match processed {
            Ok(output) => ItemReport::Done {
                ordinal,
                source_name,
                output,
                elapsed: started.elapsed(),
            },
            Err(e) => {
                error!("Item {} ({}) failed: {}", ordinal, source_name, e);
                ItemReport::Failed(ItemFailure {
                    ordinal,
                    source_name,
                    message: e.to_string(),
                })
            }
        };
        // Scratch directory goes with the item
        drop(item);

        if tx.send(report).is_err() {
            break;
        }
    }
    debug!("Worker {} finished", worker_id);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Image files in `dir`, naturally sorted by file name
pub async fn collect_sources(dir: &Path) -> PipelineResult<Vec<SourceRef>> {
    let unavailable =
        |e: std::io::Error| PipelineError::StorageUnavailable(format!("{}: {}", dir.display(), e));

    let mut entries = tokio::fs::read_dir(dir).await.map_err(unavailable)?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image && path.is_file() {
            paths.push(path);
        }
    }

    paths.sort_by(|a, b| {
        let a = a.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        let b = b.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        natural_cmp(&a, &b)
    });
    Ok(paths.into_iter().map(SourceRef::Path).collect())
}
