// Service registry: lazily built, shared service instances

use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::info;

use crate::core::config::Config;
use crate::core::errors::{PipelineError, PipelineResult, SessionResult, StoreResult};
use crate::orchestration::{BatchOrchestrator, PagePipeline};
use crate::services::collaborators::{Detector, Recognizer, Translator};
use crate::services::rendering::LayoutEngine;
use crate::services::session::{SessionEditor, SessionStore};
use crate::services::storage::{ArtifactStore, FsStore};
use crate::utils::Metrics;

/// Owns configuration and metrics, and builds each service at most once
pub struct ServiceRegistry {
    config: Arc<Config>,
    metrics: Metrics,
    engine: OnceCell<Arc<LayoutEngine>>,
    sessions: OnceCell<Arc<SessionStore>>,
    output: OnceCell<Arc<dyn ArtifactStore>>,
}

impl ServiceRegistry {
    pub fn new(config: Arc<Config>) -> Self {
        Self::with_metrics(config, Metrics::new())
    }

    pub fn with_metrics(config: Arc<Config>, metrics: Metrics) -> Self {
        Self {
            config,
            metrics,
            engine: OnceCell::new(),
            sessions: OnceCell::new(),
            output: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn layout_engine(&self) -> Arc<LayoutEngine> {
        self.engine
            .get_or_init(|| {
                info!(
                    "Initializing layout engine (fonts in {})",
                    self.config.rendering.font_dir.display()
                );
                Arc::new(
                    LayoutEngine::new(self.config.rendering.clone())
                        .with_metrics(self.metrics.clone()),
                )
            })
            .clone()
    }

    /// Session store rooted at the configured sessions directory
    pub async fn session_store(&self) -> SessionResult<Arc<SessionStore>> {
        if let Some(store) = self.sessions.get() {
            return Ok(store.clone());
        }
        let store = SessionStore::open(&self.config.session)
            .await?
            .with_metrics(self.metrics.clone());
        // A concurrent caller may have won; keep whichever landed first
        Ok(self.sessions.get_or_init(|| Arc::new(store)).clone())
    }

    /// Durable store for composed and edited pages
    pub async fn output_store(&self) -> StoreResult<Arc<dyn ArtifactStore>> {
        if let Some(store) = self.output.get() {
            return Ok(store.clone());
        }
        let store: Arc<dyn ArtifactStore> =
            Arc::new(FsStore::open(&self.config.storage.output_dir).await?);
        Ok(self.output.get_or_init(|| store).clone())
    }

    pub async fn editor(&self) -> SessionResult<SessionEditor> {
        Ok(SessionEditor::new(
            self.session_store().await?,
            self.layout_engine(),
            self.output_store().await?,
        ))
    }

    /// Orchestrator over the given collaborators, sharing this registry's services
    pub async fn orchestrator(
        &self,
        detector: Arc<dyn Detector>,
        recognizer: Arc<dyn Recognizer>,
        translator: Arc<dyn Translator>,
    ) -> PipelineResult<BatchOrchestrator> {
        let output = self
            .output_store()
            .await
            .map_err(|e| PipelineError::StorageUnavailable(e.to_string()))?;
        let sessions = self
            .session_store()
            .await
            .map_err(|e| PipelineError::StorageUnavailable(e.to_string()))?;

        let pipeline =
            PagePipeline::new(detector, recognizer, translator, self.layout_engine(), output)
                .with_sessions(sessions)
                .with_metrics(self.metrics.clone());
        Ok(BatchOrchestrator::new(self.config.clone(), Arc::new(pipeline)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{
        BatchConfig, DetectionConfig, LanguageConfig, LoggingConfig, RenderingConfig,
        SessionConfig, StorageConfig,
    };
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> ServiceRegistry {
        ServiceRegistry::new(Arc::new(Config {
            logging: LoggingConfig {
                log_level: tracing::Level::INFO,
            },
            batch: BatchConfig::default(),
            detection: DetectionConfig::default(),
            languages: LanguageConfig::default(),
            storage: StorageConfig {
                output_dir: dir.path().join("out"),
                temp_dir: dir.path().join("tmp"),
            },
            session: SessionConfig {
                sessions_dir: dir.path().join("sessions"),
                ..SessionConfig::default()
            },
            rendering: RenderingConfig::default(),
        }))
    }

    #[tokio::test]
    async fn test_services_built_once() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        assert!(Arc::ptr_eq(&registry.layout_engine(), &registry.layout_engine()));
        let first = registry.session_store().await.unwrap();
        let second = registry.session_store().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(dir.path().join("sessions").is_dir());
    }

    #[tokio::test]
    async fn test_session_work_lands_in_registry_metrics() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let store = registry.session_store().await.unwrap();

        store.get_session("edit_missing", false).await.unwrap();
        store.cleanup_older_than(24).await.unwrap();

        let snapshot = registry.metrics().snapshot();
        assert_eq!(snapshot.session_cache_misses, 1);
        assert!(registry
            .metrics()
            .to_prometheus()
            .contains("sessions_reaped_total {} 0"));
    }

    #[tokio::test]
    async fn test_output_store_creates_directory() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        registry.output_store().await.unwrap();
        assert!(dir.path().join("out").is_dir());
    }
}
