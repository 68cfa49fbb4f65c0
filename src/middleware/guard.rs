// Decorators around collaborators: per-call timeouts and a circuit breaker.

use async_trait::async_trait;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use super::circuit_breaker::CircuitBreaker;
use crate::core::errors::{
    RecognitionError, RecognitionResult, TranslationError, TranslationResult,
};
use crate::services::collaborators::{OcrEngine, Recognizer, Translator};

/// Fails a translation that takes longer than `limit`
pub struct TimeoutTranslator {
    inner: Arc<dyn Translator>,
    limit: Duration,
}

impl TimeoutTranslator {
    pub fn new(inner: Arc<dyn Translator>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl Translator for TimeoutTranslator {
    async fn translate(
        &self,
        texts: &[String],
        source_language: &str,
        target_language: &str,
    ) -> TranslationResult<Vec<String>> {
        match timeout(
            self.limit,
            self.inner.translate(texts, source_language, target_language),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!("Translation of {} strings timed out", texts.len());
                Err(TranslationError::Timeout(self.limit.as_millis() as u64))
            }
        }
    }
}

/// Fails a recognition that takes longer than `limit`
pub struct TimeoutRecognizer {
    inner: Arc<dyn Recognizer>,
    limit: Duration,
}

impl TimeoutRecognizer {
    pub fn new(inner: Arc<dyn Recognizer>, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl Recognizer for TimeoutRecognizer {
    async fn recognize(
        &self,
        region: &DynamicImage,
        language: &str,
        engine: OcrEngine,
    ) -> RecognitionResult<String> {
        timeout(self.limit, self.inner.recognize(region, language, engine))
            .await
            .map_err(|_| RecognitionError::Timeout(self.limit.as_millis() as u64))?
    }
}

/// Fails fast while the wrapped translator keeps failing
pub struct BreakerTranslator {
    inner: Arc<dyn Translator>,
    breaker: CircuitBreaker,
}

impl BreakerTranslator {
    pub fn new(inner: Arc<dyn Translator>, breaker: CircuitBreaker) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl Translator for BreakerTranslator {
    async fn translate(
        &self,
        texts: &[String],
        source_language: &str,
        target_language: &str,
    ) -> TranslationResult<Vec<String>> {
        if !self.breaker.allow_request() {
            return Err(TranslationError::CircuitOpen);
        }
        let result = self
            .inner
            .translate(texts, source_language, target_language)
            .await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(_) => self.breaker.record_failure(),
        }
        result
    }
}
