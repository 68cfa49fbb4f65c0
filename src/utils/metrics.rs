use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pipeline stage names used as metric labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Detect,
    Recognize,
    Translate,
    Compose,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Detect => "detect",
            Stage::Recognize => "recognize",
            Stage::Translate => "translate",
            Stage::Compose => "compose",
        }
    }
}

/// Process-wide metrics collector.
///
/// Tracks item throughput, stage durations, session cache behaviour and
/// collaborator breaker trips. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Batch Metrics
    batches_processed: AtomicUsize,
    items_processed: AtomicUsize,
    items_failed: AtomicUsize,
    items_cancelled: AtomicUsize,

    // Stage Metrics
    detect_duration_ms: RwLock<Vec<u64>>,
    recognize_duration_ms: RwLock<Vec<u64>>,
    translate_duration_ms: RwLock<Vec<u64>>,
    compose_duration_ms: RwLock<Vec<u64>>,
    stage_failures: DashMap<&'static str, AtomicUsize>,

    // Session Metrics
    session_cache_hits: AtomicUsize,
    session_cache_misses: AtomicUsize,
    session_cache_evictions: AtomicUsize,
    session_cache_size: AtomicUsize,
    sessions_created: AtomicUsize,
    sessions_reaped: AtomicUsize,

    // Layout Metrics
    blocks_skipped: AtomicUsize,
    inpaint_fallbacks: AtomicUsize,

    circuit_breaker_trips: AtomicUsize,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                batches_processed: AtomicUsize::new(0),
                items_processed: AtomicUsize::new(0),
                items_failed: AtomicUsize::new(0),
                items_cancelled: AtomicUsize::new(0),
                detect_duration_ms: RwLock::new(Vec::new()),
                recognize_duration_ms: RwLock::new(Vec::new()),
                translate_duration_ms: RwLock::new(Vec::new()),
                compose_duration_ms: RwLock::new(Vec::new()),
                stage_failures: DashMap::new(),
                session_cache_hits: AtomicUsize::new(0),
                session_cache_misses: AtomicUsize::new(0),
                session_cache_evictions: AtomicUsize::new(0),
                session_cache_size: AtomicUsize::new(0),
                sessions_created: AtomicUsize::new(0),
                sessions_reaped: AtomicUsize::new(0),
                blocks_skipped: AtomicUsize::new(0),
                inpaint_fallbacks: AtomicUsize::new(0),
                circuit_breaker_trips: AtomicUsize::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    // Batch Metrics
    pub fn record_batch_processed(&self, succeeded: usize, failed: usize, cancelled: usize) {
        self.inner.batches_processed.fetch_add(1, Ordering::Relaxed);
        self.inner.items_processed.fetch_add(succeeded, Ordering::Relaxed);
        self.inner.items_failed.fetch_add(failed, Ordering::Relaxed);
        self.inner.items_cancelled.fetch_add(cancelled, Ordering::Relaxed);
    }

    // Stage Metrics
    pub fn record_stage_duration(&self, stage: Stage, duration: Duration) {
        let series = match stage {
            Stage::Detect => &self.inner.detect_duration_ms,
            Stage::Recognize => &self.inner.recognize_duration_ms,
            Stage::Translate => &self.inner.translate_duration_ms,
            Stage::Compose => &self.inner.compose_duration_ms,
        };
        series.write().push(duration.as_millis() as u64);
    }

    pub fn record_stage_failure(&self, stage: Stage) {
        self.inner
            .stage_failures
            .entry(stage.as_str())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn stage_failures(&self, stage: Stage) -> usize {
        self.inner
            .stage_failures
            .get(stage.as_str())
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    // Session Metrics
    pub fn record_session_cache_hit(&self) {
        self.inner.session_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_cache_miss(&self) {
        self.inner.session_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_evictions(&self, count: usize) {
        self.inner
            .session_cache_evictions
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn update_session_cache_size(&self, size: usize) {
        self.inner.session_cache_size.store(size, Ordering::Relaxed);
    }

    pub fn record_session_created(&self) {
        self.inner.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sessions_reaped(&self, count: usize) {
        self.inner.sessions_reaped.fetch_add(count, Ordering::Relaxed);
    }

    // Layout Metrics
    pub fn record_blocks_skipped(&self, count: usize) {
        self.inner.blocks_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_inpaint_fallback(&self) {
        self.inner.inpaint_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    // Circuit Breaker Metrics
    pub fn record_circuit_breaker_trip(&self) {
        self.inner.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    // Get snapshot for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        let cache_hits = self.inner.session_cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.inner.session_cache_misses.load(Ordering::Relaxed);
        let cache_total = cache_hits + cache_misses;
        let session_cache_hit_rate = if cache_total > 0 {
            cache_hits as f64 / cache_total as f64
        } else {
            0.0
        };

        let translate = self.inner.translate_duration_ms.read();
        let translate_p95_ms = percentile(&translate, 0.95);
        let translate_avg_ms = avg(&translate);
        drop(translate);

        MetricsSnapshot {
            batches_processed: self.inner.batches_processed.load(Ordering::Relaxed),
            items_processed: self.inner.items_processed.load(Ordering::Relaxed),
            items_failed: self.inner.items_failed.load(Ordering::Relaxed),
            items_cancelled: self.inner.items_cancelled.load(Ordering::Relaxed),
            detect_avg_ms: avg(&self.inner.detect_duration_ms.read()),
            recognize_avg_ms: avg(&self.inner.recognize_duration_ms.read()),
            translate_avg_ms,
            translate_p95_ms,
            compose_avg_ms: avg(&self.inner.compose_duration_ms.read()),
            session_cache_hits: cache_hits,
            session_cache_misses: cache_misses,
            session_cache_hit_rate,
            session_cache_evictions: self.inner.session_cache_evictions.load(Ordering::Relaxed),
            session_cache_size: self.inner.session_cache_size.load(Ordering::Relaxed),
            sessions_created: self.inner.sessions_created.load(Ordering::Relaxed),
            sessions_reaped: self.inner.sessions_reaped.load(Ordering::Relaxed),
            blocks_skipped: self.inner.blocks_skipped.load(Ordering::Relaxed),
            inpaint_fallbacks: self.inner.inpaint_fallbacks.load(Ordering::Relaxed),
            circuit_breaker_trips: self.inner.circuit_breaker_trips.load(Ordering::Relaxed),
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut failures = String::new();
        for stage in [Stage::Detect, Stage::Recognize, Stage::Translate, Stage::Compose] {
            failures.push_str(&format!(
                "stage_failures_total {{stage=\"{}\"}} {}\n",
                stage.as_str(),
                self.stage_failures(stage)
            ));
        }

        format!(
            r#"# HELP items_processed_total Items composed successfully
# TYPE items_processed_total counter
items_processed_total {{}} {}

# HELP items_failed_total Items that failed a stage
# TYPE items_failed_total counter
items_failed_total {{}} {}

# HELP stage_avg_duration_ms Average stage duration in milliseconds
# TYPE stage_avg_duration_ms gauge
stage_avg_duration_ms {{stage="detect"}} {}
stage_avg_duration_ms {{stage="recognize"}} {}
stage_avg_duration_ms {{stage="translate"}} {}
stage_avg_duration_ms {{stage="compose"}} {}

# HELP stage_failures_total Stage failures by stage
# TYPE stage_failures_total counter
{}
# HELP session_cache_hit_rate Session cache hit rate (0.0 to 1.0)
# TYPE session_cache_hit_rate gauge
session_cache_hit_rate {{}} {}

# HELP session_cache_size Current session cache size
# TYPE session_cache_size gauge
session_cache_size {{}} {}

# HELP sessions_created_total Sessions created
# TYPE sessions_created_total counter
sessions_created_total {{}} {}

# HELP sessions_reaped_total Sessions removed by age
# TYPE sessions_reaped_total counter
sessions_reaped_total {{}} {}

# HELP circuit_breaker_trips_total Total circuit breaker trips
# TYPE circuit_breaker_trips_total counter
circuit_breaker_trips_total {{}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {{}} {}
"#,
            snapshot.items_processed,
            snapshot.items_failed,
            snapshot.detect_avg_ms,
            snapshot.recognize_avg_ms,
            snapshot.translate_avg_ms,
            snapshot.compose_avg_ms,
            failures,
            snapshot.session_cache_hit_rate,
            snapshot.session_cache_size,
            snapshot.sessions_created,
            snapshot.sessions_reaped,
            snapshot.circuit_breaker_trips,
            snapshot.uptime_seconds,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub batches_processed: usize,
    pub items_processed: usize,
    pub items_failed: usize,
    pub items_cancelled: usize,
    pub detect_avg_ms: u64,
    pub recognize_avg_ms: u64,
    pub translate_avg_ms: u64,
    pub translate_p95_ms: u64,
    pub compose_avg_ms: u64,
    pub session_cache_hits: usize,
    pub session_cache_misses: usize,
    pub session_cache_hit_rate: f64,
    pub session_cache_evictions: usize,
    pub session_cache_size: usize,
    pub sessions_created: usize,
    pub sessions_reaped: usize,
    pub blocks_skipped: usize,
    pub inpaint_fallbacks: usize,
    pub circuit_breaker_trips: usize,
    pub uptime_seconds: u64,
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}
