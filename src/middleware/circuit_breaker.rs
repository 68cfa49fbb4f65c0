use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::utils::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls fail fast until the cool-down elapses
    Open,
    /// Probing: successes close the circuit, any failure reopens it
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: usize,
    /// Time spent open before probing
    pub cool_down: Duration,
    /// Consecutive probe successes that close it again
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CircuitBreakerStats {
    pub consecutive_failures: usize,
    pub total_failures: usize,
    pub total_successes: usize,
    pub trips: usize,
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    probe_successes: usize,
    opened_at: Option<Instant>,
    stats: CircuitBreakerStats,
}

/// Shared failure tracker for one collaborator.
///
/// Cloning shares the state. Time comes from `tokio::time` so tests can
/// run with a paused clock.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerState>>,
    metrics: Option<Metrics>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                probe_successes: 0,
                opened_at: None,
                stats: CircuitBreakerStats::default(),
            })),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Whether a call may go out now. Moves Open to HalfOpen after the cool-down.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.cool_down)
                    .unwrap_or(true);
                if cooled {
                    info!("Circuit '{}' half-open, probing", self.name);
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_successes = 0;
                }
                cooled
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.stats.total_successes += 1;
        inner.consecutive_failures = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.probe_successes += 1;
            if inner.probe_successes >= self.config.success_threshold {
                info!("Circuit '{}' closed", self.name);
                inner.state = CircuitState::Closed;
                inner.opened_at = None;
            }
        }
    }

    pub fn record_failure(&self) {
        let tripped = {
            let mut inner = self.inner.lock();
            inner.stats.total_failures += 1;
            inner.consecutive_failures += 1;

            let trip = match inner.state {
                CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
                CircuitState::HalfOpen => true,
                CircuitState::Open => false,
            };
            if trip {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.stats.trips += 1;
            }
            trip
        };

        if tripped {
            warn!("Circuit '{}' opened", self.name);
            if let Some(metrics) = &self.metrics {
                metrics.record_circuit_breaker_trip();
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            consecutive_failures: inner.consecutive_failures,
            ..inner.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 3,
                cool_down: Duration::from_secs(10),
                success_threshold: 2,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let breaker = breaker();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
        assert_eq!(breaker.stats().trips, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_run() {
        let breaker = breaker();
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_through_half_open() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }
        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_reopens() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(breaker.allow_request());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
        assert_eq!(breaker.stats().trips, 2);
    }
}
