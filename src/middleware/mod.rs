// Middleware for resilient collaborator calls
//
// Timeouts and circuit breaking, applied as decorators over the collaborator traits

pub mod circuit_breaker;
pub mod guard;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use guard::{BreakerTranslator, TimeoutRecognizer, TimeoutTranslator};
