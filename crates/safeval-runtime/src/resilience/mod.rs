//! Resilience patterns for model calls.
//!
//! - Circuit breaker per stage
//! - Retry with exponential backoff
//! - Token usage and cost accounting

mod circuit_breaker;
mod retry;
mod usage;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::RetryPolicy;
pub use usage::{LlmUsage, UsageTracker};
