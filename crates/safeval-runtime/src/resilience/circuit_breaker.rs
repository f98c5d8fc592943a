//! Circuit breaker to prevent cascade failures.
//!
//! When model calls for a stage fail repeatedly, the circuit opens and
//! further calls for that stage fail fast until the recovery timeout has
//! passed.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use safeval_core::Stage;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failures before opening circuit
    pub failure_threshold: u32,

    /// Time before attempting recovery
    pub recovery_timeout: Duration,

    /// Successes needed to close circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// State of a circuit.
#[derive(Debug, Clone)]
pub enum CircuitState {
    /// Normal operation
    Closed { failures: u32 },

    /// Circuit is open, calls fail fast
    Open { opened_at: Instant },

    /// Testing if circuit can close
    HalfOpen { successes: u32 },
}

/// Per-stage circuit breaker.
///
/// Each stage has its own circuit so that, for example, a failing
/// classification model does not block extraction.
pub struct CircuitBreaker {
    states: RwLock<HashMap<Stage, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Check if the circuit for a stage is open.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to
    /// half-open and lets the call through.
    pub fn is_open(&self, stage: Stage) -> bool {
        let states = self.states.read();
        match states.get(&stage) {
            Some(CircuitState::Open { opened_at }) => {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    drop(states);
                    self.transition_to_half_open(stage);
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    }

    pub fn record_success(&self, stage: Stage) {
        let mut states = self.states.write();
        match states.get(&stage).cloned() {
            Some(CircuitState::HalfOpen { successes }) => {
                if successes + 1 >= self.config.success_threshold {
                    states.insert(stage, CircuitState::Closed { failures: 0 });
                    tracing::info!(stage = %stage, "Circuit closed after successful recovery");
                } else {
                    states.insert(
                        stage,
                        CircuitState::HalfOpen {
                            successes: successes + 1,
                        },
                    );
                }
            }
            Some(CircuitState::Closed { .. }) => {
                states.insert(stage, CircuitState::Closed { failures: 0 });
            }
            _ => {}
        }
    }

    pub fn record_failure(&self, stage: Stage) {
        let mut states = self.states.write();
        let failures = match states.get(&stage).cloned() {
            Some(CircuitState::Closed { failures }) => failures + 1,
            None => 1,
            Some(CircuitState::HalfOpen { .. }) => {
                states.insert(
                    stage,
                    CircuitState::Open {
                        opened_at: Instant::now(),
                    },
                );
                tracing::warn!(stage = %stage, "Circuit reopened after failed recovery attempt");
                return;
            }
            Some(CircuitState::Open { .. }) => return,
        };

        if failures >= self.config.failure_threshold {
            states.insert(
                stage,
                CircuitState::Open {
                    opened_at: Instant::now(),
                },
            );
            tracing::warn!(
                stage = %stage,
                failures,
                "Circuit opened after repeated failures"
            );
        } else {
            states.insert(stage, CircuitState::Closed { failures });
        }
    }

    fn transition_to_half_open(&self, stage: Stage) {
        let mut states = self.states.write();
        if matches!(states.get(&stage), Some(CircuitState::Open { .. })) {
            states.insert(stage, CircuitState::HalfOpen { successes: 0 });
            tracing::info!(stage = %stage, "Circuit half-open, allowing recovery test");
        }
    }

    pub fn state(&self, stage: Stage) -> CircuitState {
        self.states
            .read()
            .get(&stage)
            .cloned()
            .unwrap_or(CircuitState::Closed { failures: 0 })
    }

    /// Reset all circuits to closed.
    pub fn reset(&self) {
        self.states.write().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
