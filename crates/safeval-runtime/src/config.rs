//! Runtime configuration derived from the evaluation config.

use std::time::Duration;

use safeval_core::config::{CacheSettings, RuntimeSettings};
use safeval_core::Config;

use crate::error::ConfigurationError;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};

/// Response cache sizing.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub ttl: Duration,
}

/// Parsed execution settings for one pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Per-fact operations in flight at once within a stage
    pub max_concurrency: usize,

    /// Timeout for a single model call
    pub call_timeout: Duration,

    /// Timeout for a single retrieval call
    pub retrieval_timeout: Duration,

    pub retry: RetryPolicy,

    pub circuit_breaker: CircuitBreakerConfig,

    /// `None` disables response caching
    pub cache: Option<CacheConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            call_timeout: Duration::from_secs(30),
            retrieval_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            cache: Some(CacheConfig {
                max_entries: 10_000,
                ttl: Duration::from_secs(3600),
            }),
        }
    }
}

impl RuntimeConfig {
    /// Build from the `runtime` section of a config.
    ///
    /// `retrieval_config.timeout` takes precedence over
    /// `runtime.retrieval_timeout`.
    pub fn from_config(config: &Config) -> Result<Self, ConfigurationError> {
        let mut runtime = Self::from_settings(&config.runtime)?;
        if let Some(timeout) = &config.retrieval_config.timeout {
            runtime.retrieval_timeout = parse_duration("retrieval_config.timeout", timeout)?;
        }
        Ok(runtime)
    }

    pub fn from_settings(settings: &RuntimeSettings) -> Result<Self, ConfigurationError> {
        let breaker = &settings.circuit_breaker;

        Ok(Self {
            max_concurrency: settings.max_concurrency.max(1),
            call_timeout: parse_duration("runtime.call_timeout", &settings.call_timeout)?,
            retrieval_timeout: parse_duration(
                "runtime.retrieval_timeout",
                &settings.retrieval_timeout,
            )?,
            retry: RetryPolicy {
                max_attempts: settings.retry.max_attempts.max(1),
                min_delay: Duration::from_millis(settings.retry.min_delay_ms),
                max_delay: Duration::from_millis(
                    settings.retry.max_delay_ms.max(settings.retry.min_delay_ms),
                ),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: breaker.failure_threshold.max(1),
                recovery_timeout: parse_duration(
                    "runtime.circuit_breaker.recovery_timeout",
                    &breaker.recovery_timeout,
                )?,
                success_threshold: breaker.success_threshold.max(1),
            },
            cache: cache_config(&settings.cache)?,
        })
    }
}

fn cache_config(settings: &CacheSettings) -> Result<Option<CacheConfig>, ConfigurationError> {
    if !settings.enabled {
        return Ok(None);
    }
    Ok(Some(CacheConfig {
        max_entries: settings.max_entries,
        ttl: parse_duration("runtime.cache.ttl", &settings.ttl)?,
    }))
}

fn parse_duration(field: &'static str, value: &str) -> Result<Duration, ConfigurationError> {
    humantime::parse_duration(value).map_err(|e| ConfigurationError::InvalidDuration {
        field,
        value: value.to_string(),
        message: e.to_string(),
    })
}
