//! Resilient model invocation shared by all model-backed stages.

use std::sync::Arc;
use std::time::Duration;

use safeval_core::Stage;

use crate::cache::{CacheKey, ResponseCache};
use crate::config::RuntimeConfig;
use crate::error::ModelError;
use crate::model::{LanguageModel, ModelParams};
use crate::resilience::{CircuitBreaker, LlmUsage, RetryPolicy, UsageTracker};

/// Wraps a [`LanguageModel`] with caching, a per-stage circuit breaker,
/// a per-call timeout, retries and usage accounting.
///
/// Call order: cache lookup, circuit check, then timed attempts under the
/// retry policy. The breaker sees one success or failure per call, after
/// retries are exhausted.
pub struct ModelInvoker {
    model: Arc<dyn LanguageModel>,
    cache: Option<ResponseCache>,
    circuit_breaker: CircuitBreaker,
    retry: RetryPolicy,
    call_timeout: Duration,
    usage: UsageTracker,
}

impl ModelInvoker {
    pub fn new(model: Arc<dyn LanguageModel>, config: &RuntimeConfig) -> Self {
        Self {
            model,
            cache: config
                .cache
                .as_ref()
                .map(|c| ResponseCache::new(c.max_entries, c.ttl)),
            circuit_breaker: CircuitBreaker::new(config.circuit_breaker.clone()),
            retry: config.retry.clone(),
            call_timeout: config.call_timeout,
            usage: UsageTracker::new(),
        }
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// Generate a completion for `stage`.
    pub async fn call(
        &self,
        stage: Stage,
        prompt: &str,
        params: &ModelParams,
    ) -> Result<String, ModelError> {
        let key = self
            .cache
            .as_ref()
            .map(|_| CacheKey::new(self.model.model_id(), prompt, params));

        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(hit) = cache.get(key).await {
                tracing::trace!(stage = %stage, "Model response served from cache");
                self.usage.record_cache_hit(stage);
                return Ok(hit);
            }
        }

        if self.circuit_breaker.is_open(stage) {
            tracing::warn!(stage = %stage, "Circuit open, skipping model call");
            return Err(ModelError::CircuitOpen(stage));
        }

        let timeout = self.call_timeout;
        let result = self
            .retry
            .run(stage, move || async move {
                match tokio::time::timeout(timeout, self.model.generate_with_usage(prompt, params))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ModelError::Timeout(timeout)),
                }
            })
            .await;

        match result {
            Ok(generation) => {
                self.circuit_breaker.record_success(stage);
                if let Some(usage) = &generation.usage {
                    let model = if generation.model.is_empty() {
                        self.model.model_id()
                    } else {
                        generation.model.as_str()
                    };
                    self.usage.record(stage, usage, model);
                }
                if let (Some(cache), Some(key)) = (&self.cache, key) {
                    cache.insert(key, generation.text.clone()).await;
                }
                Ok(generation.text)
            }
            Err(e) => {
                tracing::warn!(stage = %stage, error = %e, "Model call failed");
                self.circuit_breaker.record_failure(stage);
                Err(e)
            }
        }
    }

    /// Usage summed over all stages.
    pub fn usage(&self) -> LlmUsage {
        self.usage.total()
    }

    pub fn usage_tracker(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }
}
