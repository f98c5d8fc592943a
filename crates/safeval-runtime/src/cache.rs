//! Response cache for model calls.
//!
//! Identical prompts with identical parameters against the same model are
//! answered from memory. Only successful responses are cached.

use moka::future::Cache;
use std::time::Duration;

use crate::model::ModelParams;

/// Cache key for a model call: the full model, prompt and parameters, so
/// distinct calls never share an entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    model_id: String,
    prompt: String,
    temperature_bits: u32,
    max_tokens: u32,
    json_output: bool,
    system: Option<String>,
}

impl CacheKey {
    pub fn new(model_id: &str, prompt: &str, params: &ModelParams) -> Self {
        Self {
            model_id: model_id.to_string(),
            prompt: prompt.to_string(),
            temperature_bits: params.temperature.to_bits(),
            max_tokens: params.max_tokens,
            json_output: params.json_output,
            system: params.system.clone(),
        }
    }
}

/// In-memory model response cache using moka.
pub struct ResponseCache {
    cache: Cache<CacheKey, String>,
}

impl ResponseCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<String> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, key: CacheKey, response: String) {
        self.cache.insert(key, response).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(3600))
    }
}
