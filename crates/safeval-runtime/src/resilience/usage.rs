//! Token usage and cost accounting for model calls.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use safeval_core::Stage;

use crate::providers::TokenUsage;

/// Accumulated model usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub total_tokens: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,

    /// Calls that reached the provider
    pub llm_calls: u32,

    /// Calls answered from the response cache
    pub cache_hits: u32,

    /// Estimated cost in USD
    pub estimated_cost: f64,
}

impl LlmUsage {
    /// Add token usage from a provider response.
    pub fn add(&mut self, usage: &TokenUsage, model: &str) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total();
        self.llm_calls += 1;
        self.estimated_cost += Self::estimate_cost(usage, model);
    }

    fn merge(&mut self, other: &LlmUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.llm_calls += other.llm_calls;
        self.cache_hits += other.cache_hits;
        self.estimated_cost += other.estimated_cost;
    }

    /// Estimate cost for a usage entry.
    fn estimate_cost(usage: &TokenUsage, model: &str) -> f64 {
        // USD per million tokens
        let (input_rate, output_rate) = match model {
            m if m.contains("gpt-4o-mini") => (0.15, 0.6),
            m if m.contains("gpt-4o") => (2.5, 10.0),
            m if m.contains("gpt-4.1-mini") => (0.4, 1.6),
            m if m.contains("gpt-4.1") => (2.0, 8.0),
            m if m.contains("gpt-3.5") => (0.5, 1.5),
            _ => (0.0, 0.0),
        };

        let input_cost = (usage.prompt_tokens as f64 / 1_000_000.0) * input_rate;
        let output_cost = (usage.completion_tokens as f64 / 1_000_000.0) * output_rate;
        input_cost + output_cost
    }
}

/// Thread-safe usage tracker, broken down by stage.
#[derive(Default)]
pub struct UsageTracker {
    by_stage: RwLock<BTreeMap<Stage, LlmUsage>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, stage: Stage, usage: &TokenUsage, model: &str) {
        self.by_stage.write().entry(stage).or_default().add(usage, model);
    }

    pub fn record_cache_hit(&self, stage: Stage) {
        self.by_stage.write().entry(stage).or_default().cache_hits += 1;
    }

    /// Usage summed over all stages.
    pub fn total(&self) -> LlmUsage {
        let mut total = LlmUsage::default();
        for usage in self.by_stage.read().values() {
            total.merge(usage);
        }
        total
    }

    pub fn by_stage(&self) -> BTreeMap<Stage, LlmUsage> {
        self.by_stage.read().clone()
    }

    pub fn reset(&self) {
        self.by_stage.write().clear();
    }
}
