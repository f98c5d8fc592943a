//! Configuration parsing from YAML/JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::rubric::ScoringRubric;
use super::schema::validate_config_schema;

/// Errors that can occur when loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Config does not match schema: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),

    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Settings handed to the retrieval backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalConfig {
    /// Maximum documents kept per fact
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Documents scoring below this are discarded
    #[serde(default)]
    pub min_relevance: Option<f64>,

    /// Per-call timeout; overrides `runtime.retrieval_timeout` when set
    #[serde(default)]
    pub timeout: Option<String>,

    /// Backend-specific options, passed through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_top_k() -> usize {
    3
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_relevance: None,
            timeout: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Language-model settings shared by every model-backed stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    /// Provider type registered in the runtime (e.g., "openai")
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model identifier passed to the provider
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature (0.0 for deterministic)
    #[serde(default)]
    pub temperature: f32,

    /// Maximum tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Classify using retrieved evidence only
    #[serde(default)]
    pub strict_evidence_only: bool,

    /// Provider-specific options (base_url, api_key, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    512
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            strict_evidence_only: false,
            extra: BTreeMap::new(),
        }
    }
}

/// Where and how log output is written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default = "default_true")]
    pub console: bool,

    #[serde(default)]
    pub file: bool,

    /// Directory for log files (default: ./logs)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub json_format: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            console: true,
            file: false,
            log_dir: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Log directory, defaulting to `./logs`.
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("logs"))
    }
}

/// Default deduplication behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeduplicationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Similarity at or above which two facts are merged (0.0 - 1.0)
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

fn default_similarity_threshold() -> f64 {
    0.85
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

/// How model verdicts are mapped onto rubric categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationConfig {
    /// Category used when a verdict cannot be mapped, or when strict mode
    /// has no evidence to work with
    #[serde(default)]
    pub fallback_category: Option<String>,

    /// Minimum similarity for mapping a verdict onto the closest category
    #[serde(default = "default_min_category_similarity")]
    pub min_category_similarity: f64,
}

fn default_min_category_similarity() -> f64 {
    0.8
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            fallback_category: None,
            min_category_similarity: default_min_category_similarity(),
        }
    }
}

/// Retry settings for external calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_min_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Circuit breaker settings, one circuit per stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Human-readable duration, e.g. "30s"
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout: String,

    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> String {
    "30s".to_string()
}

fn default_success_threshold() -> u32 {
    2
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout: default_recovery_timeout(),
            success_threshold: default_success_threshold(),
        }
    }
}

/// Model response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_entries")]
    pub max_entries: u64,

    /// Human-readable duration, e.g. "1h"
    #[serde(default = "default_ttl")]
    pub ttl: String,
}

fn default_max_entries() -> u64 {
    10_000
}

fn default_ttl() -> String {
    "1h".to_string()
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_max_entries(),
            ttl: default_ttl(),
        }
    }
}

/// Execution knobs for the asynchronous runtime.
///
/// Durations stay as strings here; the runtime parses them when the
/// pipeline is built and reports bad values as configuration errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeSettings {
    /// Per-fact operations in flight at once within a stage
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Timeout for a single model call
    #[serde(default = "default_call_timeout")]
    pub call_timeout: String,

    /// Timeout for a single retrieval call
    #[serde(default = "default_retrieval_timeout")]
    pub retrieval_timeout: String,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    #[serde(default)]
    pub cache: CacheSettings,
}

fn default_max_concurrency() -> usize {
    8
}

fn default_call_timeout() -> String {
    "30s".to_string()
}

fn default_retrieval_timeout() -> String {
    "10s".to_string()
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            call_timeout: default_call_timeout(),
            retrieval_timeout: default_retrieval_timeout(),
            retry: RetrySettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

/// Configuration for one evaluation.
///
/// Read-only for the duration of a run and shared by every stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Category → weight; keys define the canonical category set
    pub scoring_rubric: ScoringRubric,

    #[serde(default)]
    pub retrieval_config: RetrievalConfig,

    #[serde(default)]
    pub llm_config: LlmConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub deduplication: DeduplicationConfig,

    #[serde(default)]
    pub classification: ClassificationConfig,

    #[serde(default)]
    pub runtime: RuntimeSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scoring_rubric: ScoringRubric::new()
                .with("supported", 1.0)
                .with("contradicted", 0.0)
                .with("unverifiable", 0.5),
            retrieval_config: RetrievalConfig::default(),
            llm_config: LlmConfig::default(),
            logging: LoggingConfig::default(),
            deduplication: DeduplicationConfig::default(),
            classification: ClassificationConfig {
                fallback_category: Some("unverifiable".to_string()),
                ..Default::default()
            },
            runtime: RuntimeSettings::default(),
        }
    }
}

impl Config {
    /// Create a config around a rubric, with defaults for everything else.
    pub fn with_rubric(rubric: ScoringRubric) -> Self {
        Self {
            scoring_rubric: rubric,
            classification: ClassificationConfig::default(),
            ..Default::default()
        }
    }

    /// Parse a config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let raw: serde_json::Value = serde_yaml::from_str(yaml)?;
        check_schema(&raw)?;
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: serde_json::Value = serde_json::from_str(json)?;
        check_schema(&raw)?;
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file; `.json` files are parsed as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    /// Categories a classifier may assign, in rubric order.
    pub fn evaluation_categories(&self) -> Vec<String> {
        self.scoring_rubric.categories()
    }

    /// Check semantic invariants the schema cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scoring_rubric.is_empty() {
            return Err(ConfigError::ValidationError(
                "scoring_rubric must define at least one category".to_string(),
            ));
        }

        for (category, weight) in self.scoring_rubric.iter() {
            if category.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "scoring_rubric contains an empty category name".to_string(),
                ));
            }
            if !weight.is_finite() {
                return Err(ConfigError::ValidationError(format!(
                    "weight for category '{}' is not a finite number",
                    category
                )));
            }
        }

        if let Some(fallback) = &self.classification.fallback_category {
            if !self.scoring_rubric.contains(fallback) {
                return Err(ConfigError::ValidationError(format!(
                    "fallback_category '{}' is not a scoring_rubric category",
                    fallback
                )));
            }
        }

        if self.llm_config.strict_evidence_only && self.classification.fallback_category.is_none() {
            return Err(ConfigError::ValidationError(
                "llm_config.strict_evidence_only requires classification.fallback_category"
                    .to_string(),
            ));
        }

        check_unit_interval(
            "deduplication.similarity_threshold",
            self.deduplication.similarity_threshold,
        )?;
        check_unit_interval(
            "classification.min_category_similarity",
            self.classification.min_category_similarity,
        )?;
        if let Some(min) = self.retrieval_config.min_relevance {
            check_unit_interval("retrieval_config.min_relevance", min)?;
        }

        if self.retrieval_config.top_k == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval_config.top_k must be at least 1".to_string(),
            ));
        }

        if self.runtime.max_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.max_concurrency must be at least 1".to_string(),
            ));
        }

        if self.runtime.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.retry.max_attempts must be at least 1".to_string(),
            ));
        }

        let level = self.logging.level.to_ascii_lowercase();
        if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown logging level '{}'",
                self.logging.level
            )));
        }

        Ok(())
    }
}

fn check_unit_interval(field: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{} must be between 0.0 and 1.0, got {}",
            field, value
        )))
    }
}

fn check_schema(raw: &serde_json::Value) -> Result<(), ConfigError> {
    validate_config_schema(raw).map_err(ConfigError::SchemaViolation)
}
