//! Evaluation configuration.
//!
//! Configs are YAML or JSON documents checked against an embedded JSON
//! Schema and then against semantic rules.

mod parser;
mod rubric;
mod schema;

pub use parser::{
    CacheSettings, CircuitBreakerSettings, ClassificationConfig, Config, ConfigError,
    DeduplicationConfig, LlmConfig, LoggingConfig, RetrievalConfig, RetrySettings,
    RuntimeSettings,
};
pub use rubric::ScoringRubric;
pub use schema::validate_config_schema;
