//! # safeval-core
//!
//! Data model, configuration and deterministic building blocks for SAF-Eval
//! factuality evaluation.
//!
//! A generated response is broken into atomic facts, each fact is checked
//! against retrieved evidence and classified into a rubric category, and the
//! rubric weights are averaged into a single factuality score. This crate
//! holds everything in that flow that does not talk to a model or a
//! retrieval backend:
//!
//! - the records threaded through the pipeline ([`AtomicFact`],
//!   [`RetrievedDocument`], [`ClassifiedFact`], [`EvaluationResult`])
//! - configuration loading and validation ([`Config`])
//! - deduplication, category resolution and scoring
//!
//! The asynchronous pipeline lives in `safeval-runtime`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use safeval_core::{Config, FactualityScorer};
//!
//! let config = Config::from_file("safeval.yaml")?;
//! let scorer = FactualityScorer::new(config.scoring_rubric.clone());
//! let score = scorer.score(&classified_facts)?;
//! println!("factuality: {}", score);
//! ```

pub mod categories;
pub mod config;
pub mod dedup;
pub mod heuristics;
pub mod scoring;
pub mod similarity;
pub mod types;

pub use categories::{CategoryMatch, CategoryResolver};
pub use config::{Config, ConfigError, ScoringRubric};
pub use dedup::{Deduplicator, SimilarityDeduplicator};
pub use scoring::{FactualityScorer, ScoringError};
pub use similarity::similarity_ratio;
pub use types::{
    AtomicFact, ClassifiedFact, DroppedFact, EvaluationResult, FactId, FactualityScore,
    Metadata, RetrievedDocument, Stage, StageDiagnostics,
};
