//! # safeval-runtime
//!
//! Asynchronous factuality evaluation for SAF-Eval.
//!
//! The [`EvaluationPipeline`] takes a generated response, breaks it into
//! atomic facts, repairs facts that depend on surrounding text, drops facts
//! irrelevant to the context, merges near-duplicates, retrieves evidence for
//! each fact, classifies it and averages the rubric weights into a score.
//!
//! Two capabilities are injected:
//! - a [`LanguageModel`] (prompt in, text out), usually a
//!   [`ProviderModel`] over an [`LlmProvider`](providers::LlmProvider)
//! - a [`Retriever`] (fact in, documents out, best first)
//!
//! Deterministic data types, config and scoring live in `safeval-core`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use safeval_core::Config;
//! use safeval_runtime::{EvaluationPipeline, KnowledgeBaseRetriever, ProviderModel};
//! use safeval_runtime::providers::OpenAiProvider;
//!
//! let config = Config::from_file("safeval.yaml")?;
//! let provider = Arc::new(OpenAiProvider::from_env()?);
//! let model = Arc::new(ProviderModel::new(provider, config.llm_config.model.clone()));
//! let retriever = Arc::new(KnowledgeBaseRetriever::from_json_file("kb.json")?);
//!
//! let pipeline = EvaluationPipeline::new(config, model, retriever)?;
//! let result = pipeline
//!     .run("Mount Everest is 8,849 m tall.", Some("Tell me about Everest"))
//!     .await?;
//! println!("factuality: {}", result.factuality_score);
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod evidence;
pub mod invoker;
pub mod model;
pub mod parsing;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod stages;
pub mod testing;

pub use config::{CacheConfig, RuntimeConfig};
pub use error::{
    ClassificationError, ConfigurationError, ContainmentError, EvaluationError, ExtractionError,
    ModelError, PipelineFailure, RetrievalError,
};
pub use invoker::ModelInvoker;
pub use model::{Generation, LanguageModel, ModelParams, ProviderModel};
pub use pipeline::{EvaluationPipeline, EvaluationPipelineBuilder};
pub use resilience::{LlmUsage, RetryPolicy};
pub use stages::{
    ContainmentChecker, ExampleProvider, FactClassifier, FactExtractor, FewShotExample,
    KnowledgeBaseRetriever, ModelClassifier, RelevancyFilter, RetrievalOptions, Retriever,
    RetrieverAdapter, Strategy,
};
