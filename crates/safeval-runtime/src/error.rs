//! Error types for the evaluation runtime.
//!
//! Extraction, scoring and configuration errors are fatal. Containment,
//! retrieval and classification errors are absorbed per fact: the pipeline
//! logs them and records them in the stage diagnostics.

use std::time::Duration;
use thiserror::Error;

use safeval_core::{ConfigError, FactId, Metadata, ScoringError, Stage};

use crate::providers::ProviderError;

/// Errors from a language-model call.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Circuit open for stage {0}")]
    CircuitOpen(Stage),

    #[error("Model temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("Model call failed: {0}")]
    Failed(String),
}

impl ModelError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Timeout(_) | ModelError::Unavailable(_) => true,
            ModelError::Provider(e) => matches!(
                e,
                ProviderError::HttpError(_)
                    | ProviderError::RateLimited { .. }
                    | ProviderError::Timeout(_)
            ) || matches!(e, ProviderError::ApiError { status, .. } if *status >= 500),
            ModelError::CircuitOpen(_) | ModelError::Failed(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Extraction model call failed: {0}")]
    Model(#[from] ModelError),

    #[error("Could not parse extracted facts: {0}")]
    Parse(String),

    #[error("Response to evaluate is empty")]
    EmptyResponse,
}

#[derive(Error, Debug)]
pub enum ContainmentError {
    #[error("Containment model call failed for fact {fact_id}: {source}")]
    Model {
        fact_id: FactId,
        #[source]
        source: ModelError,
    },

    #[error("Rewrite of fact {fact_id} came back empty")]
    EmptyRewrite { fact_id: FactId },
}

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Retrieval backend failed: {0}")]
    Backend(String),

    #[error("Retrieval timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("Classification model call failed for fact {fact_id}: {source}")]
    Model {
        fact_id: FactId,
        #[source]
        source: ModelError,
    },

    #[error("Verdict '{verdict}' for fact {fact_id} matches no configured category")]
    UnmappedCategory { fact_id: FactId, verdict: String },

    #[error("Could not parse classification for fact {fact_id}: {message}")]
    Parse { fact_id: FactId, message: String },

    #[error("No evidence retrieved for fact {fact_id} and no fallback category configured")]
    NoEvidence { fact_id: FactId },

    #[error("Verdict '{category}' for fact {fact_id} is not grounded in the documents: {reason}")]
    Ungrounded {
        fact_id: FactId,
        category: String,
        reason: String,
    },
}

/// Errors raised while assembling a pipeline.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid duration for {field}: '{value}' ({message})")]
    InvalidDuration {
        field: &'static str,
        value: String,
        message: String,
    },

    #[error("Provider setup failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Missing component: {0}")]
    MissingComponent(&'static str),
}

/// Fatal errors that end an evaluation.
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Evaluation cancelled")]
    Cancelled,
}

/// A run that did not complete.
///
/// Carries the stage it stopped at and the diagnostics gathered up to
/// that point; there is never a partial result.
#[derive(Error, Debug)]
#[error("Evaluation failed at stage {stage}: {error}")]
pub struct PipelineFailure {
    pub stage: Stage,
    #[source]
    pub error: EvaluationError,
    pub diagnostics: Metadata,
}

impl PipelineFailure {
    pub fn new(stage: Stage, error: impl Into<EvaluationError>, diagnostics: Metadata) -> Self {
        Self {
            stage,
            error: error.into(),
            diagnostics,
        }
    }
}
