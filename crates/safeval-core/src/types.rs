//! Records threaded through every pipeline stage.
//!
//! Facts are handed from stage to stage by value. A stage may rewrite the
//! facts it currently owns; once it returns them, it keeps no reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque identifier of an atomic fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactId(String);

impl FactId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FactId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for FactId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single, independently verifiable claim extracted from a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicFact {
    pub id: FactId,

    /// The claim as it will be retrieved and classified
    pub text: String,

    /// Portion of the response the claim was taken from, when derivable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_span: Option<String>,

    /// `None` until the containment checker has looked at the fact
    #[serde(default)]
    pub is_self_contained: Option<bool>,

    /// Context that was used to rewrite the fact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_used: Option<String>,

    /// Text before a self-containment rewrite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,

    /// Facts folded into this one by deduplication
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from: Vec<FactId>,
}

impl AtomicFact {
    /// Create a fact with a fresh identifier.
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_id(FactId::generate(), text)
    }

    /// Create a fact with a caller-chosen identifier.
    pub fn with_id(id: impl Into<FactId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source_span: None,
            is_self_contained: None,
            context_used: None,
            original_text: None,
            merged_from: Vec::new(),
        }
    }

    pub fn with_source_span(mut self, span: impl Into<String>) -> Self {
        self.source_span = Some(span.into());
        self
    }

    pub fn with_self_contained(mut self, contained: bool) -> Self {
        self.is_self_contained = Some(contained);
        self
    }

    /// Whether the fact has been confirmed self-contained.
    pub fn is_confirmed_self_contained(&self) -> bool {
        self.is_self_contained == Some(true)
    }

    /// Replace the text with a self-contained rewrite.
    ///
    /// The first pre-rewrite text is kept in `original_text`.
    pub fn rewritten(mut self, text: impl Into<String>, context: Option<&str>) -> Self {
        let text = text.into();
        if text != self.text && self.original_text.is_none() {
            self.original_text = Some(std::mem::take(&mut self.text));
        }
        self.text = text;
        self.is_self_contained = Some(true);
        self.context_used = context.map(str::to_string);
        self
    }
}

/// A document retrieved as evidence for one fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub fact_id: FactId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
    pub source_id: String,
}

impl RetrievedDocument {
    pub fn new(fact_id: FactId, source_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            fact_id,
            content: content.into(),
            relevance_score: None,
            source_id: source_id.into(),
        }
    }

    pub fn with_relevance(mut self, score: f64) -> Self {
        self.relevance_score = Some(score);
        self
    }
}

/// A fact together with its evidence and assigned category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedFact {
    pub fact: AtomicFact,
    pub documents: Vec<RetrievedDocument>,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    CheckContainment,
    SelfContain,
    FilterRelevant,
    Deduplicate,
    Retrieve,
    Classify,
    Score,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::CheckContainment => "check_containment",
            Stage::SelfContain => "self_contain",
            Stage::FilterRelevant => "filter_relevant",
            Stage::Deduplicate => "deduplicate",
            Stage::Retrieve => "retrieve",
            Stage::Classify => "classify",
            Stage::Score => "score",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fact that left the pipeline early, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedFact {
    pub fact_id: FactId,
    pub text: String,
    pub reason: String,
}

/// Diagnostics collected for one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Facts entering the stage
    pub input_count: usize,

    /// Facts leaving the stage
    pub output_count: usize,

    /// Wall-clock time spent in the stage
    pub duration_ms: u64,

    /// Recoverable problems absorbed by the stage
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    /// Facts removed by the stage
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped: Vec<DroppedFact>,

    /// Set when the stage did not run
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

impl StageDiagnostics {
    pub fn new(input_count: usize) -> Self {
        Self {
            input_count,
            ..Default::default()
        }
    }

    pub fn skipped(count: usize) -> Self {
        Self {
            input_count: count,
            output_count: count,
            skipped: true,
            ..Default::default()
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn drop_fact(&mut self, fact: &AtomicFact, reason: impl Into<String>) {
        self.dropped.push(DroppedFact {
            fact_id: fact.id.clone(),
            text: fact.text.clone(),
            reason: reason.into(),
        });
    }
}

/// Stage-by-stage diagnostics for one evaluation.
pub type Metadata = BTreeMap<Stage, StageDiagnostics>;

/// Overall factuality of a response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FactualityScore {
    /// Rubric-weighted mean over the classified facts
    Score(f64),

    /// Nothing survived to scoring; a mean is undefined
    NoEvaluableFacts,
}

impl FactualityScore {
    /// The numeric score, if one is defined.
    pub fn value(&self) -> Option<f64> {
        match self {
            FactualityScore::Score(v) => Some(*v),
            FactualityScore::NoEvaluableFacts => None,
        }
    }

    pub fn is_evaluable(&self) -> bool {
        matches!(self, FactualityScore::Score(_))
    }
}

impl fmt::Display for FactualityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactualityScore::Score(v) => write!(f, "{:.3}", v),
            FactualityScore::NoEvaluableFacts => f.write_str("no evaluable facts"),
        }
    }
}

/// Terminal output of a completed evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub factuality_score: FactualityScore,
    pub classified_facts: Vec<ClassifiedFact>,
    pub metadata: Metadata,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationResult {
    /// Count of classified facts per category.
    pub fn category_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for classified in &self.classified_facts {
            *counts.entry(classified.category.as_str()).or_insert(0) += 1;
        }
        counts
    }
}
