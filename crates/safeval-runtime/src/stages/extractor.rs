//! Fact extraction: response text to atomic facts.

use std::sync::Arc;

use safeval_core::heuristics::{locate_span, split_sentences};
use safeval_core::{AtomicFact, Stage};

use super::Backend;
use crate::error::ExtractionError;
use crate::invoker::ModelInvoker;
use crate::model::ModelParams;
use crate::parsing::parse_fact_list;
use crate::prompts::extraction_prompt;

/// A worked example shown to the model before the real response.
#[derive(Debug, Clone, PartialEq)]
pub struct FewShotExample {
    pub text: String,
    pub facts: Vec<String>,
}

impl FewShotExample {
    pub fn new(text: impl Into<String>, facts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            text: text.into(),
            facts: facts.into_iter().map(Into::into).collect(),
        }
    }
}

/// Supplies few-shot examples for a given response and context.
///
/// Closures `Fn(&str, Option<&str>) -> Vec<FewShotExample>` implement this
/// directly.
pub trait ExampleProvider: Send + Sync {
    fn examples(&self, response: &str, context: Option<&str>) -> Vec<FewShotExample>;
}

impl<F> ExampleProvider for F
where
    F: Fn(&str, Option<&str>) -> Vec<FewShotExample> + Send + Sync,
{
    fn examples(&self, response: &str, context: Option<&str>) -> Vec<FewShotExample> {
        self(response, context)
    }
}

impl ExampleProvider for Vec<FewShotExample> {
    fn examples(&self, _response: &str, _context: Option<&str>) -> Vec<FewShotExample> {
        self.clone()
    }
}

/// Splits a response into atomic facts.
pub struct FactExtractor {
    backend: Backend,
    examples: Option<Arc<dyn ExampleProvider>>,
}

impl FactExtractor {
    pub fn with_model(invoker: Arc<ModelInvoker>, params: ModelParams) -> Self {
        Self::from_backend(Backend::Model { invoker, params })
    }

    /// Sentence-splitting extractor; never calls a model.
    pub fn heuristic() -> Self {
        Self::from_backend(Backend::Heuristic)
    }

    pub(crate) fn from_backend(backend: Backend) -> Self {
        Self {
            backend,
            examples: None,
        }
    }

    pub fn with_examples(mut self, provider: Arc<dyn ExampleProvider>) -> Self {
        self.examples = Some(provider);
        self
    }

    /// Extract facts from a non-empty response.
    ///
    /// Every fact gets a fresh id and, when it can be located, the span of
    /// the response it came from.
    pub async fn extract_facts(
        &self,
        response: &str,
        context: Option<&str>,
    ) -> Result<Vec<AtomicFact>, ExtractionError> {
        if response.trim().is_empty() {
            return Err(ExtractionError::EmptyResponse);
        }

        let texts = match &self.backend {
            Backend::Model { invoker, params } => {
                let examples = self
                    .examples
                    .as_ref()
                    .map(|p| p.examples(response, context))
                    .unwrap_or_default();
                let prompt = extraction_prompt(response, context, &examples);
                let output = invoker.call(Stage::Extract, &prompt, params).await?;
                parse_fact_list(&output).map_err(ExtractionError::Parse)?
            }
            Backend::Heuristic => split_sentences(response),
        };

        let facts: Vec<AtomicFact> = texts
            .into_iter()
            .filter(|text| !text.trim().is_empty())
            .map(|text| {
                let fact = AtomicFact::new(text.trim());
                match locate_span(&fact.text, response) {
                    Some(span) => fact.with_source_span(span),
                    None => fact,
                }
            })
            .collect();

        for fact in &facts {
            tracing::info!(
                fact_id = %fact.id,
                text = %fact.text,
                source_span = ?fact.source_span,
                "Extracted fact"
            );
        }

        Ok(facts)
    }
}
