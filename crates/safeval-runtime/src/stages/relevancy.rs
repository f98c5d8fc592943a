//! Relevancy filtering against the evaluation context.

use std::sync::Arc;

use safeval_core::heuristics::{keyword_overlap, keywords};
use safeval_core::{AtomicFact, Stage, StageDiagnostics};

use super::{bounded, Backend};
use crate::invoker::ModelInvoker;
use crate::model::ModelParams;
use crate::parsing::parse_yes_no;
use crate::prompts::relevancy_prompt;

enum Judgment {
    Relevant,
    Irrelevant,
    /// Kept because no judgment could be made
    Unknown(String),
}

/// Drops facts that do not bear on the context. Fails open.
pub struct RelevancyFilter {
    backend: Backend,
    max_concurrency: usize,
}

impl RelevancyFilter {
    pub fn with_model(invoker: Arc<ModelInvoker>, params: ModelParams, max_concurrency: usize) -> Self {
        Self::from_backend(Backend::Model { invoker, params }, max_concurrency)
    }

    /// Keyword-overlap filter.
    pub fn heuristic() -> Self {
        Self::from_backend(Backend::Heuristic, 1)
    }

    pub(crate) fn from_backend(backend: Backend, max_concurrency: usize) -> Self {
        Self {
            backend,
            max_concurrency,
        }
    }

    /// Keep the facts relevant to `context`. Without a context every fact is kept.
    pub async fn filter_relevant(
        &self,
        facts: Vec<AtomicFact>,
        context: Option<&str>,
        diagnostics: &mut StageDiagnostics,
    ) -> Vec<AtomicFact> {
        let Some(context) = context.filter(|c| !c.trim().is_empty()) else {
            return facts;
        };

        let judged = bounded(facts, self.max_concurrency, move |fact| async move {
            let judgment = self.judge(&fact, context).await;
            (fact, judgment)
        })
        .await;

        let mut kept = Vec::with_capacity(judged.len());
        for (fact, judgment) in judged {
            match judgment {
                Judgment::Relevant => kept.push(fact),
                Judgment::Irrelevant => {
                    tracing::info!(fact_id = %fact.id, "Fact not relevant to context");
                    diagnostics.drop_fact(&fact, "not relevant to context");
                }
                Judgment::Unknown(reason) => {
                    tracing::warn!(fact_id = %fact.id, reason = %reason, "Keeping fact without relevancy judgment");
                    diagnostics.warn(format!("Relevancy of fact {} unknown, kept: {}", fact.id, reason));
                    kept.push(fact);
                }
            }
        }
        kept
    }

    async fn judge(&self, fact: &AtomicFact, context: &str) -> Judgment {
        match &self.backend {
            Backend::Heuristic => {
                if keywords(&fact.text).is_empty() || keyword_overlap(&fact.text, context) > 0.0 {
                    Judgment::Relevant
                } else {
                    Judgment::Irrelevant
                }
            }
            Backend::Model { invoker, params } => {
                let prompt = relevancy_prompt(fact, context);
                match invoker.call(Stage::FilterRelevant, &prompt, params).await {
                    Ok(output) => match parse_yes_no(&output) {
                        Some(true) => Judgment::Relevant,
                        Some(false) => Judgment::Irrelevant,
                        None => Judgment::Unknown(format!("unreadable judgment {:?}", output.trim())),
                    },
                    Err(e) => Judgment::Unknown(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::resilience::RetryPolicy;
    use crate::testing::ScriptedModel;

    fn filter(model: &ScriptedModel) -> RelevancyFilter {
        let config = RuntimeConfig {
            retry: RetryPolicy::none(),
            cache: None,
            ..Default::default()
        };
        let invoker = Arc::new(ModelInvoker::new(Arc::new(model.clone()), &config));
        RelevancyFilter::with_model(invoker, ModelParams::default(), 2)
    }

    fn facts() -> Vec<AtomicFact> {
        vec![
            AtomicFact::with_id("a", "Everest is 8,849 meters tall."),
            AtomicFact::with_id("b", "I love hiking."),
            AtomicFact::with_id("c", "Everest is in the Himalayas."),
            AtomicFact::with_id("d", "Everest was first climbed in 1953."),
        ]
    }

    #[tokio::test]
    async fn test_no_context_is_a_no_op() {
        let model = ScriptedModel::new();
        let mut diag = StageDiagnostics::new(4);
        let kept = filter(&model).filter_relevant(facts(), None, &mut diag).await;

        assert_eq!(kept, facts());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_irrelevant_dropped_and_failures_kept() {
        let model = ScriptedModel::new()
            .on("Fact: Everest is 8,849", "yes")
            .on("Fact: I love hiking.", "No.")
            .on("Fact: Everest is in the", "not sure")
            .fail_on("Fact: Everest was first", "timeout");

        let mut diag = StageDiagnostics::new(4);
        let kept = filter(&model)
            .filter_relevant(facts(), Some("How tall is Mount Everest?"), &mut diag)
            .await;

        let ids: Vec<_> = kept.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "d"]);
        assert_eq!(diag.dropped.len(), 1);
        assert_eq!(diag.dropped[0].fact_id.as_str(), "b");
        assert_eq!(diag.warnings.len(), 2);
    }

    #[tokio::test]
    async fn test_heuristic_keyword_overlap() {
        let mut diag = StageDiagnostics::new(4);
        let kept = RelevancyFilter::heuristic()
            .filter_relevant(facts(), Some("Facts about Everest"), &mut diag)
            .await;

        let ids: Vec<_> = kept.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "d"]);
    }
}
