//! Self-containment check and repair.

use std::sync::Arc;

use safeval_core::heuristics::{has_dangling_reference, resolve_leading_reference};
use safeval_core::{AtomicFact, Stage, StageDiagnostics};

use super::{bounded, Backend};
use crate::error::ContainmentError;
use crate::invoker::ModelInvoker;
use crate::model::ModelParams;
use crate::parsing::parse_yes_no;
use crate::prompts::{containment_prompt, self_contain_prompt};

/// Outcome of the rewrite step for one fact.
enum Rewrite {
    Done(AtomicFact),
    Unresolved(AtomicFact),
}

/// Decides whether facts stand on their own and rewrites those that don't.
pub struct ContainmentChecker {
    backend: Backend,
    max_concurrency: usize,
}

impl ContainmentChecker {
    pub fn with_model(invoker: Arc<ModelInvoker>, params: ModelParams, max_concurrency: usize) -> Self {
        Self::from_backend(Backend::Model { invoker, params }, max_concurrency)
    }

    /// Pronoun-based checker; rewrites by substituting an earlier subject.
    pub fn heuristic() -> Self {
        Self::from_backend(Backend::Heuristic, 1)
    }

    pub(crate) fn from_backend(backend: Backend, max_concurrency: usize) -> Self {
        Self {
            backend,
            max_concurrency,
        }
    }

    /// Set `is_self_contained` on every fact.
    ///
    /// Facts already marked self-contained pass through without a model
    /// call. An unreadable judgment marks the fact as not self-contained.
    /// A failed model call drops the fact.
    pub async fn check_containment(
        &self,
        facts: Vec<AtomicFact>,
        response: &str,
        diagnostics: &mut StageDiagnostics,
    ) -> Vec<AtomicFact> {
        let results = bounded(facts, self.max_concurrency, move |fact| async move {
            self.check_one(fact, response).await
        })
        .await;

        let mut kept = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(fact) => kept.push(fact),
                Err((fact, e)) => {
                    tracing::warn!(fact_id = %fact.id, error = %e, "Dropping fact after containment failure");
                    diagnostics.warn(e.to_string());
                    diagnostics.drop_fact(&fact, e.to_string());
                }
            }
        }
        kept
    }

    async fn check_one(
        &self,
        fact: AtomicFact,
        response: &str,
    ) -> Result<AtomicFact, (AtomicFact, ContainmentError)> {
        if fact.is_confirmed_self_contained() {
            return Ok(fact);
        }

        let contained = match &self.backend {
            Backend::Heuristic => !has_dangling_reference(&fact.text),
            Backend::Model { invoker, params } => {
                let prompt = containment_prompt(&fact, response);
                match invoker.call(Stage::CheckContainment, &prompt, params).await {
                    Ok(output) => parse_yes_no(&output).unwrap_or_else(|| {
                        tracing::debug!(fact_id = %fact.id, output = %output, "Unreadable containment judgment");
                        false
                    }),
                    Err(source) => {
                        let fact_id = fact.id.clone();
                        return Err((fact, ContainmentError::Model { fact_id, source }));
                    }
                }
            }
        };

        Ok(fact.with_self_contained(contained))
    }

    /// Rewrite facts not marked self-contained.
    ///
    /// Rewritten facts keep their id and remember their original text.
    /// Facts whose rewrite fails or comes back empty are dropped.
    pub async fn self_contain_facts(
        &self,
        facts: Vec<AtomicFact>,
        response: &str,
        context: Option<&str>,
        diagnostics: &mut StageDiagnostics,
    ) -> Vec<AtomicFact> {
        let results = bounded(facts, self.max_concurrency, move |fact| async move {
            self.rewrite_one(fact, response, context).await
        })
        .await;

        let mut kept = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(Rewrite::Done(fact)) => kept.push(fact),
                Ok(Rewrite::Unresolved(fact)) => {
                    diagnostics.warn(format!(
                        "Could not resolve references in fact {}; kept as is",
                        fact.id
                    ));
                    kept.push(fact);
                }
                Err((fact, e)) => {
                    tracing::warn!(fact_id = %fact.id, error = %e, "Dropping fact after failed rewrite");
                    diagnostics.warn(e.to_string());
                    diagnostics.drop_fact(&fact, e.to_string());
                }
            }
        }
        kept
    }

    async fn rewrite_one(
        &self,
        fact: AtomicFact,
        response: &str,
        context: Option<&str>,
    ) -> Result<Rewrite, (AtomicFact, ContainmentError)> {
        if fact.is_confirmed_self_contained() {
            return Ok(Rewrite::Done(fact));
        }

        match &self.backend {
            Backend::Heuristic => match resolve_leading_reference(&fact.text, response) {
                Some(text) => {
                    tracing::debug!(fact_id = %fact.id, rewritten = %text, "Resolved leading reference");
                    Ok(Rewrite::Done(fact.rewritten(text, context)))
                }
                None => Ok(Rewrite::Unresolved(fact)),
            },
            Backend::Model { invoker, params } => {
                let prompt = self_contain_prompt(&fact, response, context);
                let output = match invoker.call(Stage::SelfContain, &prompt, params).await {
                    Ok(output) => output,
                    Err(source) => {
                        let fact_id = fact.id.clone();
                        return Err((fact, ContainmentError::Model { fact_id, source }));
                    }
                };

                let text = output.trim().trim_matches('"').trim();
                if text.is_empty() {
                    let fact_id = fact.id.clone();
                    return Err((fact, ContainmentError::EmptyRewrite { fact_id }));
                }

                tracing::debug!(fact_id = %fact.id, rewritten = %text, "Rewrote fact");
                Ok(Rewrite::Done(fact.rewritten(text, context)))
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

    const RESPONSE: &str = "Herman Melville was a novelist. He wrote Moby Dick in 1851.";

    fn checker(model: &ScriptedModel) -> ContainmentChecker {
        let config = RuntimeConfig {
            retry: RetryPolicy::none(),
            cache: None,
            ..Default::default()
        };
        let invoker = Arc::new(ModelInvoker::new(Arc::new(model.clone()), &config));
        ContainmentChecker::with_model(invoker, ModelParams::default(), 4)
    }

    #[tokio::test]
    async fn test_judgments_and_fallback_to_not_contained() {
        let model = ScriptedModel::new()
            .on("Fact: Herman Melville was a novelist.", "Yes")
            .on("Fact: He wrote Moby Dick in 1851.", "No")
            .on("Fact: Melville liked whales.", "maybe");

        let facts = vec![
            AtomicFact::with_id("a", "Herman Melville was a novelist."),
            AtomicFact::with_id("b", "He wrote Moby Dick in 1851."),
            AtomicFact::with_id("c", "Melville liked whales."),
        ];
        let mut diag = StageDiagnostics::new(3);
        let checked = checker(&model).check_containment(facts, RESPONSE, &mut diag).await;

        let flags: Vec<_> = checked.iter().map(|f| f.is_self_contained).collect();
        assert_eq!(flags, vec![Some(true), Some(false), Some(false)]);
        assert!(diag.dropped.is_empty());
    }

    #[tokio::test]
    async fn test_confirmed_facts_skip_the_model() {
        let model = ScriptedModel::new();
        let facts = vec![AtomicFact::with_id("a", "Water boils at 100 C.").with_self_contained(true)];

        let checker = checker(&model);
        let mut diag = StageDiagnostics::new(1);
        let once = checker.check_containment(facts.clone(), RESPONSE, &mut diag).await;
        let mut diag = StageDiagnostics::new(1);
        let rewritten = checker.self_contain_facts(once.clone(), RESPONSE, None, &mut diag).await;

        assert_eq!(once, facts);
        assert_eq!(rewritten, facts);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_model_failure_drops_fact() {
        let model = ScriptedModel::new()
            .on("Fact: Herman Melville was a novelist.", "yes")
            .fail_on("Fact: He wrote", "connection reset");

        let facts = vec![
            AtomicFact::with_id("a", "Herman Melville was a novelist."),
            AtomicFact::with_id("b", "He wrote Moby Dick in 1851."),
        ];
        let mut diag = StageDiagnostics::new(2);
        let checked = checker(&model).check_containment(facts, RESPONSE, &mut diag).await;

        assert_eq!(checked.len(), 1);
        assert_eq!(checked[0].id.as_str(), "a");
        assert_eq!(diag.dropped.len(), 1);
        assert_eq!(diag.dropped[0].fact_id.as_str(), "b");
        assert_eq!(diag.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_rewrite_and_empty_rewrite() {
        let model = ScriptedModel::new()
            .on("Fact: He wrote Moby Dick in 1851.", "Herman Melville wrote Moby Dick in 1851.")
            .on("Fact: It sold poorly.", "  ");

        let facts = vec![
            AtomicFact::with_id("b", "He wrote Moby Dick in 1851.").with_self_contained(false),
            AtomicFact::with_id("c", "It sold poorly.").with_self_contained(false),
        ];
        let mut diag = StageDiagnostics::new(2);
        let rewritten = checker(&model)
            .self_contain_facts(facts, RESPONSE, Some("American novels"), &mut diag)
            .await;

        assert_eq!(rewritten.len(), 1);
        let fact = &rewritten[0];
        assert_eq!(fact.id.as_str(), "b");
        assert_eq!(fact.text, "Herman Melville wrote Moby Dick in 1851.");
        assert_eq!(fact.original_text.as_deref(), Some("He wrote Moby Dick in 1851."));
        assert_eq!(fact.context_used.as_deref(), Some("American novels"));
        assert!(fact.is_confirmed_self_contained());
        assert!(diag.dropped[0].reason.contains("came back empty"));
    }

    #[tokio::test]
    async fn test_heuristic_check_and_rewrite() {
        let checker = ContainmentChecker::heuristic();
        let facts = vec![
            AtomicFact::with_id("a", "Herman Melville was a novelist."),
            AtomicFact::with_id("b", "He wrote Moby Dick in 1851."),
        ];

        let mut diag = StageDiagnostics::new(2);
        let checked = checker.check_containment(facts, RESPONSE, &mut diag).await;
        assert_eq!(checked[0].is_self_contained, Some(true));
        assert_eq!(checked[1].is_self_contained, Some(false));

        let rewritten = checker.self_contain_facts(checked, RESPONSE, None, &mut diag).await;
        assert_eq!(rewritten[1].text, "Herman Melville wrote Moby Dick in 1851.");
        assert!(rewritten.iter().all(AtomicFact::is_confirmed_self_contained));
    }
}
