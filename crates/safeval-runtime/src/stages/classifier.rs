//! Fact classification against retrieved evidence.

use async_trait::async_trait;
use std::borrow::Cow;
use std::sync::Arc;

use safeval_core::{
    AtomicFact, CategoryMatch, CategoryResolver, ClassifiedFact, Config, RetrievedDocument, Stage,
};

use crate::error::ClassificationError;
use crate::evidence::EvidenceValidator;
use crate::invoker::ModelInvoker;
use crate::model::ModelParams;
use crate::parsing::parse_classification;
use crate::prompts::classification_prompt;

/// Assigns one of `categories` to a fact given its evidence.
#[async_trait]
pub trait FactClassifier: Send + Sync {
    async fn classify(
        &self,
        fact: &AtomicFact,
        documents: &[RetrievedDocument],
        categories: &[String],
    ) -> Result<ClassifiedFact, ClassificationError>;
}

/// Model-backed classifier.
///
/// The model's verdict goes through a [`CategoryResolver`]. In strict
/// evidence mode a fact with no documents gets the fallback category
/// without a model call, and any other verdict must quote a document or
/// it is downgraded to the fallback.
pub struct ModelClassifier {
    invoker: Arc<ModelInvoker>,
    params: ModelParams,
    resolver: CategoryResolver,
    strict: bool,
}

impl ModelClassifier {
    pub fn new(invoker: Arc<ModelInvoker>, params: ModelParams, resolver: CategoryResolver) -> Self {
        Self {
            invoker,
            params: params.json(),
            resolver,
            strict: false,
        }
    }

    pub fn from_config(invoker: Arc<ModelInvoker>, config: &Config) -> Self {
        let resolver = CategoryResolver::new(
            config.evaluation_categories(),
            config.classification.min_category_similarity,
            config.classification.fallback_category.clone(),
        );
        Self::new(invoker, ModelParams::from_config(&config.llm_config), resolver)
            .with_strict_evidence(config.llm_config.strict_evidence_only)
    }

    pub fn with_strict_evidence(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    fn resolver_for<'a>(&'a self, categories: &[String]) -> Cow<'a, CategoryResolver> {
        if self.resolver.categories() == categories {
            return Cow::Borrowed(&self.resolver);
        }
        let fallback = self
            .resolver
            .fallback()
            .filter(|f| categories.iter().any(|c| c == f))
            .map(str::to_string);
        Cow::Owned(CategoryResolver::new(
            categories.to_vec(),
            self.resolver.min_similarity(),
            fallback,
        ))
    }
}

#[async_trait]
impl FactClassifier for ModelClassifier {
    async fn classify(
        &self,
        fact: &AtomicFact,
        documents: &[RetrievedDocument],
        categories: &[String],
    ) -> Result<ClassifiedFact, ClassificationError> {
        let resolver = self.resolver_for(categories);
        let fallback = resolver.fallback();

        if self.strict && documents.is_empty() {
            let category = fallback.ok_or_else(|| ClassificationError::NoEvidence {
                fact_id: fact.id.clone(),
            })?;
            tracing::info!(fact_id = %fact.id, category = %category, "No evidence, assigned fallback category");
            return Ok(ClassifiedFact {
                fact: fact.clone(),
                documents: Vec::new(),
                category: category.to_string(),
                rationale: Some("No evidence was retrieved for this fact.".to_string()),
                confidence: None,
            });
        }

        let strict_fallback = if self.strict { fallback } else { None };
        let prompt = classification_prompt(fact, documents, resolver.categories(), strict_fallback);
        let output = self
            .invoker
            .call(Stage::Classify, &prompt, &self.params)
            .await
            .map_err(|source| ClassificationError::Model {
                fact_id: fact.id.clone(),
                source,
            })?;

        let reply = parse_classification(&output).map_err(|message| ClassificationError::Parse {
            fact_id: fact.id.clone(),
            message,
        })?;

        let (mut category, how) =
            resolver
                .resolve(&reply.category)
                .ok_or_else(|| ClassificationError::UnmappedCategory {
                    fact_id: fact.id.clone(),
                    verdict: reply.category.clone(),
                })?;
        if how == CategoryMatch::Fallback {
            tracing::warn!(fact_id = %fact.id, verdict = %reply.category, "Verdict mapped to fallback category");
        }

        let mut rationale = reply.rationale.clone();
        if self.strict && Some(category.as_str()) != fallback {
            if let Err(e) = EvidenceValidator::new(documents).locate(reply.evidence.as_deref()) {
                let fallback = fallback.ok_or_else(|| ClassificationError::Ungrounded {
                    fact_id: fact.id.clone(),
                    category: category.clone(),
                    reason: e.to_string(),
                })?;
                tracing::warn!(
                    fact_id = %fact.id,
                    verdict = %category,
                    reason = %e,
                    "Ungrounded verdict downgraded to fallback"
                );
                rationale = Some(format!("Downgraded from '{}': {}", category, e));
                category = fallback.to_string();
            }
        }

        tracing::info!(fact_id = %fact.id, category = %category, matched = ?how, "Classified fact");

        Ok(ClassifiedFact {
            fact: fact.clone(),
            documents: documents.to_vec(),
            category,
            rationale,
            confidence: reply.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::resilience::RetryPolicy;
    use crate::testing::ScriptedModel;

    fn categories() -> Vec<String> {
        vec![
            "supported".to_string(),
            "contradicted".to_string(),
            "unverifiable".to_string(),
        ]
    }

    fn classifier(model: &ScriptedModel, strict: bool) -> ModelClassifier {
        let config = RuntimeConfig {
            retry: RetryPolicy::none(),
            cache: None,
            ..Default::default()
        };
        let invoker = Arc::new(ModelInvoker::new(Arc::new(model.clone()), &config));
        let resolver = CategoryResolver::new(categories(), 0.8, Some("unverifiable".to_string()));
        ModelClassifier::new(invoker, ModelParams::default(), resolver).with_strict_evidence(strict)
    }

    fn everest() -> (AtomicFact, Vec<RetrievedDocument>) {
        let fact = AtomicFact::with_id("f1", "Mount Everest is 8,849 meters tall.");
        let docs = vec![RetrievedDocument::new(
            fact.id.clone(),
            "kb:everest",
            "Mount Everest's summit is 8,849 meters above sea level.",
        )];
        (fact, docs)
    }

    #[tokio::test]
    async fn test_json_verdict() {
        let model = ScriptedModel::new().on(
            "Fact: Mount Everest",
            r#"{"category": "Supported", "confidence": 0.9, "rationale": "Height matches.", "evidence": "8,849 meters"}"#,
        );
        let (fact, docs) = everest();

        let classified = classifier(&model, false)
            .classify(&fact, &docs, &categories())
            .await
            .unwrap();

        assert_eq!(classified.category, "supported");
        assert_eq!(classified.confidence, Some(0.9));
        assert_eq!(classified.rationale.as_deref(), Some("Height matches."));
        assert_eq!(classified.documents, docs);
    }

    #[tokio::test]
    async fn test_strict_without_documents_skips_model() {
        let model = ScriptedModel::new();
        let (fact, _) = everest();

        let classified = classifier(&model, true)
            .classify(&fact, &[], &categories())
            .await
            .unwrap();

        assert_eq!(classified.category, "unverifiable");
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_strict_downgrades_fabricated_quote() {
        let model = ScriptedModel::new().on(
            "Fact: Mount Everest",
            r#"{"category": "contradicted", "evidence": "Everest is 9,000 meters tall"}"#,
        );
        let (fact, docs) = everest();

        let classified = classifier(&model, true)
            .classify(&fact, &docs, &categories())
            .await
            .unwrap();

        assert_eq!(classified.category, "unverifiable");
        assert!(classified
            .rationale
            .as_deref()
            .is_some_and(|r| r.starts_with("Downgraded from 'contradicted'")));
    }

    #[tokio::test]
    async fn test_strict_accepts_grounded_quote() {
        let model = ScriptedModel::new().on(
            "Fact: Mount Everest",
            r#"{"category": "supported", "evidence": "summit is 8,849 meters"}"#,
        );
        let (fact, docs) = everest();

        let classified = classifier(&model, true)
            .classify(&fact, &docs, &categories())
            .await
            .unwrap();
        assert_eq!(classified.category, "supported");
    }

    #[tokio::test]
    async fn test_negated_verdict_falls_back() {
        let model = ScriptedModel::new().on("Fact:", "The fact is not supported by the documents.");
        let (fact, docs) = everest();

        let classified = classifier(&model, false)
            .classify(&fact, &docs, &categories())
            .await
            .unwrap();

        assert_eq!(classified.category, "unverifiable");
    }

    #[tokio::test]
    async fn test_object_without_category_is_parse_error() {
        let model = ScriptedModel::new().on(
            "Fact:",
            r#"{"category": "", "rationale": "The documents show it is supported."}"#,
        );
        let (fact, docs) = everest();

        let result = classifier(&model, false).classify(&fact, &docs, &categories()).await;

        assert!(matches!(result, Err(ClassificationError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_unmapped_verdict_without_fallback() {
        let model = ScriptedModel::new().on("Fact:", "banana");
        let (fact, docs) = everest();
        let only_two = vec!["supported".to_string(), "contradicted".to_string()];

        let result = classifier(&model, false).classify(&fact, &docs, &only_two).await;

        assert!(matches!(
            result,
            Err(ClassificationError::UnmappedCategory { ref verdict, .. }) if verdict == "banana"
        ));
    }

    #[tokio::test]
    async fn test_model_failure() {
        let model = ScriptedModel::new().fail_on("Fact:", "server error");
        let (fact, docs) = everest();

        let result = classifier(&model, false).classify(&fact, &docs, &categories()).await;
        assert!(matches!(result, Err(ClassificationError::Model { .. })));
    }
}
