//! End-to-end pipeline runs against scripted capabilities.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use safeval_core::{
    AtomicFact, ClassifiedFact, Config, FactualityScore, RetrievedDocument, ScoringError, Stage,
};
use safeval_runtime::testing::{ScriptedModel, StaticRetriever};
use safeval_runtime::{
    ClassificationError, EvaluationError, EvaluationPipeline, FactClassifier,
    KnowledgeBaseRetriever, LanguageModel, ModelError, ModelParams,
};

const EVEREST: &str = "Mount Everest is the tallest mountain in the world. It is 8,849 meters tall.";

fn config() -> Config {
    let mut config = Config::default();
    config.runtime.retry.max_attempts = 1;
    config.runtime.cache.enabled = false;
    config
}

fn pipeline(config: Config, model: &ScriptedModel, retriever: StaticRetriever) -> EvaluationPipeline {
    EvaluationPipeline::new(config, Arc::new(model.clone()), Arc::new(retriever)).unwrap()
}

#[tokio::test]
async fn test_mount_everest_golden() {
    let model = ScriptedModel::new()
        .on(
            "Break the text below",
            "- Mount Everest is the tallest mountain in the world.\n- It is 8,849 meters tall.",
        )
        .on(
            "Fact: Mount Everest is the tallest mountain in the world.\n\nSelf-contained?",
            "yes",
        )
        .on("Fact: It is 8,849 meters tall.\n\nSelf-contained?", "no")
        .on("Rewritten fact:", "Mount Everest is 8,849 meters tall.")
        .on("Relevant?", "yes")
        .on(
            "Fact: Mount Everest is 8,849 meters tall.\n\nRetrieved documents",
            r#"{"category": "supported", "confidence": 0.95, "rationale": "The height matches.", "evidence": "8,849 meters"}"#,
        )
        .on(
            "Fact: Mount Everest is the tallest mountain in the world.\n\nRetrieved documents",
            r#"{"category": "unverifiable", "rationale": "No document covers this."}"#,
        );
    let retriever = StaticRetriever::new().with_document(
        "8,849",
        "kb:everest-height",
        "Mount Everest's summit is 8,849 meters above sea level.",
    );

    let result = pipeline(config(), &model, retriever)
        .run(EVEREST, Some("Tell me about Mount Everest."))
        .await
        .unwrap();

    assert_eq!(result.factuality_score, FactualityScore::Score(0.75));

    let facts = &result.classified_facts;
    assert_eq!(facts.len(), 2);
    assert_eq!(facts[0].fact.text, "Mount Everest is the tallest mountain in the world.");
    assert_eq!(facts[0].category, "unverifiable");
    assert!(facts[0].documents.is_empty());

    assert_eq!(facts[1].fact.text, "Mount Everest is 8,849 meters tall.");
    assert_eq!(facts[1].fact.original_text.as_deref(), Some("It is 8,849 meters tall."));
    assert_eq!(facts[1].category, "supported");
    assert_eq!(facts[1].confidence, Some(0.95));
    assert_eq!(facts[1].documents.len(), 1);
    assert_eq!(facts[1].documents[0].fact_id, facts[1].fact.id);

    assert_eq!(result.metadata.len(), 8);
    assert!(!result.metadata[&Stage::SelfContain].skipped);
    assert!(!result.metadata[&Stage::FilterRelevant].skipped);
    assert_eq!(result.metadata[&Stage::Extract].output_count, 2);
    assert_eq!(result.metadata[&Stage::Score].output_count, 2);
    assert!(result.metadata.values().all(|d| d.dropped.is_empty()));
}

#[tokio::test]
async fn test_everest_in_feet_against_knowledge_base() {
    let model = ScriptedModel::new()
        .on(
            "Break the text below",
            "- Mount Everest is 29,032 feet tall.\n- Mount Everest is the tallest mountain on Earth.",
        )
        .on("Self-contained?", "yes")
        .on("Relevant?", "yes")
        .on(
            "Fact: Mount Everest is 29,032 feet tall.\n\nRetrieved documents",
            r#"{"category": "supported", "confidence": 0.9, "evidence": "29,032 feet"}"#,
        )
        .on(
            "Fact: Mount Everest is the tallest mountain on Earth.\n\nRetrieved documents",
            r#"{"category": "unverifiable", "rationale": "The document ranks by height above sea level only."}"#,
        );
    let retriever = KnowledgeBaseRetriever::new([(
        "Mount Everest",
        "Mount Everest is the highest mountain above sea level at 29,032 feet (8,849 meters).",
    )]);

    let pipeline = EvaluationPipeline::new(config(), Arc::new(model.clone()), Arc::new(retriever)).unwrap();
    let response = "Mount Everest, at 29,032 feet, is the tallest mountain on Earth.";
    let context = Some("Information about geographical features");

    let result = pipeline.run(response, context).await.unwrap();

    let facts = &result.classified_facts;
    assert_eq!(facts.len(), 2);
    assert_eq!(facts[0].fact.text, "Mount Everest is 29,032 feet tall.");
    assert_eq!(facts[0].category, "supported");
    assert_eq!(facts[0].documents.len(), 1);
    assert_eq!(facts[0].documents[0].source_id, "Mount Everest");
    assert_eq!(facts[0].documents[0].fact_id, facts[0].fact.id);
    assert_eq!(facts[1].fact.text, "Mount Everest is the tallest mountain on Earth.");
    assert_eq!(facts[1].category, "unverifiable");
    assert_eq!(result.factuality_score, FactualityScore::Score(0.75));

    // Same stub, same answer.
    let again = pipeline.run(response, context).await.unwrap();
    assert_eq!(again.factuality_score, result.factuality_score);
}

#[tokio::test]
async fn test_all_facts_irrelevant_is_not_evaluable() {
    let model = ScriptedModel::new()
        .on(
            "Break the text below",
            "Water boils at 100 degrees Celsius at sea level.\nThe Moon is made of cheese.",
        )
        .on("Self-contained?", "yes")
        .on("Relevant?", "no");

    let result = pipeline(config(), &model, StaticRetriever::new())
        .run(
            "Water boils at 100 C. The Moon is cheese.",
            Some("Information about geographical features"),
        )
        .await
        .unwrap();

    assert_eq!(result.factuality_score, FactualityScore::NoEvaluableFacts);
    assert!(result.classified_facts.is_empty());
    let relevancy = &result.metadata[&Stage::FilterRelevant];
    assert_eq!(relevancy.dropped.len(), 2);
    assert_eq!(result.metadata[&Stage::Classify].input_count, 0);
}

#[tokio::test]
async fn test_all_facts_removed_by_dedup_is_not_evaluable() {
    let model = water_and_moon();
    let pipeline = EvaluationPipeline::builder(config())
        .model(Arc::new(model.clone()))
        .retriever(Arc::new(StaticRetriever::new()))
        .deduplicator(Arc::new(|_facts: Vec<AtomicFact>| Vec::new()))
        .build()
        .unwrap();

    let result = pipeline
        .run("Water boils at 100 C. The Moon is cheese.", None)
        .await
        .unwrap();

    assert_eq!(result.factuality_score, FactualityScore::NoEvaluableFacts);
    let dedup = &result.metadata[&Stage::Deduplicate];
    assert_eq!(dedup.dropped.len(), 2);
    assert!(dedup.dropped.iter().all(|d| d.reason == "removed by deduplicator"));
    // Extraction plus one containment check per fact; nothing is classified.
    assert_eq!(model.calls(), 3);
}

fn water_and_moon() -> ScriptedModel {
    ScriptedModel::new()
        .on(
            "Break the text below",
            "Water boils at 100 degrees Celsius at sea level.\nThe Moon is made of cheese.",
        )
        .on("Self-contained?", "yes")
        .on("Fact: Water boils", r#"{"category": "supported"}"#)
        .on("Fact: The Moon", r#"{"category": "contradicted"}"#)
}

#[tokio::test]
async fn test_score_is_rubric_mean() {
    let model = water_and_moon();
    let result = pipeline(config(), &model, StaticRetriever::new())
        .run("Water boils at 100 C. The Moon is cheese.", None)
        .await
        .unwrap();

    assert_eq!(result.factuality_score, FactualityScore::Score(0.5));
    assert_eq!(result.category_counts().get("supported"), Some(&1));
    assert_eq!(result.category_counts().get("contradicted"), Some(&1));
    assert!(result.metadata[&Stage::SelfContain].skipped);
    assert!(result.metadata[&Stage::FilterRelevant].skipped);
}

#[tokio::test]
async fn test_no_facts_is_not_evaluable() {
    let model = ScriptedModel::new().on("Break the text below", "NONE");
    let result = pipeline(config(), &model, StaticRetriever::new())
        .run("Hello! How can I help you today?", None)
        .await
        .unwrap();

    assert_eq!(result.factuality_score, FactualityScore::NoEvaluableFacts);
    assert!(result.classified_facts.is_empty());
    assert_eq!(model.calls(), 1);
}

struct FixedClassifier(&'static str);

#[async_trait]
impl FactClassifier for FixedClassifier {
    async fn classify(
        &self,
        fact: &AtomicFact,
        documents: &[RetrievedDocument],
        _categories: &[String],
    ) -> Result<ClassifiedFact, ClassificationError> {
        Ok(ClassifiedFact {
            fact: fact.clone(),
            documents: documents.to_vec(),
            category: self.0.to_string(),
            rationale: None,
            confidence: None,
        })
    }
}

#[tokio::test]
async fn test_unknown_category_fails_at_scoring() {
    let model = water_and_moon();
    let pipeline = EvaluationPipeline::builder(config())
        .model(Arc::new(model))
        .retriever(Arc::new(StaticRetriever::new()))
        .classifier(Arc::new(FixedClassifier("mostly_true")))
        .build()
        .unwrap();

    let failure = pipeline
        .run("Water boils at 100 C. The Moon is cheese.", None)
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Score);
    assert!(matches!(
        failure.error,
        EvaluationError::Scoring(ScoringError::UnknownCategory { ref category, .. }) if category == "mostly_true"
    ));
    assert!(failure.diagnostics.contains_key(&Stage::Classify));
    assert!(failure.to_string().starts_with("Evaluation failed at stage score"));
}

#[tokio::test]
async fn test_extraction_failure_aborts() {
    let model = ScriptedModel::new().fail_on("Break the text below", "model offline");
    let failure = pipeline(config(), &model, StaticRetriever::new())
        .run(EVEREST, None)
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Extract);
    assert!(matches!(failure.error, EvaluationError::Extraction(_)));
    assert_eq!(failure.diagnostics.len(), 1);
    assert_eq!(failure.diagnostics[&Stage::Extract].warnings.len(), 1);
}

#[tokio::test]
async fn test_retrieval_failure_is_isolated() {
    let model = water_and_moon();
    let retriever = StaticRetriever::new()
        .with_document("Water", "kb:water", "At sea level water boils at 100 degrees Celsius.")
        .failing_on("Moon");

    let mut config = config();
    config.llm_config.strict_evidence_only = true;

    let result = pipeline(config, &model, retriever)
        .run("Water boils at 100 C. The Moon is cheese.", None)
        .await
        .unwrap();

    let facts = &result.classified_facts;
    assert_eq!(facts.len(), 2);
    assert_eq!(facts[1].fact.text, "The Moon is made of cheese.");
    assert!(facts[1].documents.is_empty());
    assert_eq!(facts[1].category, "unverifiable");
    assert_eq!(result.metadata[&Stage::Retrieve].warnings.len(), 1);

    // Strict mode without a quote downgrades the water verdict as well.
    assert_eq!(facts[0].category, "unverifiable");
    assert_eq!(result.factuality_score, FactualityScore::Score(0.5));
}

#[tokio::test]
async fn test_unclassifiable_fact_excluded_from_score() {
    let model = ScriptedModel::new()
        .on(
            "Break the text below",
            "Water boils at 100 degrees Celsius at sea level.\nThe Moon is made of cheese.",
        )
        .on("Self-contained?", "yes")
        .on("Fact: Water boils", r#"{"category": "supported"}"#)
        .fail_on("Fact: The Moon", "overloaded");

    let result = pipeline(config(), &model, StaticRetriever::new())
        .run("Water boils at 100 C. The Moon is cheese.", None)
        .await
        .unwrap();

    assert_eq!(result.factuality_score, FactualityScore::Score(1.0));
    let classify = &result.metadata[&Stage::Classify];
    assert_eq!(classify.input_count, 2);
    assert_eq!(classify.output_count, 1);
    assert_eq!(classify.dropped[0].text, "The Moon is made of cheese.");
}

#[tokio::test]
async fn test_near_duplicates_merged() {
    let model = ScriptedModel::new()
        .on(
            "Break the text below",
            "Everest is the tallest mountain.\nEverest is the tallest mountain on Earth.",
        )
        .on("Self-contained?", "yes")
        .on("Fact: Everest", r#"{"category": "supported"}"#);

    let result = pipeline(config(), &model, StaticRetriever::new())
        .run("Everest is the tallest mountain. It is the tallest mountain on Earth.", None)
        .await
        .unwrap();

    assert_eq!(result.classified_facts.len(), 1);
    let fact = &result.classified_facts[0].fact;
    assert_eq!(fact.text, "Everest is the tallest mountain on Earth.");
    assert_eq!(fact.merged_from.len(), 1);

    let dedup = &result.metadata[&Stage::Deduplicate];
    assert_eq!(dedup.dropped.len(), 1);
    assert_eq!(dedup.dropped[0].reason, format!("merged into {}", fact.id));
}

#[tokio::test]
async fn test_heuristic_stages_only_call_model_to_classify() {
    let model = ScriptedModel::new().on("Fact: Herman Melville", r#"{"category": "supported"}"#);
    let pipeline = EvaluationPipeline::builder(config())
        .model(Arc::new(model.clone()))
        .retriever(Arc::new(StaticRetriever::new()))
        .heuristic()
        .build()
        .unwrap();

    let result = pipeline
        .run(
            "Herman Melville was a novelist. He wrote Moby Dick in 1851.",
            Some("Herman Melville novels"),
        )
        .await
        .unwrap();

    let texts: Vec<_> = result
        .classified_facts
        .iter()
        .map(|c| c.fact.text.as_str())
        .collect();
    assert_eq!(
        texts,
        vec![
            "Herman Melville was a novelist.",
            "Herman Melville wrote Moby Dick in 1851."
        ]
    );
    assert_eq!(result.factuality_score, FactualityScore::Score(1.0));
    assert_eq!(model.calls(), 2);
}

struct StalledModel;

#[async_trait]
impl LanguageModel for StalledModel {
    async fn generate(&self, _prompt: &str, _params: &ModelParams) -> Result<String, ModelError> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok("NONE".to_string())
    }

    fn model_id(&self) -> &str {
        "stalled"
    }
}

#[tokio::test]
async fn test_cancellation_reports_stage() {
    let pipeline = EvaluationPipeline::new(
        config(),
        Arc::new(StalledModel),
        Arc::new(StaticRetriever::new()),
    )
    .unwrap();

    let failure = pipeline
        .run_until(EVEREST, None, tokio::time::sleep(Duration::from_millis(20)))
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Extract);
    assert!(matches!(failure.error, EvaluationError::Cancelled));
    assert!(failure.diagnostics.is_empty());
}
