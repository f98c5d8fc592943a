//! The evaluation pipeline.
//!
//! Runs the stages in a fixed order, one barrier per stage:
//!
//! ```text
//! Extract → CheckContainment → SelfContain → FilterRelevant → Deduplicate
//!         → Retrieve → Classify → Score
//! ```
//!
//! Only extraction and scoring can fail a run. Every other stage absorbs
//! per-fact failures, logs them and records them in the stage diagnostics.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use safeval_core::{
    AtomicFact, ClassifiedFact, Config, Deduplicator, EvaluationResult, FactId, FactualityScorer,
    Metadata, SimilarityDeduplicator, Stage, StageDiagnostics,
};

use crate::config::RuntimeConfig;
use crate::error::{ConfigurationError, EvaluationError, PipelineFailure};
use crate::invoker::ModelInvoker;
use crate::model::{LanguageModel, ModelParams};
use crate::resilience::LlmUsage;
use crate::stages::{
    bounded, Backend, ContainmentChecker, ExampleProvider, FactClassifier, FactExtractor,
    ModelClassifier, RelevancyFilter, RetrievalOptions, Retriever, RetrieverAdapter, Strategy,
};

/// Stage reached so far and the diagnostics recorded up to it.
#[derive(Default)]
struct Progress {
    stage: Option<Stage>,
    metadata: Metadata,
}

impl Progress {
    fn enter(&mut self, stage: Stage) {
        self.stage = Some(stage);
    }

    fn record(&mut self, stage: Stage, diagnostics: StageDiagnostics) {
        self.metadata.insert(stage, diagnostics);
    }

    fn failure(&self, error: impl Into<EvaluationError>) -> PipelineFailure {
        PipelineFailure::new(
            self.stage.unwrap_or(Stage::Extract),
            error,
            self.metadata.clone(),
        )
    }
}

/// Evaluates the factuality of a response.
///
/// # Architecture
/// - Per-fact work within a stage runs as a bounded stream
///   (`runtime.max_concurrency`) joined before the next stage
/// - Model calls share one [`ModelInvoker`] (cache, circuit breaker,
///   retries, usage accounting)
/// - The config is read-only and shared by every fact
///
/// A pipeline holds no per-run state; one instance can serve many
/// evaluations, sequentially or concurrently.
pub struct EvaluationPipeline {
    config: Arc<Config>,
    categories: Vec<String>,
    max_concurrency: usize,
    extractor: FactExtractor,
    containment: ContainmentChecker,
    relevancy: RelevancyFilter,
    deduplicator: Option<Arc<dyn Deduplicator>>,
    retriever: RetrieverAdapter,
    classifier: Arc<dyn FactClassifier>,
    scorer: FactualityScorer,
    invoker: Option<Arc<ModelInvoker>>,
}

impl EvaluationPipeline {
    pub fn builder(config: Config) -> EvaluationPipelineBuilder {
        EvaluationPipelineBuilder::new(config)
    }

    /// Model-backed pipeline with the default stages.
    pub fn new(
        config: Config,
        model: Arc<dyn LanguageModel>,
        retriever: Arc<dyn Retriever>,
    ) -> Result<Self, ConfigurationError> {
        Self::builder(config).model(model).retriever(retriever).build()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Model usage accumulated across all runs, if a model is attached.
    pub fn usage(&self) -> Option<LlmUsage> {
        self.invoker.as_ref().map(|invoker| invoker.usage())
    }

    /// Evaluate `response`, optionally against the question or topic in
    /// `context`.
    pub async fn run(
        &self,
        response: &str,
        context: Option<&str>,
    ) -> Result<EvaluationResult, PipelineFailure> {
        let progress = Mutex::new(Progress::default());
        self.execute(response, context, &progress).await
    }

    /// Like [`run`](Self::run), but gives up as soon as `cancel` completes.
    ///
    /// In-flight work is dropped; the failure carries the stage that was
    /// running and the diagnostics of the stages before it.
    pub async fn run_until<C>(
        &self,
        response: &str,
        context: Option<&str>,
        cancel: C,
    ) -> Result<EvaluationResult, PipelineFailure>
    where
        C: Future<Output = ()>,
    {
        let progress = Mutex::new(Progress::default());
        tokio::select! {
            biased;
            _ = cancel => {
                let progress = progress.lock();
                tracing::warn!(stage = ?progress.stage, "Evaluation cancelled");
                Err(progress.failure(EvaluationError::Cancelled))
            }
            result = self.execute(response, context, &progress) => result,
        }
    }

    async fn execute(
        &self,
        response: &str,
        context: Option<&str>,
        progress: &Mutex<Progress>,
    ) -> Result<EvaluationResult, PipelineFailure> {
        let context = context.filter(|c| !c.trim().is_empty());
        let span = tracing::info_span!(
            "evaluation",
            response_chars = response.chars().count(),
            has_context = context.is_some()
        );

        async move {
            // Extract
            progress.lock().enter(Stage::Extract);
            let started = Instant::now();
            let mut diag = StageDiagnostics::new(0);
            let facts = match self
                .extractor
                .extract_facts(response, context)
                .instrument(stage_span(Stage::Extract))
                .await
            {
                Ok(facts) => facts,
                Err(e) => {
                    tracing::error!(error = %e, "Fact extraction failed");
                    diag.warn(e.to_string());
                    let mut progress = progress.lock();
                    progress.record(Stage::Extract, finish(diag, started, 0));
                    return Err(progress.failure(e));
                }
            };
            progress
                .lock()
                .record(Stage::Extract, finish(diag, started, facts.len()));

            // CheckContainment
            progress.lock().enter(Stage::CheckContainment);
            let started = Instant::now();
            let mut diag = StageDiagnostics::new(facts.len());
            let facts = self
                .containment
                .check_containment(facts, response, &mut diag)
                .instrument(stage_span(Stage::CheckContainment))
                .await;
            progress
                .lock()
                .record(Stage::CheckContainment, finish(diag, started, facts.len()));

            // SelfContain
            progress.lock().enter(Stage::SelfContain);
            let facts = if facts.iter().all(AtomicFact::is_confirmed_self_contained) {
                progress
                    .lock()
                    .record(Stage::SelfContain, StageDiagnostics::skipped(facts.len()));
                facts
            } else {
                let started = Instant::now();
                let mut diag = StageDiagnostics::new(facts.len());
                let facts = self
                    .containment
                    .self_contain_facts(facts, response, context, &mut diag)
                    .instrument(stage_span(Stage::SelfContain))
                    .await;
                progress
                    .lock()
                    .record(Stage::SelfContain, finish(diag, started, facts.len()));
                facts
            };

            // FilterRelevant
            progress.lock().enter(Stage::FilterRelevant);
            let facts = if context.is_none() {
                progress
                    .lock()
                    .record(Stage::FilterRelevant, StageDiagnostics::skipped(facts.len()));
                facts
            } else {
                let started = Instant::now();
                let mut diag = StageDiagnostics::new(facts.len());
                let facts = self
                    .relevancy
                    .filter_relevant(facts, context, &mut diag)
                    .instrument(stage_span(Stage::FilterRelevant))
                    .await;
                progress
                    .lock()
                    .record(Stage::FilterRelevant, finish(diag, started, facts.len()));
                facts
            };

            // Deduplicate
            progress.lock().enter(Stage::Deduplicate);
            let facts = match &self.deduplicator {
                None => {
                    progress
                        .lock()
                        .record(Stage::Deduplicate, StageDiagnostics::skipped(facts.len()));
                    facts
                }
                Some(deduplicator) => {
                    let _entered = stage_span(Stage::Deduplicate).entered();
                    let started = Instant::now();
                    let mut diag = StageDiagnostics::new(facts.len());
                    let facts = deduplicate(deduplicator.as_ref(), facts, &mut diag);
                    progress
                        .lock()
                        .record(Stage::Deduplicate, finish(diag, started, facts.len()));
                    facts
                }
            };

            // Retrieve
            progress.lock().enter(Stage::Retrieve);
            let started = Instant::now();
            let mut diag = StageDiagnostics::new(facts.len());
            let evidence = self
                .retriever
                .retrieve_all(facts, &mut diag)
                .instrument(stage_span(Stage::Retrieve))
                .await;
            progress
                .lock()
                .record(Stage::Retrieve, finish(diag, started, evidence.len()));

            // Classify
            progress.lock().enter(Stage::Classify);
            let started = Instant::now();
            let mut diag = StageDiagnostics::new(evidence.len());
            let classified = self
                .classify_all(evidence, &mut diag)
                .instrument(stage_span(Stage::Classify))
                .await;
            progress
                .lock()
                .record(Stage::Classify, finish(diag, started, classified.len()));

            // Score
            progress.lock().enter(Stage::Score);
            let started = Instant::now();
            let mut diag = StageDiagnostics::new(classified.len());
            let score = match self.scorer.score(&classified) {
                Ok(score) => score,
                Err(e) => {
                    tracing::error!(error = %e, "Scoring failed");
                    diag.warn(e.to_string());
                    let mut progress = progress.lock();
                    progress.record(Stage::Score, finish(diag, started, 0));
                    return Err(progress.failure(e));
                }
            };
            let metadata = {
                let mut progress = progress.lock();
                progress.record(Stage::Score, finish(diag, started, classified.len()));
                progress.metadata.clone()
            };

            tracing::info!(
                score = %score,
                facts = classified.len(),
                "Evaluation complete"
            );

            Ok(EvaluationResult {
                factuality_score: score,
                classified_facts: classified,
                metadata,
                evaluated_at: Utc::now(),
            })
        }
        .instrument(span)
        .await
    }

    async fn classify_all(
        &self,
        evidence: Vec<(AtomicFact, Vec<safeval_core::RetrievedDocument>)>,
        diagnostics: &mut StageDiagnostics,
    ) -> Vec<ClassifiedFact> {
        let categories = self.categories.as_slice();
        let classifier = self.classifier.as_ref();

        let results = bounded(evidence, self.max_concurrency, move |(fact, documents)| async move {
            let result = classifier.classify(&fact, &documents, categories).await;
            (fact, result)
        })
        .await;

        let mut classified = Vec::with_capacity(results.len());
        for (fact, result) in results {
            match result {
                Ok(c) => classified.push(c),
                Err(e) => {
                    tracing::warn!(fact_id = %fact.id, error = %e, "Excluding unclassified fact from scoring");
                    diagnostics.warn(e.to_string());
                    diagnostics.drop_fact(&fact, e.to_string());
                }
            }
        }
        classified
    }
}

fn stage_span(stage: Stage) -> tracing::Span {
    tracing::info_span!("stage", stage = %stage)
}

fn finish(mut diagnostics: StageDiagnostics, started: Instant, output_count: usize) -> StageDiagnostics {
    diagnostics.output_count = output_count;
    diagnostics.duration_ms = started.elapsed().as_millis() as u64;
    tracing::debug!(
        input = diagnostics.input_count,
        output = diagnostics.output_count,
        duration_ms = diagnostics.duration_ms,
        "Stage finished"
    );
    diagnostics
}

/// Run a deduplicator and record every fact it removed.
fn deduplicate(
    deduplicator: &dyn Deduplicator,
    facts: Vec<AtomicFact>,
    diagnostics: &mut StageDiagnostics,
) -> Vec<AtomicFact> {
    let input = facts.clone();
    let output = deduplicator.deduplicate(facts);

    let mut absorbed_by: HashMap<&FactId, &FactId> = HashMap::new();
    for fact in &output {
        for merged in &fact.merged_from {
            absorbed_by.insert(merged, &fact.id);
        }
    }
    let kept: Vec<&FactId> = output.iter().map(|f| &f.id).collect();

    for fact in input.iter().filter(|f| !kept.contains(&&f.id)) {
        match absorbed_by.get(&fact.id) {
            Some(representative) => {
                tracing::info!(fact_id = %fact.id, merged_into = %representative, "Merged duplicate fact");
                diagnostics.drop_fact(fact, format!("merged into {}", representative));
            }
            None => diagnostics.drop_fact(fact, "removed by deduplicator"),
        }
    }

    output
}

/// Assembles an [`EvaluationPipeline`].
///
/// A retriever is always required. A language model is required unless
/// every stage runs heuristically and a custom classifier is supplied.
pub struct EvaluationPipelineBuilder {
    config: Config,
    model: Option<Arc<dyn LanguageModel>>,
    retriever: Option<Arc<dyn Retriever>>,
    classifier: Option<Arc<dyn FactClassifier>>,
    deduplicator: Option<Arc<dyn Deduplicator>>,
    examples: Option<Arc<dyn ExampleProvider>>,
    extraction: Strategy,
    containment: Strategy,
    relevancy: Strategy,
}

impl EvaluationPipelineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            model: None,
            retriever: None,
            classifier: None,
            deduplicator: None,
            examples: None,
            extraction: Strategy::default(),
            containment: Strategy::default(),
            relevancy: Strategy::default(),
        }
    }

    pub fn model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Replace the model-backed classifier.
    pub fn classifier(mut self, classifier: Arc<dyn FactClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Replace the similarity deduplicator. Ignored when deduplication is
    /// disabled in the config.
    pub fn deduplicator(mut self, deduplicator: Arc<dyn Deduplicator>) -> Self {
        self.deduplicator = Some(deduplicator);
        self
    }

    pub fn example_provider(mut self, provider: Arc<dyn ExampleProvider>) -> Self {
        self.examples = Some(provider);
        self
    }

    pub fn extraction_strategy(mut self, strategy: Strategy) -> Self {
        self.extraction = strategy;
        self
    }

    pub fn containment_strategy(mut self, strategy: Strategy) -> Self {
        self.containment = strategy;
        self
    }

    pub fn relevancy_strategy(mut self, strategy: Strategy) -> Self {
        self.relevancy = strategy;
        self
    }

    /// Run every text stage heuristically.
    pub fn heuristic(self) -> Self {
        self.extraction_strategy(Strategy::Heuristic)
            .containment_strategy(Strategy::Heuristic)
            .relevancy_strategy(Strategy::Heuristic)
    }

    pub fn build(self) -> Result<EvaluationPipeline, ConfigurationError> {
        self.config.validate()?;
        let runtime = RuntimeConfig::from_config(&self.config)?;

        let retriever = self
            .retriever
            .ok_or(ConfigurationError::MissingComponent("retriever"))?;
        let invoker = self
            .model
            .map(|model| Arc::new(ModelInvoker::new(model, &runtime)));
        let params = ModelParams::from_config(&self.config.llm_config);

        let backend = |strategy: Strategy| -> Result<Backend, ConfigurationError> {
            match (strategy, &invoker) {
                (Strategy::Heuristic, _) => Ok(Backend::Heuristic),
                (Strategy::Model, Some(invoker)) => Ok(Backend::Model {
                    invoker: invoker.clone(),
                    params: params.clone(),
                }),
                (Strategy::Model, None) => Err(ConfigurationError::MissingComponent("language model")),
            }
        };

        let mut extractor = FactExtractor::from_backend(backend(self.extraction)?);
        if let Some(examples) = self.examples {
            extractor = extractor.with_examples(examples);
        }
        let containment =
            ContainmentChecker::from_backend(backend(self.containment)?, runtime.max_concurrency);
        let relevancy =
            RelevancyFilter::from_backend(backend(self.relevancy)?, runtime.max_concurrency);

        let classifier: Arc<dyn FactClassifier> = match (self.classifier, &invoker) {
            (Some(classifier), _) => classifier,
            (None, Some(invoker)) => Arc::new(ModelClassifier::from_config(invoker.clone(), &self.config)),
            (None, None) => return Err(ConfigurationError::MissingComponent("language model")),
        };

        let deduplicator = self.config.deduplication.enabled.then(|| {
            self.deduplicator.unwrap_or_else(|| {
                Arc::new(SimilarityDeduplicator::new(
                    self.config.deduplication.similarity_threshold,
                ))
            })
        });

        let retriever = RetrieverAdapter::new(
            retriever,
            RetrievalOptions::from_config(&self.config.retrieval_config),
            runtime.retrieval_timeout,
            runtime.max_concurrency,
        );

        tracing::debug!(
            model = invoker.as_ref().map(|i| i.model_id()),
            max_concurrency = runtime.max_concurrency,
            "Evaluation pipeline built"
        );

        Ok(EvaluationPipeline {
            categories: self.config.evaluation_categories(),
            scorer: FactualityScorer::new(self.config.scoring_rubric.clone()),
            max_concurrency: runtime.max_concurrency,
            config: Arc::new(self.config),
            extractor,
            containment,
            relevancy,
            deduplicator,
            retriever,
            classifier,
            invoker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticRetriever;

    #[test]
    fn test_missing_components() {
        let result = EvaluationPipeline::builder(Config::default()).build();
        assert!(matches!(result, Err(ConfigurationError::MissingComponent("retriever"))));

        let result = EvaluationPipeline::builder(Config::default())
            .retriever(Arc::new(StaticRetriever::new()))
            .heuristic()
            .build();
        assert!(matches!(
            result,
            Err(ConfigurationError::MissingComponent("language model"))
        ));
    }

    #[test]
    fn test_invalid_config_rejected_at_build() {
        let mut config = Config::default();
        config.runtime.call_timeout = "soon".to_string();

        let result = EvaluationPipeline::builder(config)
            .retriever(Arc::new(StaticRetriever::new()))
            .model(Arc::new(crate::testing::ScriptedModel::new()))
            .build();
        assert!(matches!(result, Err(ConfigurationError::InvalidDuration { .. })));
    }

    #[test]
    fn test_dedup_records_merges() {
        let facts = vec![
            AtomicFact::with_id("a", "Everest is tall."),
            AtomicFact::with_id("b", "Everest is very tall."),
            AtomicFact::with_id("c", "Everest is tall"),
        ];
        let keep_first = |mut facts: Vec<AtomicFact>| {
            let rest: Vec<FactId> = facts.drain(1..).map(|f| f.id).collect();
            facts[0].merged_from = rest[..1].to_vec();
            facts
        };

        let mut diag = StageDiagnostics::new(3);
        let out = deduplicate(&keep_first, facts, &mut diag);

        assert_eq!(out.len(), 1);
        assert_eq!(diag.dropped.len(), 2);
        assert_eq!(diag.dropped[0].reason, "merged into a");
        assert_eq!(diag.dropped[1].reason, "removed by deduplicator");
    }
}
