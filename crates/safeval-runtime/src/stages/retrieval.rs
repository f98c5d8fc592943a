//! Evidence retrieval.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use safeval_core::config::RetrievalConfig;
use safeval_core::heuristics::keywords;
use safeval_core::{AtomicFact, RetrievedDocument, StageDiagnostics};

use super::bounded;
use crate::error::RetrievalError;

/// Options handed to a [`Retriever`] on every call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub min_relevance: Option<f64>,

    /// Backend-specific keyword options
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self::from_config(&RetrievalConfig::default())
    }
}

impl RetrievalOptions {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            min_relevance: config.min_relevance,
            extra: config.extra.clone(),
        }
    }
}

/// Fetches evidence for a single fact, best match first.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(
        &self,
        fact: &AtomicFact,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError>;
}

/// Runs a [`Retriever`] once per fact with a timeout, `min_relevance`
/// filtering and `top_k` truncation.
///
/// A failed retrieval leaves the fact with no evidence; it is never fatal.
#[derive(Clone)]
pub struct RetrieverAdapter {
    retriever: Arc<dyn Retriever>,
    options: RetrievalOptions,
    timeout: Duration,
    max_concurrency: usize,
}

impl RetrieverAdapter {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        options: RetrievalOptions,
        timeout: Duration,
        max_concurrency: usize,
    ) -> Self {
        Self {
            retriever,
            options,
            timeout,
            max_concurrency,
        }
    }

    pub fn options(&self) -> &RetrievalOptions {
        &self.options
    }

    /// Retrieve evidence for one fact.
    ///
    /// Documents are re-stamped with the fact's id. Documents without a
    /// relevance score survive the `min_relevance` filter.
    pub async fn retrieve_one(
        &self,
        fact: &AtomicFact,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        let documents = tokio::time::timeout(self.timeout, self.retriever.retrieve(fact, &self.options))
            .await
            .map_err(|_| RetrievalError::Timeout(self.timeout))??;

        Ok(documents
            .into_iter()
            .filter(|doc| match (self.options.min_relevance, doc.relevance_score) {
                (Some(min), Some(score)) => score >= min,
                _ => true,
            })
            .take(self.options.top_k)
            .map(|doc| RetrievedDocument {
                fact_id: fact.id.clone(),
                ..doc
            })
            .collect())
    }

    /// Retrieve evidence for every fact, preserving order.
    pub async fn retrieve_all(
        &self,
        facts: Vec<AtomicFact>,
        diagnostics: &mut StageDiagnostics,
    ) -> Vec<(AtomicFact, Vec<RetrievedDocument>)> {
        let results = bounded(facts, self.max_concurrency, move |fact| async move {
            let result = self.retrieve_one(&fact).await;
            (fact, result)
        })
        .await;

        results
            .into_iter()
            .map(|(fact, result)| match result {
                Ok(documents) => {
                    tracing::debug!(fact_id = %fact.id, documents = documents.len(), "Retrieved evidence");
                    (fact, documents)
                }
                Err(e) => {
                    tracing::warn!(fact_id = %fact.id, error = %e, "Retrieval failed, continuing without evidence");
                    diagnostics.warn(format!("Retrieval failed for fact {}: {}", fact.id, e));
                    (fact, Vec::new())
                }
            })
            .collect()
    }
}

/// Keyword retriever over an in-memory knowledge base.
///
/// Relevance is the fraction of the fact's keywords that occur in an
/// entry's key or content. Entries with no overlap are never returned.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBaseRetriever {
    entries: Vec<(String, String)>,
}

impl KnowledgeBaseRetriever {
    pub fn new(entries: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(key, content)| (key.into(), content.into()))
                .collect(),
        }
    }

    /// Load a JSON object mapping entry keys to content.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RetrievalError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RetrievalError::Backend(format!("{}: {}", path.display(), e)))?;
        let entries: BTreeMap<String, String> = serde_json::from_str(&raw)
            .map_err(|e| RetrievalError::Backend(format!("{}: {}", path.display(), e)))?;
        Ok(Self::new(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn relevance(terms: &[String], key: &str, content: &str) -> f64 {
        if terms.is_empty() {
            return 0.0;
        }
        let haystack = format!("{} {}", key, content).to_lowercase();
        let found = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
        found as f64 / terms.len() as f64
    }
}

#[async_trait]
impl Retriever for KnowledgeBaseRetriever {
    async fn retrieve(
        &self,
        fact: &AtomicFact,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        let terms: Vec<String> = keywords(&fact.text).into_iter().collect();

        let mut scored: Vec<(f64, &str, &str)> = self
            .entries
            .iter()
            .map(|(key, content)| (Self::relevance(&terms, key, content), key.as_str(), content.as_str()))
            .filter(|(relevance, _, _)| *relevance > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(options.top_k);

        Ok(scored
            .into_iter()
            .map(|(relevance, key, content)| {
                RetrievedDocument::new(fact.id.clone(), key, content).with_relevance(relevance)
            })
            .collect())
    }
}
