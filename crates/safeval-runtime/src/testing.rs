//! Deterministic stand-ins for the model and retrieval capabilities.
//!
//! Both match on substrings: the first rule whose pattern occurs in the
//! prompt (or fact text) decides the reply.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use safeval_core::{AtomicFact, RetrievedDocument};

use crate::error::{ModelError, RetrievalError};
use crate::model::{LanguageModel, ModelParams};
use crate::stages::{RetrievalOptions, Retriever};

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

/// A [`LanguageModel`] that answers from a script.
///
/// Clones share the call counter and prompt log.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    rules: Vec<(String, Reply)>,
    default_reply: Option<String>,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `response` to prompts containing `pattern`.
    pub fn on(mut self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push((pattern.into(), Reply::Text(response.into())));
        self
    }

    /// Fail prompts containing `pattern`.
    pub fn fail_on(mut self, pattern: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push((pattern.into(), Reply::Fail(message.into())));
        self
    }

    /// Reply for prompts no rule matches. Without one, they fail.
    pub fn otherwise(mut self, response: impl Into<String>) -> Self {
        self.default_reply = Some(response.into());
        self
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, prompt: &str, _params: &ModelParams) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());

        let reply = self
            .rules
            .iter()
            .find(|(pattern, _)| prompt.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone());

        match (reply, &self.default_reply) {
            (Some(Reply::Text(text)), _) => Ok(text),
            (Some(Reply::Fail(message)), _) => Err(ModelError::Failed(message)),
            (None, Some(text)) => Ok(text.clone()),
            (None, None) => Err(ModelError::Failed("no scripted reply for prompt".to_string())),
        }
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

/// A [`Retriever`] serving fixed documents keyed by fact-text substrings.
#[derive(Debug, Clone, Default)]
pub struct StaticRetriever {
    documents: Vec<(String, String, String)>,
    failing: Vec<String>,
}

impl StaticRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a document to facts whose text contains `pattern`.
    pub fn with_document(
        mut self,
        pattern: impl Into<String>,
        source_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.documents
            .push((pattern.into(), source_id.into(), content.into()));
        self
    }

    /// Fail retrieval for facts whose text contains `pattern`.
    pub fn failing_on(mut self, pattern: impl Into<String>) -> Self {
        self.failing.push(pattern.into());
        self
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(
        &self,
        fact: &AtomicFact,
        _options: &RetrievalOptions,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        if let Some(pattern) = self.failing.iter().find(|p| fact.text.contains(p.as_str())) {
            return Err(RetrievalError::Backend(format!(
                "scripted failure for '{}'",
                pattern
            )));
        }

        Ok(self
            .documents
            .iter()
            .filter(|(pattern, _, _)| fact.text.contains(pattern.as_str()))
            .map(|(_, source_id, content)| {
                RetrievedDocument::new(fact.id.clone(), source_id.clone(), content.clone())
            })
            .collect())
    }
}
