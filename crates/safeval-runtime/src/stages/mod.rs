//! Pipeline stages.
//!
//! Each stage works on the facts it is handed and returns the survivors.
//! Per-fact work runs as a bounded stream and is joined before the stage
//! returns; output order always matches input order.

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;

use crate::invoker::ModelInvoker;
use crate::model::ModelParams;

mod classifier;
mod containment;
mod extractor;
mod relevancy;
mod retrieval;

pub use classifier::{FactClassifier, ModelClassifier};
pub use containment::ContainmentChecker;
pub use extractor::{ExampleProvider, FactExtractor, FewShotExample};
pub use relevancy::RelevancyFilter;
pub use retrieval::{
    KnowledgeBaseRetriever, RetrievalOptions, Retriever, RetrieverAdapter,
};

/// How a stage makes its judgments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strategy {
    /// Ask the language model
    #[default]
    Model,
    /// Deterministic text heuristics, no model calls
    Heuristic,
}

/// Resolved backend of a stage.
#[derive(Clone)]
pub(crate) enum Backend {
    Model {
        invoker: Arc<ModelInvoker>,
        params: ModelParams,
    },
    Heuristic,
}

/// Run `f` over `items` with at most `limit` futures in flight.
pub(crate) async fn bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, f: F) -> Vec<R>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = R>,
{
    stream::iter(items)
        .map(f)
        .buffered(limit.max(1))
        .collect()
        .await
}
