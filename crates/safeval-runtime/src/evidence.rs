//! Evidence checks for strict classification.
//!
//! In strict mode a verdict other than the fallback must quote one of the
//! retrieved documents. A quote that cannot be found means the verdict is
//! not grounded, and the classifier falls back; it never guesses.

use thiserror::Error;

use safeval_core::RetrievedDocument;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvidenceError {
    #[error("Verdict cites no evidence")]
    MissingQuote,

    #[error("Quote not found in any retrieved document: '{quote}'")]
    QuoteNotFound { quote: String },

    #[error("No documents to cite")]
    NoDocuments,
}

/// Checks model-cited quotes against the documents a fact was judged on.
pub struct EvidenceValidator<'a> {
    documents: &'a [RetrievedDocument],
    normalized: Vec<String>,
}

impl<'a> EvidenceValidator<'a> {
    pub fn new(documents: &'a [RetrievedDocument]) -> Self {
        let normalized = documents
            .iter()
            .map(|d| normalize_whitespace(&d.content).to_lowercase())
            .collect();
        Self {
            documents,
            normalized,
        }
    }

    /// Find the document a quote was taken from.
    ///
    /// Comparison ignores case and runs of whitespace, and tolerates
    /// surrounding quotation marks and a trailing ellipsis.
    pub fn locate(&self, quote: Option<&str>) -> Result<&'a RetrievedDocument, EvidenceError> {
        if self.documents.is_empty() {
            return Err(EvidenceError::NoDocuments);
        }

        let raw = quote.map(str::trim).unwrap_or_default();
        let cleaned = raw
            .trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”'))
            .trim_end_matches("...")
            .trim_end_matches('…')
            .trim();
        if cleaned.is_empty() {
            return Err(EvidenceError::MissingQuote);
        }

        let needle = normalize_whitespace(cleaned).to_lowercase();
        self.normalized
            .iter()
            .position(|content| content.contains(&needle))
            .map(|i| &self.documents[i])
            .ok_or_else(|| EvidenceError::QuoteNotFound {
                quote: raw.to_string(),
            })
    }
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
