//! Rubric-weighted factuality scoring.

use thiserror::Error;

use crate::config::ScoringRubric;
use crate::types::{ClassifiedFact, FactId, FactualityScore};

/// Errors from scoring.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    #[error("Category '{category}' of fact {fact_id} is not in the scoring rubric")]
    UnknownCategory { category: String, fact_id: FactId },
}

/// Aggregates classified facts into a single score.
///
/// The score is the arithmetic mean of each fact's category weight. With
/// no facts the mean is undefined and the result is `NoEvaluableFacts`.
#[derive(Debug, Clone)]
pub struct FactualityScorer {
    rubric: ScoringRubric,
}

impl FactualityScorer {
    pub fn new(rubric: ScoringRubric) -> Self {
        Self { rubric }
    }

    pub fn rubric(&self) -> &ScoringRubric {
        &self.rubric
    }

    /// Score classified facts against the rubric.
    ///
    /// Any category missing from the rubric fails the whole computation.
    pub fn score(&self, facts: &[ClassifiedFact]) -> Result<FactualityScore, ScoringError> {
        if facts.is_empty() {
            return Ok(FactualityScore::NoEvaluableFacts);
        }

        let mut total = 0.0;
        for classified in facts {
            let weight = self.rubric.weight(&classified.category).ok_or_else(|| {
                ScoringError::UnknownCategory {
                    category: classified.category.clone(),
                    fact_id: classified.fact.id.clone(),
                }
            })?;
            total += weight;
        }

        Ok(FactualityScore::Score(total / facts.len() as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AtomicFact;
    use proptest::prelude::*;

    fn classified(category: &str) -> ClassifiedFact {
        ClassifiedFact {
            fact: AtomicFact::new("claim"),
            documents: Vec::new(),
            category: category.to_string(),
            rationale: None,
            confidence: None,
        }
    }

    fn rubric() -> ScoringRubric {
        ScoringRubric::new()
            .with("supported", 1.0)
            .with("contradicted", 0.0)
            .with("unverifiable", 0.5)
    }

    #[test]
    fn test_mean_of_weights() {
        let scorer = FactualityScorer::new(rubric());
        let score = scorer
            .score(&[classified("supported"), classified("contradicted")])
            .unwrap();
        assert_eq!(score, FactualityScore::Score(0.5));
    }

    #[test]
    fn test_one_of_each_category_is_exactly_half() {
        let scorer = FactualityScorer::new(rubric());
        let score = scorer
            .score(&[
                classified("supported"),
                classified("contradicted"),
                classified("unverifiable"),
            ])
            .unwrap();
        assert_eq!(score, FactualityScore::Score(0.5));
    }

    #[test]
    fn test_empty_is_not_evaluable() {
        let scorer = FactualityScorer::new(rubric());
        assert_eq!(scorer.score(&[]).unwrap(), FactualityScore::NoEvaluableFacts);
    }

    #[test]
    fn test_unknown_category_fails() {
        let scorer = FactualityScorer::new(rubric());
        let err = scorer
            .score(&[classified("supported"), classified("maybe")])
            .unwrap_err();
        assert!(matches!(
            err,
            ScoringError::UnknownCategory { ref category, .. } if category == "maybe"
        ));
    }

    proptest! {
        #[test]
        fn prop_score_within_weight_bounds(picks in prop::collection::vec(0usize..3, 1..30)) {
            let categories = ["supported", "contradicted", "unverifiable"];
            let facts: Vec<ClassifiedFact> =
                picks.iter().map(|&i| classified(categories[i])).collect();

            let score = FactualityScorer::new(rubric()).score(&facts).unwrap();
            let value = score.value().unwrap();
            prop_assert!((0.0..=1.0).contains(&value));
        }
    }
}
