//! Mapping free-form model verdicts onto rubric categories.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::similarity::similarity_ratio;

lazy_static! {
    /// Words that flip the meaning of a category named right after them
    static ref NEGATION: Regex = Regex::new(
        r"^(?:not|no|never|neither|nor|un|non|cannot|cant|can't|isn't|isnt|aren't|arent|wasn't|wasnt|weren't|werent|doesn't|doesnt|don't|dont|hardly|without)$"
    ).unwrap();
}

/// Words inspected in front of a mention for a negation.
const NEGATION_WINDOW: usize = 3;

/// How a verdict was mapped onto a category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryMatch {
    /// Verdict equals the category after normalization
    Exact,
    /// Verdict mentions exactly one category as a whole word
    Mentioned,
    /// Closest category by similarity ratio
    Closest(f64),
    /// Nothing matched; the configured fallback was used
    Fallback,
}

/// Resolves a model's verdict to one of the configured categories.
///
/// Policy, first hit wins:
/// 1. normalized exact match
/// 2. exactly one category mentioned as a whole word, not negated
/// 3. most similar category, if at least `min_similarity` and the verdict
///    carries no negation the category lacks
/// 4. the fallback category, if configured
#[derive(Debug, Clone)]
pub struct CategoryResolver {
    categories: Vec<String>,
    normalized: Vec<String>,
    mention_patterns: Vec<Option<Regex>>,
    min_similarity: f64,
    fallback: Option<String>,
}

impl CategoryResolver {
    pub fn new(categories: Vec<String>, min_similarity: f64, fallback: Option<String>) -> Self {
        let normalized: Vec<String> = categories.iter().map(|c| normalize(c)).collect();
        let mention_patterns = normalized
            .iter()
            .map(|c| Regex::new(&format!(r"\b{}\b", regex::escape(c))).ok())
            .collect();

        Self {
            categories,
            normalized,
            mention_patterns,
            min_similarity,
            fallback,
        }
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn fallback(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    pub fn min_similarity(&self) -> f64 {
        self.min_similarity
    }

    /// Map a verdict onto a category, or `None` when the policy is exhausted.
    pub fn resolve(&self, verdict: &str) -> Option<(String, CategoryMatch)> {
        let answer = normalize(verdict);

        if let Some(i) = self.normalized.iter().position(|c| *c == answer) {
            return Some((self.categories[i].clone(), CategoryMatch::Exact));
        }

        let mentioned: Vec<usize> = self
            .mention_patterns
            .iter()
            .enumerate()
            .filter_map(|(i, pattern)| pattern.as_ref().map(|p| (i, p)))
            .filter(|(_, pattern)| {
                pattern
                    .find_iter(&answer)
                    .any(|m| !negated_before(&answer[..m.start()]))
            })
            .map(|(i, _)| i)
            .collect();
        if let [only] = mentioned.as_slice() {
            return Some((self.categories[*only].clone(), CategoryMatch::Mentioned));
        }

        let mut best: Option<(usize, f64)> = None;
        for (i, category) in self.normalized.iter().enumerate() {
            if has_foreign_negation(&answer, category) {
                continue;
            }
            let ratio = similarity_ratio(&answer, category);
            if best.map_or(true, |(_, top)| ratio > top) {
                best = Some((i, ratio));
            }
        }
        if let Some((i, ratio)) = best {
            if ratio >= self.min_similarity {
                return Some((self.categories[i].clone(), CategoryMatch::Closest(ratio)));
            }
        }

        self.fallback
            .clone()
            .map(|category| (category, CategoryMatch::Fallback))
    }
}

/// Whether one of the last few words of `prefix` is a negation.
fn negated_before(prefix: &str) -> bool {
    prefix
        .split_whitespace()
        .rev()
        .take(NEGATION_WINDOW)
        .any(is_negation)
}

/// Whether `answer` negates something that `category` itself does not.
fn has_foreign_negation(answer: &str, category: &str) -> bool {
    answer
        .split_whitespace()
        .filter(|word| is_negation(word))
        .any(|word| !category.split_whitespace().any(|c| c == bare(word)))
}

fn is_negation(word: &str) -> bool {
    NEGATION.is_match(bare(word))
}

fn bare(word: &str) -> &str {
    word.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
}

/// Lowercase, strip surrounding punctuation, treat `_` and `-` as spaces,
/// collapse whitespace.
fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase().replace(['_', '-'], " ");
    let trimmed = lowered.trim_matches(|c: char| !c.is_alphanumeric());
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}
