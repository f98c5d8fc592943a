//! Deterministic text heuristics.
//!
//! These back the model-free stage variants and the span locator used by
//! extraction.

use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};
use std::collections::BTreeSet;

lazy_static! {
    /// Sentence boundary: terminal punctuation followed by whitespace
    static ref SENTENCE_END: Regex = Regex::new(r"[.!?]+(\s+|$)").unwrap();

    /// Word tokens (letters, digits, inner apostrophes and commas in numbers)
    static ref WORD: Regex = Regex::new(r"[\p{L}\p{N}]+(?:['’,.][\p{L}\p{N}]+)*").unwrap();

    /// References that only make sense with surrounding text
    static ref DANGLING_REFERENCE: Regex = Regex::new(
        r"(?i)\b(he|she|it|they|him|her|them|his|hers|its|their|theirs|this|that|these|those|the former|the latter)\b"
    ).unwrap();

    /// Subject pronoun or demonstrative opening a sentence
    static ref LEADING_REFERENCE: Regex = Regex::new(
        r"^(?i)(he|she|it|they|this|that|these|those)\b\s*"
    ).unwrap();

    /// First auxiliary or common verb; the words before it form the subject
    static ref SUBJECT_END: Regex = Regex::new(
        r"(?i)\b(is|was|are|were|has|had|have|will|can|did|does|became|lies|stands|reaches)\b"
    ).unwrap();

    static ref STOPWORDS: BTreeSet<&'static str> = [
        "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "for", "from",
        "has", "have", "he", "her", "his", "in", "is", "it", "its", "of", "on", "or",
        "she", "that", "the", "their", "them", "they", "this", "to", "was", "were",
        "which", "who", "will", "with", "what", "when", "where", "how", "about", "than",
        "then", "there", "these", "those", "into", "also", "not", "can", "does", "did",
    ]
    .into_iter()
    .collect();
}

/// Split text into trimmed, non-empty sentences.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for boundary in SENTENCE_END.find_iter(text) {
        let sentence = text[start..boundary.end()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        start = boundary.end();
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }

    sentences
}

/// Lowercased word tokens.
pub fn words(text: &str) -> Vec<String> {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Content words: lowercased, longer than two characters, stopwords removed.
pub fn keywords(text: &str) -> BTreeSet<String> {
    words(text)
        .into_iter()
        .filter(|w| w.chars().count() > 2 && !STOPWORDS.contains(w.as_str()))
        .collect()
}

/// Whether the text leans on a pronoun or demonstrative it does not resolve.
pub fn has_dangling_reference(text: &str) -> bool {
    DANGLING_REFERENCE.is_match(text)
}

/// Replace a leading pronoun with the subject of an earlier sentence.
///
/// Looks for the nearest sentence before the one containing the fact (or
/// the last sentence, if the fact is not found) whose subject is not itself
/// a pronoun, and substitutes that subject. `None` when the fact does not
/// start with a pronoun or no subject can be found.
pub fn resolve_leading_reference(fact: &str, response: &str) -> Option<String> {
    let reference = LEADING_REFERENCE.find(fact.trim_start())?;
    let rest = &fact.trim_start()[reference.end()..];

    let sentences = split_sentences(response);
    let fact_keywords = keywords(fact);
    let position = sentences
        .iter()
        .position(|s| !fact_keywords.is_empty() && keywords(s).is_superset(&fact_keywords))
        .unwrap_or(sentences.len());

    sentences[..position]
        .iter()
        .rev()
        .find_map(|sentence| sentence_subject(sentence))
        .map(|subject| format!("{} {}", subject, rest))
}

fn sentence_subject(sentence: &str) -> Option<&str> {
    if LEADING_REFERENCE.is_match(sentence) {
        return None;
    }
    let end = SUBJECT_END.find(sentence)?.start();
    let subject = sentence[..end].trim();
    (!subject.is_empty()).then_some(subject)
}

/// Fraction of `query`'s keywords found in `text`, in `0.0..=1.0`.
///
/// Zero when `query` has no keywords.
pub fn keyword_overlap(query: &str, text: &str) -> f64 {
    let query_terms = keywords(query);
    if query_terms.is_empty() {
        return 0.0;
    }
    let text_terms = keywords(text);
    let found = query_terms.intersection(&text_terms).count();
    found as f64 / query_terms.len() as f64
}

/// Locate the part of `response` a fact was taken from.
///
/// A verbatim (case-insensitive) occurrence wins; otherwise the sentence
/// with the highest keyword overlap. `None` when nothing overlaps.
pub fn locate_span(fact: &str, response: &str) -> Option<String> {
    let needle = fact.trim().trim_end_matches(['.', '!', '?']);
    if needle.is_empty() {
        return None;
    }

    let verbatim = RegexBuilder::new(&regex::escape(needle))
        .case_insensitive(true)
        .build()
        .ok()
        .and_then(|pattern| pattern.find(response));
    if let Some(found) = verbatim {
        return Some(found.as_str().to_string());
    }

    let mut best: Option<(f64, String)> = None;
    for sentence in split_sentences(response) {
        let overlap = keyword_overlap(fact, &sentence);
        if overlap > 0.0 && best.as_ref().map_or(true, |(top, _)| overlap > *top) {
            best = Some((overlap, sentence));
        }
    }
    best.map(|(_, sentence)| sentence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sentences() {
        let sentences = split_sentences(
            "Mount Everest is the tallest mountain. It is 8,849 meters high! Is it? yes",
        );
        assert_eq!(
            sentences,
            vec![
                "Mount Everest is the tallest mountain.",
                "It is 8,849 meters high!",
                "Is it?",
                "yes",
            ]
        );
    }

    #[test]
    fn test_numbers_stay_whole() {
        assert_eq!(words("Height: 8,849.86 m"), vec!["height", "8,849.86", "m"]);
    }

    #[test]
    fn test_keywords_drop_stopwords() {
        let kw = keywords("The capital of France is Paris");
        assert_eq!(
            kw.into_iter().collect::<Vec<_>>(),
            vec!["capital", "france", "paris"]
        );
    }

    #[test]
    fn test_dangling_reference() {
        assert!(has_dangling_reference("It was completed in 1889."));
        assert!(has_dangling_reference("This makes the tower famous."));
        assert!(!has_dangling_reference("The Eiffel Tower was completed in 1889."));
        assert!(!has_dangling_reference("Italy borders Switzerland."));
    }

    #[test]
    fn test_resolve_leading_reference() {
        let response = "Mount Everest is the tallest mountain. It is 8,849 meters high. \
                        It lies in the Himalayas.";

        assert_eq!(
            resolve_leading_reference("It is 8,849 meters high.", response).as_deref(),
            Some("Mount Everest is 8,849 meters high.")
        );
        assert_eq!(
            resolve_leading_reference("It lies in the Himalayas.", response).as_deref(),
            Some("Mount Everest lies in the Himalayas.")
        );
        assert_eq!(resolve_leading_reference("Everest is tall.", response), None);
        assert_eq!(resolve_leading_reference("It is tall.", "It is tall."), None);
    }

    #[test]
    fn test_keyword_overlap() {
        assert_eq!(keyword_overlap("Paris capital", "Paris is the capital"), 1.0);
        assert_eq!(keyword_overlap("Paris capital", "Berlin capital"), 0.5);
        assert_eq!(keyword_overlap("the of", "anything"), 0.0);
    }

    #[test]
    fn test_locate_span_verbatim() {
        let response = "Mount Everest is the tallest mountain on Earth. It is in Nepal.";
        assert_eq!(
            locate_span("mount everest is the tallest mountain on earth.", response).as_deref(),
            Some("Mount Everest is the tallest mountain on Earth")
        );
    }

    #[test]
    fn test_locate_span_after_case_shifting_chars() {
        let response = "\u{130}\u{130} Everest is tall \u{212A}";
        assert_eq!(
            locate_span("Everest is tall", response).as_deref(),
            Some("Everest is tall")
        );
        assert_eq!(
            locate_span("everest is TALL.", "\u{212A}elvin noted: Everest is tall.").as_deref(),
            Some("Everest is tall")
        );
    }

    #[test]
    fn test_locate_span_best_sentence() {
        let response = "Everest lies in the Himalayas. Its summit is 8,849 meters above sea level.";
        assert_eq!(
            locate_span("Mount Everest's summit is 8,849 meters high", response).as_deref(),
            Some("Its summit is 8,849 meters above sea level.")
        );
        assert_eq!(locate_span("Quantum chromodynamics", response), None);
    }
}
