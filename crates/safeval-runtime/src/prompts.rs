//! Prompt templates for the model-backed stages.
//!
//! Each stage has a fixed instruction block followed by the dynamic
//! content (response, fact, documents). Fixed blocks come first so that
//! provider-side prompt caching can reuse them.

use safeval_core::{AtomicFact, RetrievedDocument};

use crate::stages::FewShotExample;

pub const EXTRACTION_PROMPT: &str = r#"Break the text below into atomic facts.

An atomic fact is a short statement that makes exactly one factual claim
and can be checked on its own. Resolve pronouns to the entities they refer
to. Do not add information that is not in the text. Skip opinions,
greetings and questions.

Output one fact per line, with no numbering or commentary. If the text
contains no factual claims, output NONE."#;

pub const CONTAINMENT_PROMPT: &str = r#"Decide whether a fact is self-contained.

A fact is self-contained when a reader who has not seen the original text
can understand exactly what it claims: no unresolved pronouns ("he", "it",
"this"), no references like "the company" or "the former" whose meaning
depends on the text around it.

Answer with only "yes" or "no"."#;

pub const SELF_CONTAIN_PROMPT: &str = r#"Rewrite a fact so that it is self-contained.

Replace pronouns and vague references with the entities they refer to in
the original text. Keep the claim exactly as true or false as it was: do
not add, remove or soften information.

Output only the rewritten fact."#;

pub const RELEVANCY_PROMPT: &str = r#"Decide whether a fact is relevant to the given context.

A fact is relevant when it bears on the question or topic the context
describes.

Answer with only "yes" or "no"."#;

pub const CLASSIFICATION_PROMPT: &str = r#"Classify a fact using the retrieved documents.

Choose exactly one of the available categories. Respond with a JSON object:
{
  "category": "<one of the available categories>",
  "confidence": <number between 0 and 1>,
  "rationale": "<one or two sentences>",
  "evidence": "<exact quote from a document supporting the category, or empty>"
}"#;

pub const STRICT_EVIDENCE_RULES: &str = r#"Use ONLY the retrieved documents. Do not use outside knowledge.
If the documents do not settle the fact, choose "{fallback}".
Any other category requires an "evidence" quote copied verbatim from one of
the documents."#;

pub fn extraction_prompt(
    response: &str,
    context: Option<&str>,
    examples: &[FewShotExample],
) -> String {
    let mut prompt = String::from(EXTRACTION_PROMPT);

    for (i, example) in examples.iter().enumerate() {
        prompt.push_str(&format!("\n\nExample {}:\nText: {}\nFacts:", i + 1, example.text));
        for fact in &example.facts {
            prompt.push('\n');
            prompt.push_str(fact);
        }
    }

    if let Some(context) = context {
        prompt.push_str(&format!("\n\nContext: {}", context));
    }
    prompt.push_str(&format!("\n\nText: {}\n\nFacts:", response));
    prompt
}

pub fn containment_prompt(fact: &AtomicFact, response: &str) -> String {
    format!(
        "{}\n\nOriginal text: {}\n\nFact: {}\n\nSelf-contained?",
        CONTAINMENT_PROMPT, response, fact.text
    )
}

pub fn self_contain_prompt(fact: &AtomicFact, response: &str, context: Option<&str>) -> String {
    let mut prompt = format!("{}\n\nOriginal text: {}", SELF_CONTAIN_PROMPT, response);
    if let Some(context) = context {
        prompt.push_str(&format!("\n\nContext: {}", context));
    }
    prompt.push_str(&format!("\n\nFact: {}\n\nRewritten fact:", fact.text));
    prompt
}

pub fn relevancy_prompt(fact: &AtomicFact, context: &str) -> String {
    format!(
        "{}\n\nContext: {}\n\nFact: {}\n\nRelevant?",
        RELEVANCY_PROMPT, context, fact.text
    )
}

pub fn classification_prompt(
    fact: &AtomicFact,
    documents: &[RetrievedDocument],
    categories: &[String],
    strict_fallback: Option<&str>,
) -> String {
    let mut prompt = String::from(CLASSIFICATION_PROMPT);

    if let Some(fallback) = strict_fallback {
        prompt.push_str("\n\n");
        prompt.push_str(&STRICT_EVIDENCE_RULES.replace("{fallback}", fallback));
    }

    prompt.push_str(&format!("\n\nAvailable categories: {}", categories.join(", ")));
    prompt.push_str(&format!("\n\nFact: {}", fact.text));

    if documents.is_empty() {
        prompt.push_str("\n\nRetrieved documents: none");
    } else {
        prompt.push_str("\n\nRetrieved documents:");
        for (i, doc) in documents.iter().enumerate() {
            prompt.push_str(&format!("\n\nDocument {} ({}): {}", i + 1, doc.source_id, doc.content));
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_prompt_includes_examples() {
        let examples = vec![FewShotExample {
            text: "Paris, the capital of France, hosts the Louvre.".to_string(),
            facts: vec![
                "Paris is the capital of France.".to_string(),
                "Paris hosts the Louvre.".to_string(),
            ],
        }];

        let prompt = extraction_prompt("Everest is tall.", Some("Geography quiz"), &examples);

        assert!(prompt.starts_with(EXTRACTION_PROMPT));
        assert!(prompt.contains("Example 1:"));
        assert!(prompt.contains("Paris hosts the Louvre."));
        assert!(prompt.contains("Context: Geography quiz"));
        assert!(prompt.ends_with("Text: Everest is tall.\n\nFacts:"));
    }

    #[test]
    fn test_strict_classification_prompt() {
        let fact = AtomicFact::with_id("f1", "Everest is 8,849 m tall.");
        let categories = vec!["supported".to_string(), "unverifiable".to_string()];

        let relaxed = classification_prompt(&fact, &[], &categories, None);
        let strict = classification_prompt(&fact, &[], &categories, Some("unverifiable"));

        assert!(!relaxed.contains("outside knowledge"));
        assert!(strict.contains("choose \"unverifiable\""));
        assert!(strict.contains("Available categories: supported, unverifiable"));
        assert!(strict.contains("Retrieved documents: none"));
    }
}
