//! Parsing of free-text model output.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

lazy_static! {
    /// Leading list markers: "- ", "* ", "• ", "1. ", "2) ", "(3) "
    static ref LIST_MARKER: Regex = Regex::new(r"^\s*(?:[-*•]+|\(?\d+[.)])\s+").unwrap();

    static ref CODE_FENCE: Regex = Regex::new(r"(?s)^```[a-zA-Z]*\s*(.*?)\s*```$").unwrap();
}

/// The first `{` to the last `}`, if any.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn strip_code_fence(text: &str) -> &str {
    CODE_FENCE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map_or(text, |m| m.as_str())
}

/// Parse an extraction reply into fact texts.
///
/// Accepts one fact per line (list markers stripped), a JSON array of
/// strings, or `NONE` for no facts. Empty output is an error.
pub fn parse_fact_list(output: &str) -> Result<Vec<String>, String> {
    let text = strip_code_fence(output.trim()).trim();
    if text.is_empty() {
        return Err("model returned empty output".to_string());
    }

    if is_none_sentinel(text) {
        return Ok(Vec::new());
    }

    if text.starts_with('[') {
        let items: Vec<String> = serde_json::from_str(text)
            .map_err(|e| format!("malformed JSON fact list: {}", e))?;
        return Ok(items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect());
    }

    let facts: Vec<String> = text
        .lines()
        .map(|line| LIST_MARKER.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty() && !is_header(line))
        .collect();

    if facts.is_empty() {
        return Err(format!("no facts found in output: {:?}", output));
    }
    Ok(facts)
}

fn is_none_sentinel(text: &str) -> bool {
    text.trim_end_matches('.').eq_ignore_ascii_case("none")
}

fn is_header(line: &str) -> bool {
    matches!(
        line.to_ascii_lowercase().as_str(),
        "facts:" | "atomic facts:" | "facts" | "atomic facts"
    )
}

/// Parse a yes/no judgment. `None` when the answer is neither.
pub fn parse_yes_no(output: &str) -> Option<bool> {
    let first = output
        .split_whitespace()
        .next()?
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_ascii_lowercase();

    match first.as_str() {
        "yes" | "y" | "true" => Some(true),
        "no" | "n" | "false" => Some(false),
        _ => None,
    }
}

/// Structured classifier reply.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClassificationReply {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub evidence: Option<String>,
}

/// Parse a classifier reply.
///
/// JSON objects are read field by field and must name a category; anything
/// else is taken as a bare verdict. Empty output is an error.
pub fn parse_classification(output: &str) -> Result<ClassificationReply, String> {
    let text = output.trim();
    if text.is_empty() {
        return Err("model returned empty output".to_string());
    }

    if let Some(json) = extract_json(text) {
        if let Ok(reply) = serde_json::from_str::<ClassificationReply>(json) {
            if reply.category.trim().is_empty() {
                return Err("classification object has no category".to_string());
            }
            return Ok(ClassificationReply {
                confidence: reply.confidence.map(|c| c.clamp(0.0, 1.0)),
                ..reply
            });
        }
    }

    Ok(ClassificationReply {
        category: text.to_string(),
        ..Default::default()
    })
}
