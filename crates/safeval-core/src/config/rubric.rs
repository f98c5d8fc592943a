//! Ordered category → weight mapping.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Scoring rubric: the canonical category set and each category's weight.
///
/// Keys keep their insertion order, which is also the presentation order
/// of `evaluation_categories`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoringRubric {
    entries: Vec<(String, f64)>,
}

impl ScoringRubric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a category weight. Replacing keeps the original position.
    pub fn insert(&mut self, category: impl Into<String>, weight: f64) {
        let category = category.into();
        match self.entries.iter_mut().find(|(name, _)| *name == category) {
            Some(entry) => entry.1 = weight,
            None => self.entries.push((category, weight)),
        }
    }

    pub fn with(mut self, category: impl Into<String>, weight: f64) -> Self {
        self.insert(category, weight);
        self
    }

    /// Weight for a category, if it is part of the rubric.
    pub fn weight(&self, category: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(name, _)| name == category)
            .map(|(_, weight)| *weight)
    }

    pub fn contains(&self, category: &str) -> bool {
        self.weight(category).is_some()
    }

    /// Category names in insertion order.
    pub fn categories(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(name, weight)| (name.as_str(), *weight))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for ScoringRubric {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut rubric = ScoringRubric::new();
        for (category, weight) in iter {
            rubric.insert(category, weight);
        }
        rubric
    }
}

impl Serialize for ScoringRubric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, weight) in &self.entries {
            map.serialize_entry(name, weight)?;
        }
        map.end()
    }
}

struct RubricVisitor;

impl<'de> Visitor<'de> for RubricVisitor {
    type Value = ScoringRubric;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a mapping of category name to numeric weight")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut rubric = ScoringRubric::new();
        while let Some((category, weight)) = access.next_entry::<String, f64>()? {
            if rubric.contains(&category) {
                return Err(serde::de::Error::custom(format!(
                    "duplicate rubric category '{}'",
                    category
                )));
            }
            rubric.entries.push((category, weight));
        }
        Ok(rubric)
    }
}

impl<'de> Deserialize<'de> for ScoringRubric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RubricVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_order_is_preserved() {
        let rubric: ScoringRubric = serde_yaml::from_str(
            "unverifiable: 0.5\nsupported: 1.0\ncontradicted: 0.0\n",
        )
        .unwrap();

        assert_eq!(
            rubric.categories(),
            vec!["unverifiable", "supported", "contradicted"]
        );
        assert_eq!(rubric.weight("supported"), Some(1.0));
        assert_eq!(rubric.weight("missing"), None);
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let rubric = ScoringRubric::new()
            .with("supported", 1.0)
            .with("contradicted", 0.0)
            .with("supported", 0.9);

        assert_eq!(rubric.len(), 2);
        assert_eq!(rubric.categories()[0], "supported");
        assert_eq!(rubric.weight("supported"), Some(0.9));
    }

    #[test]
    fn test_round_trips_through_json() {
        let rubric: ScoringRubric = [("b", 0.0), ("a", 1.0)].into_iter().collect();
        let json = serde_json::to_string(&rubric).unwrap();
        assert_eq!(json, r#"{"b":0.0,"a":1.0}"#);
    }
}
