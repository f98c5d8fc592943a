//! Near-duplicate fact merging.

use crate::similarity::similarity_ratio;
use crate::types::AtomicFact;

/// Collapses near-duplicate facts.
///
/// Any total function over a fact list qualifies; closures implement this
/// trait directly.
pub trait Deduplicator: Send + Sync {
    fn deduplicate(&self, facts: Vec<AtomicFact>) -> Vec<AtomicFact>;
}

impl<F> Deduplicator for F
where
    F: Fn(Vec<AtomicFact>) -> Vec<AtomicFact> + Send + Sync,
{
    fn deduplicate(&self, facts: Vec<AtomicFact>) -> Vec<AtomicFact> {
        self(facts)
    }
}

/// Default deduplicator: merges facts whose similarity ratio reaches the
/// threshold.
///
/// The longest phrasing of a group represents it (first seen wins ties),
/// and records the ids of everything it absorbed in `merged_from`. Passes
/// repeat until nothing merges, so no two output facts are at or above the
/// threshold and a second run is a no-op.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityDeduplicator {
    threshold: f64,
}

impl SimilarityDeduplicator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn merge_pass(&self, facts: Vec<AtomicFact>) -> (Vec<AtomicFact>, bool) {
        let mut kept: Vec<AtomicFact> = Vec::with_capacity(facts.len());
        let mut merged_any = false;

        for fact in facts {
            let target = kept
                .iter()
                .position(|existing| similarity_ratio(&existing.text, &fact.text) >= self.threshold);

            match target {
                Some(index) => {
                    merged_any = true;
                    merge_into(&mut kept[index], fact);
                }
                None => kept.push(fact),
            }
        }

        (kept, merged_any)
    }
}

impl Default for SimilarityDeduplicator {
    fn default() -> Self {
        Self::new(0.85)
    }
}

impl Deduplicator for SimilarityDeduplicator {
    fn deduplicate(&self, facts: Vec<AtomicFact>) -> Vec<AtomicFact> {
        let mut current = facts;
        loop {
            let (next, merged_any) = self.merge_pass(current);
            if !merged_any {
                return next;
            }
            current = next;
        }
    }
}

/// Fold `other` into `representative`; a strictly longer phrasing takes over.
fn merge_into(representative: &mut AtomicFact, other: AtomicFact) {
    let absorbed = if other.text.chars().count() > representative.text.chars().count() {
        std::mem::replace(representative, other)
    } else {
        other
    };

    tracing::debug!(
        representative = %representative.id,
        absorbed = %absorbed.id,
        "Merged near-duplicate fact"
    );

    let mut merged_from = absorbed.merged_from;
    merged_from.push(absorbed.id);
    merged_from.append(&mut representative.merged_from);
    merged_from.sort();
    merged_from.dedup();
    representative.merged_from = merged_from;
}
