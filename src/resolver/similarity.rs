//! Pure name-similarity helpers for the entity resolver (spec.md §4.2).

use std::collections::HashSet;

/// Lower-cases and splits on non-alphanumeric boundaries.
fn tokenize(name: &str) -> HashSet<String> {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Token-set Jaccard similarity over lower-cased alphanumeric tokens.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Applies the spec.md §4.2 cluster-hint boost of +0.05 when both entities'
/// documents share a cluster classification tag.
pub fn similarity_with_cluster_hint(a: &str, b: &str, shares_cluster_hint: bool, boost: f64) -> f64 {
    let base = jaccard_similarity(a, b);
    if shares_cluster_hint {
        (base + boost).min(1.0)
    } else {
        base
    }
}

pub fn normalize_name(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_names_are_fully_similar() {
        assert_eq!(jaccard_similarity("John Smith", "john smith"), 1.0);
    }

    #[test]
    fn disjoint_names_have_zero_similarity() {
        assert_eq!(jaccard_similarity("Alice", "Bob"), 0.0);
    }

    #[test]
    fn partial_overlap_is_between_zero_and_one() {
        let sim = jaccard_similarity("John Smith", "John Smyth");
        assert!(sim > 0.0 && sim < 1.0);
    }

    #[test]
    fn cluster_hint_boosts_but_caps_at_one() {
        let boosted = similarity_with_cluster_hint("John Smith", "john smith", true, 0.05);
        assert_eq!(boosted, 1.0);
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        // "a b c" vs "a b d": tokens {a,b,c} vs {a,b,d}: intersection=2, union=4 -> 0.5
        let sim = jaccard_similarity("a b c", "a b d");
        assert!((sim - 0.5).abs() < 1e-9);
    }
}
