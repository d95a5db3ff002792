//! Pair scoring. Everything here is pure.

use super::normalize::NormalizedCollection;
use crate::config::MatchConfig;
use serde::Serialize;
use std::collections::BTreeSet;

/// Weighted score and its parts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairScore {
    pub token_overlap: f64,
    pub string_similarity: f64,
    pub item_count_similarity: f64,
    pub total: f64,
}

/// Jaccard similarity of two token sets.
pub fn token_overlap_ratio(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// `1 - min(|a - b| / max(a, b, 1), 1)`
pub fn item_count_similarity(a: usize, b: usize) -> f64 {
    let diff = a.abs_diff(b) as f64;
    let denom = a.max(b).max(1) as f64;
    1.0 - (diff / denom).min(1.0)
}

/// Whether two collections may be compared at all: same normalized artist,
/// or enough shared significant title words.
pub fn is_candidate(local: &NormalizedCollection, remote: &NormalizedCollection) -> bool {
    local.artist == remote.artist
        || local.significant.intersection(&remote.significant).count()
            >= MatchConfig::MIN_SHARED_SIGNIFICANT_WORDS
}

/// Exact normalized identity.
pub fn is_exact(local: &NormalizedCollection, remote: &NormalizedCollection) -> bool {
    local.identity() == remote.identity()
}

/// `0.5 * tokenOverlap + 0.3 * stringSimilarity + 0.2 * itemCountSimilarity`
pub fn score_pair(local: &NormalizedCollection, remote: &NormalizedCollection) -> PairScore {
    let token_overlap = token_overlap_ratio(&local.tokens, &remote.tokens);
    let string_similarity = strsim::normalized_levenshtein(&local.full, &remote.full);
    let item_count_similarity = item_count_similarity(local.item_count, remote.item_count);
    let total = MatchConfig::TOKEN_OVERLAP_WEIGHT * token_overlap
        + MatchConfig::STRING_SIMILARITY_WEIGHT * string_similarity
        + MatchConfig::ITEM_COUNT_WEIGHT * item_count_similarity;

    PairScore {
        token_overlap,
        string_similarity,
        item_count_similarity,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::CollectionKey;

    fn norm(artist: &str, name: &str, count: usize) -> NormalizedCollection {
        NormalizedCollection::new(&CollectionKey::new(artist, name), count)
    }

    #[test]
    fn test_item_count_similarity() {
        assert_eq!(item_count_similarity(10, 10), 1.0);
        assert_eq!(item_count_similarity(0, 0), 1.0);
        assert_eq!(item_count_similarity(5, 10), 0.5);
        assert_eq!(item_count_similarity(0, 7), 0.0);
    }

    #[test]
    fn test_identical_names_score_one() {
        let a = norm("Queen", "Greatest Hits", 17);
        let b = norm("Queen", "Greatest Hits", 17);
        let score = score_pair(&a, &b);
        assert!((score.total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_title_scores_fair() {
        let a = norm("ABBA", "Gold Greatest Hits", 5);
        let b = norm("ABBA", "Gold Greatest Hits Vol 1", 5);
        let score = score_pair(&a, &b);
        // 0.5 * 4/6 + 0.3 * (1 - 6/29) + 0.2 * 1
        assert!((score.total - 0.7713).abs() < 1e-3, "{:?}", score);
    }

    #[test]
    fn test_candidate_filter() {
        let a = norm("Various Artists", "Disney Movie Hits", 10);
        let b = norm("Disney", "Disney Movie Hits", 12);
        let c = norm("Elvis", "Movie Songs", 12);
        assert!(is_candidate(&a, &b));
        assert!(!is_candidate(&a, &c));
    }
}
