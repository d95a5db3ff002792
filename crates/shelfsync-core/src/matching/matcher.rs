//! Greedy, exclusive assignment of local to remote collections.

use super::normalize::NormalizedCollection;
use super::score::{is_candidate, is_exact, score_pair};
use super::tier::MatchTier;
use crate::inventory::{CollectionKey, Inventory};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// One accepted correspondence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMatch {
    pub local: CollectionKey,
    pub remote: CollectionKey,
    pub tier: MatchTier,
    pub confidence: f64,
    pub local_count: usize,
    pub remote_count: usize,
}

/// Result of matching two inventories.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchOutcome {
    pub matches: Vec<CollectionMatch>,
    pub unmatched_local: Vec<CollectionKey>,
    pub unmatched_remote: Vec<CollectionKey>,
}

impl MatchOutcome {
    pub fn tier_counts(&self) -> BTreeMap<MatchTier, usize> {
        let mut counts = BTreeMap::new();
        for m in &self.matches {
            *counts.entry(m.tier).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Debug)]
struct Candidate {
    local: usize,
    remote: usize,
    exact: bool,
    score: f64,
    canonical: u8,
}

/// Match every local collection to at most one remote collection.
///
/// Scoring is a pure function of each pair. Assignment walks candidates in a
/// fixed order (exact first, then score, then canonical naming, then keys)
/// and claims both sides of each accepted pair, so no collection on either
/// side is matched twice.
pub fn match_collections(local: &Inventory, remote: &Inventory) -> MatchOutcome {
    let locals: Vec<NormalizedCollection> = local
        .collections
        .iter()
        .map(|(key, items)| NormalizedCollection::new(key, items.len()))
        .collect();
    let remotes: Vec<NormalizedCollection> = remote
        .collections
        .iter()
        .map(|(key, items)| NormalizedCollection::new(key, items.len()))
        .collect();

    let mut candidates = collect_candidates(&locals, &remotes);
    candidates.sort_by(|a, b| compare_candidates(a, b, &locals, &remotes));

    let mut local_claimed = vec![false; locals.len()];
    let mut remote_claimed = vec![false; remotes.len()];
    let mut matches = Vec::new();

    for candidate in &candidates {
        if local_claimed[candidate.local] || remote_claimed[candidate.remote] {
            continue;
        }
        local_claimed[candidate.local] = true;
        remote_claimed[candidate.remote] = true;

        let l = &locals[candidate.local];
        let r = &remotes[candidate.remote];
        let (tier, confidence) = if candidate.exact {
            (MatchTier::Perfect, 1.0)
        } else {
            (MatchTier::from_score(candidate.score), candidate.score)
        };
        debug!("Matched {} <-> {} ({}, {:.3})", l.key, r.key, tier, confidence);
        matches.push(CollectionMatch {
            local: l.key.clone(),
            remote: r.key.clone(),
            tier,
            confidence,
            local_count: l.item_count,
            remote_count: r.item_count,
        });
    }

    matches.sort_by(|a, b| a.local.cmp(&b.local));
    let unmatched_local: Vec<CollectionKey> = locals
        .iter()
        .zip(&local_claimed)
        .filter(|(_, claimed)| !**claimed)
        .map(|(n, _)| n.key.clone())
        .collect();
    let unmatched_remote: Vec<CollectionKey> = remotes
        .iter()
        .zip(&remote_claimed)
        .filter(|(_, claimed)| !**claimed)
        .map(|(n, _)| n.key.clone())
        .collect();

    let outcome = MatchOutcome {
        matches,
        unmatched_local,
        unmatched_remote,
    };
    info!(
        matched = outcome.matches.len(),
        unmatched_local = outcome.unmatched_local.len(),
        unmatched_remote = outcome.unmatched_remote.len(),
        "Matched collections: {:?}",
        outcome.tier_counts()
    );
    outcome
}

/// Score every plausible pair. Remotes are indexed by artist and by
/// significant word so only candidates that pass the filter are scored.
fn collect_candidates(
    locals: &[NormalizedCollection],
    remotes: &[NormalizedCollection],
) -> Vec<Candidate> {
    let mut by_artist: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut by_word: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, r) in remotes.iter().enumerate() {
        by_artist.entry(r.artist.as_str()).or_default().push(idx);
        for word in &r.significant {
            by_word.entry(word.as_str()).or_default().push(idx);
        }
    }

    let mut candidates = Vec::new();
    for (li, l) in locals.iter().enumerate() {
        let mut pool: BTreeSet<usize> = BTreeSet::new();
        if let Some(same_artist) = by_artist.get(l.artist.as_str()) {
            pool.extend(same_artist);
        }
        for word in &l.significant {
            if let Some(sharing) = by_word.get(word.as_str()) {
                pool.extend(sharing);
            }
        }

        for ri in pool {
            let r = &remotes[ri];
            if !is_candidate(l, r) {
                continue;
            }
            let exact = is_exact(l, r);
            let score = if exact { 1.0 } else { score_pair(l, r).total };
            if !exact && MatchTier::from_score(score) == MatchTier::NoMatch {
                continue;
            }
            candidates.push(Candidate {
                local: li,
                remote: ri,
                exact,
                score,
                canonical: l.canonical as u8 + r.canonical as u8,
            });
        }
    }
    candidates
}

fn compare_candidates(
    a: &Candidate,
    b: &Candidate,
    locals: &[NormalizedCollection],
    remotes: &[NormalizedCollection],
) -> Ordering {
    b.exact
        .cmp(&a.exact)
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| b.canonical.cmp(&a.canonical))
        .then_with(|| locals[a.local].key.cmp(&locals[b.local].key))
        .then_with(|| remotes[a.remote].key.cmp(&remotes[b.remote].key))
}
