//! Merge a freshly planned document with a previously reviewed one.
//!
//! Rules, per collection and filename:
//! - a manual previous decision always wins;
//! - agreeing decisions keep the fresh size evidence and are tagged `aligned`;
//! - disagreeing decisions keep the fresh action and carry the previous one
//!   in `conflictWithPrevious` for review;
//! - previous non-manual decisions with no fresh counterpart are dropped, as
//!   are previous collections that no longer match.
//!
//! A previous `completed` gate survives only when nothing changed.

use super::document::{DecisionDocument, DecisionSet};
use crate::plan::{enforce_unique_targets, ActionKind, FileDecision, HintSource};
use serde::Serialize;
use tracing::{debug, info};

/// Counters from one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStats {
    pub aligned: usize,
    pub manual_kept: usize,
    pub conflicts: usize,
    pub fresh: usize,
    pub dropped_collections: usize,
    pub completed_kept: usize,
    pub completed_reset: usize,
}

fn without_history(decision: &FileDecision) -> FileDecision {
    FileDecision {
        conflict_with_previous: None,
        hint_source: None,
        ..decision.clone()
    }
}

fn merge_set(fresh: DecisionSet, previous: &DecisionSet, stats: &mut MergeStats) -> DecisionSet {
    let mut merged = fresh;
    let mut unchanged = true;

    for (filename, decision) in merged.file_decisions.iter_mut() {
        match previous.file_decisions.get(filename) {
            Some(prev) if prev.manual => {
                *decision = without_history(prev);
                decision.hint_source = Some(HintSource::Manual);
                stats.manual_kept += 1;
            }
            Some(prev) if decision.agrees_with(prev) => {
                decision.hint_source = Some(HintSource::Aligned);
                stats.aligned += 1;
            }
            Some(prev) => {
                decision.hint_source = Some(HintSource::Fresh);
                decision.conflict_with_previous = Some(Box::new(without_history(prev)));
                stats.conflicts += 1;
                unchanged = false;
                debug!(
                    "{}/{}: fresh {} disagrees with previous {}",
                    merged.local_path, filename, decision.action, prev.action
                );
            }
            None => {
                decision.hint_source = Some(HintSource::Fresh);
                stats.fresh += 1;
                if decision.action != ActionKind::NoAction {
                    unchanged = false;
                }
            }
        }
    }

    for (filename, prev) in &previous.file_decisions {
        if prev.manual && !merged.file_decisions.contains_key(filename) {
            let mut kept = without_history(prev);
            kept.hint_source = Some(HintSource::Manual);
            merged.file_decisions.insert(filename.clone(), kept);
            stats.manual_kept += 1;
        }
    }

    enforce_unique_targets(&mut merged.file_decisions);

    if previous.completed {
        if unchanged {
            merged.completed = true;
            stats.completed_kept += 1;
        } else {
            stats.completed_reset += 1;
        }
    }
    merged
}

/// Merge `fresh` with `previous`. The result is unvalidated.
pub fn merge_documents(
    fresh: DecisionDocument,
    previous: &DecisionDocument,
) -> (DecisionDocument, MergeStats) {
    let mut stats = MergeStats::default();
    let mut merged = DecisionDocument::new(fresh.generated_at);

    for (key, set) in fresh.decisions {
        let set = match previous.decisions.get(&key) {
            Some(prev) if prev.remote_path == set.remote_path => merge_set(set, prev, &mut stats),
            _ => {
                let mut set = set;
                for decision in set.file_decisions.values_mut() {
                    decision.hint_source = Some(HintSource::Fresh);
                    stats.fresh += 1;
                }
                set
            }
        };
        merged.decisions.insert(key, set);
    }

    stats.dropped_collections = previous
        .decisions
        .keys()
        .filter(|k| !merged.decisions.contains_key(*k))
        .count();

    info!(
        aligned = stats.aligned,
        manual = stats.manual_kept,
        conflicts = stats.conflicts,
        fresh = stats.fresh,
        dropped_collections = stats.dropped_collections,
        "Merged decisions with previous review"
    );
    (merged, stats)
}
