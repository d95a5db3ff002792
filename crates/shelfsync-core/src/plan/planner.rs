//! Per-collection diff planning. No I/O.

use super::action::{ActionKind, ConflictPolicy, Direction, FileDecision, ReasonCode};
use super::title::normalize_title;
use crate::inventory::Item;
use std::collections::{BTreeMap, HashSet};

/// Decisions for one matched collection, keyed by filename.
pub type FileDecisions = BTreeMap<String, FileDecision>;

/// Hashes are comparable only when both are present with the same algorithm.
fn hashes_differ(local: Option<&str>, remote: Option<&str>) -> bool {
    match (local, remote) {
        (Some(l), Some(r)) => {
            let l_algo = l.split_once(':').map(|(a, _)| a);
            let r_algo = r.split_once(':').map(|(a, _)| a);
            l_algo.is_some() && l_algo == r_algo && !l.eq_ignore_ascii_case(r)
        }
        _ => false,
    }
}

/// Decide what to do with a filename present on both sides.
fn compare_pair(local: &Item, remote: &Item, policy: ConflictPolicy) -> FileDecision {
    let sizes = (Some(local.size), Some(remote.size));

    if local.size == remote.size {
        if !hashes_differ(local.content_hash.as_deref(), remote.content_hash.as_deref()) {
            return FileDecision::new(ActionKind::NoAction, ReasonCode::Identical)
                .with_sizes(sizes.0, sizes.1);
        }
        return match policy {
            ConflictPolicy::PreferLocal => {
                FileDecision::new(ActionKind::ConflictOverwrite, ReasonCode::SizeTiePreferLocal)
                    .with_sizes(sizes.0, sizes.1)
                    .with_direction(Direction::LocalToRemote)
            }
            ConflictPolicy::PreferRemote => {
                FileDecision::new(ActionKind::ConflictOverwrite, ReasonCode::PolicyPreferRemote)
                    .with_sizes(sizes.1, sizes.0)
                    .with_direction(Direction::RemoteToLocal)
            }
            ConflictPolicy::PreferLarger | ConflictPolicy::Manual => FileDecision::new(
                ActionKind::NoAction,
                ReasonCode::ContentConflictNeedsReview,
            )
            .with_sizes(sizes.0, sizes.1),
        };
    }

    let (direction, reason) = match policy {
        ConflictPolicy::Manual => {
            return FileDecision::new(ActionKind::NoAction, ReasonCode::ConflictNeedsReview)
                .with_sizes(sizes.0, sizes.1)
        }
        ConflictPolicy::PreferLocal => (Direction::LocalToRemote, ReasonCode::PolicyPreferLocal),
        ConflictPolicy::PreferRemote => (Direction::RemoteToLocal, ReasonCode::PolicyPreferRemote),
        ConflictPolicy::PreferLarger if local.size > remote.size => {
            (Direction::LocalToRemote, ReasonCode::SizeDiffersLocalLarger)
        }
        ConflictPolicy::PreferLarger => {
            (Direction::RemoteToLocal, ReasonCode::SizeDiffersRemoteLarger)
        }
    };

    let (source, target) = match direction {
        Direction::LocalToRemote => (local.size, remote.size),
        Direction::RemoteToLocal => (remote.size, local.size),
    };
    FileDecision::new(ActionKind::ConflictOverwrite, reason)
        .with_sizes(Some(source), Some(target))
        .with_direction(direction)
}

/// Plan one matched collection.
///
/// 1. Filenames present on both sides are compared by size (and hash).
/// 2. Leftover names are grouped by their normalized title; a local and a
///    remote leftover with the same normalized title become renames of
///    whichever side(s) differ from it.
/// 3. Whatever is still unpaired is copied to the other side.
///
/// The planner never emits deletes.
pub fn plan_collection(
    artist: &str,
    local: &[Item],
    remote: &[Item],
    policy: ConflictPolicy,
) -> FileDecisions {
    let local_by_name: BTreeMap<&str, &Item> =
        local.iter().map(|i| (i.filename.as_str(), i)).collect();
    let remote_by_name: BTreeMap<&str, &Item> =
        remote.iter().map(|i| (i.filename.as_str(), i)).collect();

    let mut decisions = FileDecisions::new();

    for (name, l) in &local_by_name {
        if let Some(r) = remote_by_name.get(name) {
            decisions.insert(name.to_string(), compare_pair(l, r, policy));
        }
    }

    let local_left: Vec<&Item> = local_by_name
        .iter()
        .filter(|(name, _)| !remote_by_name.contains_key(*name))
        .map(|(_, item)| *item)
        .collect();
    let mut remote_left: BTreeMap<String, Vec<&Item>> = BTreeMap::new();
    for (name, item) in &remote_by_name {
        if !local_by_name.contains_key(name) {
            remote_left
                .entry(normalize_title(name, artist))
                .or_default()
                .push(*item);
        }
    }

    let mut unpaired_local: Vec<&Item> = Vec::new();

    for l in local_left {
        let normalized = normalize_title(&l.filename, artist);
        let partner = remote_left.get_mut(&normalized).and_then(|group| {
            if group.is_empty() {
                None
            } else {
                Some(group.remove(0))
            }
        });
        let Some(r) = partner else {
            unpaired_local.push(l);
            continue;
        };

        if l.filename != normalized {
            let target = existing_size(&local_by_name, &normalized);
            decisions.insert(
                l.filename.clone(),
                FileDecision::new(ActionKind::RenameLocal, ReasonCode::TitleNormalized)
                    .with_sizes(Some(l.size), target)
                    .with_normalized_name(normalized.clone()),
            );
        }
        if r.filename != normalized {
            let target = existing_size(&remote_by_name, &normalized);
            decisions.insert(
                r.filename.clone(),
                FileDecision::new(ActionKind::RenameRemote, ReasonCode::TitleNormalized)
                    .with_sizes(Some(r.size), target)
                    .with_normalized_name(normalized),
            );
        }
    }

    for l in unpaired_local {
        decisions.insert(
            l.filename.clone(),
            FileDecision::new(ActionKind::CopyToRemote, ReasonCode::OnlyLocal)
                .with_sizes(Some(l.size), None),
        );
    }
    for r in remote_left.values().flatten() {
        decisions.insert(
            r.filename.clone(),
            FileDecision::new(ActionKind::CopyToLocal, ReasonCode::OnlyRemote)
                .with_sizes(Some(r.size), None),
        );
    }

    enforce_unique_targets(&mut decisions);
    decisions
}

fn existing_size(by_name: &BTreeMap<&str, &Item>, name: &str) -> Option<u64> {
    by_name.get(name).map(|i| i.size)
}

/// No two actions may write the same location. Manual decisions claim their
/// targets first; after that, later filenames (in key order) lose and become
/// `NoAction` / `DUPLICATE_TARGET`.
pub fn enforce_unique_targets(decisions: &mut FileDecisions) {
    let mut claimed = HashSet::new();
    for manual_pass in [true, false] {
        for (filename, decision) in decisions.iter_mut() {
            if decision.manual != manual_pass {
                continue;
            }
            let Some(target) = decision.target(filename) else {
                continue;
            };
            if !claimed.insert(target) {
                decision.downgrade(ReasonCode::DuplicateTarget);
            }
        }
    }
}
