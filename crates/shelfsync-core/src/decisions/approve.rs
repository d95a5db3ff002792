//! Setting the `completed` gate.

use super::document::DecisionDocument;
use crate::matching::MatchTier;
use serde::Serialize;
use tracing::{info, warn};

/// Which collections to approve.
#[derive(Debug, Clone, PartialEq)]
pub enum Approval {
    /// These local `artist/collection` keys, as reviewed by a person.
    Collections(Vec<String>),
    /// Every collection matched at `min_tier` or better that contains nothing
    /// destructive and nothing awaiting review.
    Auto { min_tier: MatchTier },
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalReport {
    pub approved: Vec<String>,
    /// `(collection, why)`
    pub skipped: Vec<(String, String)>,
    pub unknown: Vec<String>,
}

/// Approve collections in place. Any approval invalidates a previous
/// validation.
pub fn approve(document: &mut DecisionDocument, approval: &Approval) -> ApprovalReport {
    let mut report = ApprovalReport::default();

    match approval {
        Approval::Collections(keys) => {
            for key in keys {
                match document.decisions.get_mut(key) {
                    Some(set) => {
                        if !set.completed {
                            set.completed = true;
                            report.approved.push(key.clone());
                        }
                    }
                    None => {
                        warn!("No decision set for {}", key);
                        report.unknown.push(key.clone());
                    }
                }
            }
        }
        Approval::Auto { min_tier } => {
            for (key, set) in document.decisions.iter_mut() {
                if set.completed {
                    continue;
                }
                let why = if set.match_tier < *min_tier {
                    Some(format!("match tier {} below {}", set.match_tier, min_tier))
                } else if set.has_destructive() {
                    Some("contains destructive actions".to_string())
                } else if set.needs_review() {
                    Some("contains conflicts awaiting review".to_string())
                } else {
                    None
                };
                match why {
                    Some(why) => report.skipped.push((key.clone(), why)),
                    None => {
                        set.completed = true;
                        report.approved.push(key.clone());
                    }
                }
            }
        }
    }

    if !report.approved.is_empty() {
        document.validated_at = None;
    }
    info!(
        "Approved {} collections ({} skipped, {} unknown)",
        report.approved.len(),
        report.skipped.len(),
        report.unknown.len()
    );
    report
}
