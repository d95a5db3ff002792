//! Pre-execution validation against live store state.
//!
//! Only approved (`completed`) collections are checked. Each pending action is
//! re-queried and classified; actions whose source vanished are dropped,
//! already-done actions become `NoAction`, and actions whose sizes drifted are
//! updated or downgraded. Nothing is written to either store.

use crate::decisions::{DecisionDocument, DecisionSet};
use crate::error::{ErrorClass, Result, SyncError};
use crate::plan::{ActionKind, FileDecision, ReasonCode};
use crate::store::{ItemRef, ItemStore, ObjectMeta, Side};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome for one action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Valid,
    AlreadySatisfied,
    /// Dropped; never executed.
    Invalid { reason: ErrorClass },
    SizeChanged {
        old: Option<u64>,
        new: u64,
        downgraded: bool,
    },
    /// The store could not be queried; dropped for this run.
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationEntry {
    pub collection: String,
    pub filename: String,
    pub action: ActionKind,
    #[serde(flatten)]
    pub status: ValidationStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub entries: Vec<ValidationEntry>,
    /// Collections skipped because `completed` is not set.
    pub not_approved: Vec<String>,
}

impl ValidationReport {
    fn count(&self, pred: impl Fn(&ValidationStatus) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.status)).count()
    }

    pub fn valid(&self) -> usize {
        self.count(|s| matches!(s, ValidationStatus::Valid))
    }

    pub fn already_satisfied(&self) -> usize {
        self.count(|s| matches!(s, ValidationStatus::AlreadySatisfied))
    }

    pub fn dropped(&self) -> usize {
        self.count(|s| matches!(s, ValidationStatus::Invalid { .. } | ValidationStatus::Failed { .. }))
    }

    pub fn size_changed(&self) -> usize {
        self.count(|s| matches!(s, ValidationStatus::SizeChanged { .. }))
    }

    pub fn downgraded(&self) -> usize {
        self.count(|s| matches!(s, ValidationStatus::SizeChanged { downgraded: true, .. }))
    }
}

/// Result of validation: the filtered document plus what happened to each
/// action.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub document: DecisionDocument,
    pub report: ValidationReport,
}

/// What to do with an action after its live check.
enum Verdict {
    Keep(ValidationStatus),
    Satisfied,
    Drop(ValidationStatus),
}

pub struct Validator {
    local: Arc<dyn ItemStore>,
    remote: Arc<dyn ItemStore>,
    concurrency: usize,
}

impl Validator {
    pub fn new(local: Arc<dyn ItemStore>, remote: Arc<dyn ItemStore>, concurrency: usize) -> Self {
        Self {
            local,
            remote,
            concurrency: concurrency.max(1),
        }
    }

    fn store(&self, side: Side) -> &dyn ItemStore {
        match side {
            Side::Local => self.local.as_ref(),
            Side::Remote => self.remote.as_ref(),
        }
    }

    /// Validate every approved collection and stamp `validatedAt`.
    ///
    /// Fatal store errors (permissions, configuration) abort validation.
    pub async fn validate(&self, document: DecisionDocument) -> Result<ValidationOutcome> {
        let mut report = ValidationReport::default();
        let DecisionDocument {
            version,
            generated_at,
            decisions,
            ..
        } = document;
        let mut filtered = DecisionDocument {
            version,
            generated_at,
            validated_at: None,
            decisions: BTreeMap::new(),
        };

        let mut approved = Vec::new();
        for (key, set) in decisions {
            if set.completed {
                approved.push((key, set));
            } else {
                report.not_approved.push(key.clone());
                filtered.decisions.insert(key, set);
            }
        }

        let results: Vec<Result<(String, DecisionSet, Vec<ValidationEntry>)>> =
            stream::iter(approved)
                .map(|(key, set)| self.validate_set(key, set))
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        for result in results {
            let (key, set, entries) = result?;
            report.entries.extend(entries);
            filtered.decisions.insert(key, set);
        }
        report
            .entries
            .sort_by(|a, b| (&a.collection, &a.filename).cmp(&(&b.collection, &b.filename)));

        filtered.validated_at = Some(Utc::now());
        info!(
            valid = report.valid(),
            already_satisfied = report.already_satisfied(),
            dropped = report.dropped(),
            size_changed = report.size_changed(),
            not_approved = report.not_approved.len(),
            "Validated decision document"
        );
        Ok(ValidationOutcome {
            document: filtered,
            report,
        })
    }

    async fn validate_set(
        &self,
        key: String,
        mut set: DecisionSet,
    ) -> Result<(String, DecisionSet, Vec<ValidationEntry>)> {
        let local_key = set.local_key()?;
        let remote_key = set.remote_key()?;
        let mut entries = Vec::new();
        let mut dropped = Vec::new();

        for (filename, decision) in set.file_decisions.iter_mut() {
            if decision.action == ActionKind::NoAction {
                continue;
            }
            let local = ItemRef::new(&local_key.artist, &local_key.name, filename.as_str());
            let remote = ItemRef::new(&remote_key.artist, &remote_key.name, filename.as_str());

            let action = decision.action;
            let verdict = match self.check(decision, &local, &remote).await {
                Ok(verdict) => verdict,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("{}/{}: could not validate {}: {}", key, filename, action, e);
                    Verdict::Drop(ValidationStatus::Failed {
                        message: e.to_string(),
                    })
                }
            };

            let status = match verdict {
                Verdict::Keep(status) => status,
                Verdict::Satisfied => {
                    decision.downgrade(ReasonCode::AlreadySatisfied);
                    ValidationStatus::AlreadySatisfied
                }
                Verdict::Drop(status) => {
                    dropped.push(filename.clone());
                    status
                }
            };
            debug!("{}/{}: {} -> {:?}", key, filename, action, status);
            entries.push(ValidationEntry {
                collection: key.clone(),
                filename: filename.clone(),
                action,
                status,
            });
        }

        for filename in dropped {
            set.file_decisions.remove(&filename);
        }
        Ok((key, set, entries))
    }

    async fn head(&self, side: Side, local: &ItemRef, remote: &ItemRef) -> Result<Option<ObjectMeta>> {
        let item = match side {
            Side::Local => local,
            Side::Remote => remote,
        };
        self.store(side).head(item).await
    }

    /// Both sides hash equal. Unhashable items count as different.
    async fn same_bytes(&self, local: &ItemRef, remote: &ItemRef) -> Result<bool> {
        let (local_hash, remote_hash) = tokio::try_join!(
            self.local.content_hash(local),
            self.remote.content_hash(remote),
        )?;
        Ok(matches!((local_hash, remote_hash), (Some(l), Some(r)) if l == r))
    }

    async fn check(
        &self,
        decision: &mut FileDecision,
        local: &ItemRef,
        remote: &ItemRef,
    ) -> Result<Verdict> {
        match decision.action {
            ActionKind::NoAction => Ok(Verdict::Keep(ValidationStatus::Valid)),

            ActionKind::CopyToLocal | ActionKind::CopyToRemote | ActionKind::ConflictOverwrite => {
                let source_side = decision.source_side().ok_or_else(|| SyncError::InvalidPlan {
                    message: format!("{} without direction", decision.action),
                })?;
                let Some(source) = self.head(source_side, local, remote).await? else {
                    return Ok(Verdict::Drop(ValidationStatus::Invalid {
                        reason: ErrorClass::NotFound,
                    }));
                };
                let target = self.head(source_side.other(), local, remote).await?;
                if target.as_ref().map(|t| t.size) == Some(source.size)
                    && (!is_content_conflict(decision) || self.same_bytes(local, remote).await?)
                {
                    return Ok(Verdict::Satisfied);
                }
                decision.target_size = target.as_ref().map(|t| t.size);

                if decision.source_size == Some(source.size) {
                    return Ok(Verdict::Keep(ValidationStatus::Valid));
                }
                let old = decision.source_size;
                decision.source_size = Some(source.size);
                let downgraded = premise_broken(decision, source.size, decision.target_size);
                if downgraded {
                    decision.downgrade(ReasonCode::SizeChanged);
                }
                Ok(Verdict::Keep(ValidationStatus::SizeChanged {
                    old,
                    new: source.size,
                    downgraded,
                }))
            }

            ActionKind::RenameLocal | ActionKind::RenameRemote => {
                let side = if decision.action == ActionKind::RenameLocal {
                    Side::Local
                } else {
                    Side::Remote
                };
                let target_name = decision.normalized_name.clone().unwrap_or_default();
                let source = self.head(side, local, remote).await?;
                let target_ref = match side {
                    Side::Local => local.with_filename(&target_name),
                    Side::Remote => remote.with_filename(&target_name),
                };
                let target = self.store(side).head(&target_ref).await?;

                match (source, target) {
                    (None, Some(_)) => Ok(Verdict::Satisfied),
                    (None, None) => Ok(Verdict::Drop(ValidationStatus::Invalid {
                        reason: ErrorClass::NotFound,
                    })),
                    (Some(source), target) => {
                        decision.target_size = target.map(|t| t.size);
                        if decision.source_size.is_none() || decision.source_size == Some(source.size) {
                            decision.source_size = Some(source.size);
                            return Ok(Verdict::Keep(ValidationStatus::Valid));
                        }
                        let old = decision.source_size;
                        decision.source_size = Some(source.size);
                        Ok(Verdict::Keep(ValidationStatus::SizeChanged {
                            old,
                            new: source.size,
                            downgraded: false,
                        }))
                    }
                }
            }

            ActionKind::DeleteLocal | ActionKind::DeleteRemote | ActionKind::DeleteBoth => {
                let sides: &[Side] = match decision.action {
                    ActionKind::DeleteLocal => &[Side::Local],
                    ActionKind::DeleteRemote => &[Side::Remote],
                    _ => &[Side::Local, Side::Remote],
                };
                let mut present = Vec::new();
                for side in sides {
                    if let Some(meta) = self.head(*side, local, remote).await? {
                        present.push(meta);
                    }
                }
                if present.is_empty() {
                    return Ok(Verdict::Satisfied);
                }
                // A file that changed since the decision was made is not
                // deleted on the strength of the old decision.
                if let Some(expected) = decision.source_size {
                    if let Some(changed) = present.iter().find(|m| m.size != expected) {
                        let new = changed.size;
                        decision.downgrade(ReasonCode::SizeChanged);
                        return Ok(Verdict::Keep(ValidationStatus::SizeChanged {
                            old: Some(expected),
                            new,
                            downgraded: true,
                        }));
                    }
                }
                Ok(Verdict::Keep(ValidationStatus::Valid))
            }
        }
    }
}

/// An overwrite planned between two same-sized files. Equal sizes prove
/// nothing about it, only equal bytes do.
fn is_content_conflict(decision: &FileDecision) -> bool {
    decision.action == ActionKind::ConflictOverwrite
        && (decision.source_size.is_none() || decision.source_size == decision.target_size)
}

/// A size-driven overwrite whose size relationship no longer holds.
fn premise_broken(decision: &FileDecision, source: u64, target: Option<u64>) -> bool {
    let Some(target) = target else {
        return false;
    };
    match decision.reason {
        ReasonCode::SizeDiffersLocalLarger | ReasonCode::SizeDiffersRemoteLarger => source <= target,
        _ => false,
    }
}
