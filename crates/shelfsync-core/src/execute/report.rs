//! Per-action results and the run summary returned by the executor.

use crate::error::{ErrorClass, SyncError};
use crate::plan::{ActionKind, ReasonCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Terminal state of one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Skipped,
    Error,
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    /// Local `artist/collection`.
    pub collection: String,
    pub filename: String,
    pub action: ActionKind,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
    /// Name the plan asked for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_target: Option<String>,
    /// Name actually written; differs from `planned_target` after a collision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_target: Option<String>,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub already_satisfied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ExecutionResult {
    pub fn new(
        run_id: &str,
        collection: &str,
        filename: &str,
        action: ActionKind,
        outcome: Outcome,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            collection: collection.to_string(),
            filename: filename.to_string(),
            action,
            outcome,
            reason: None,
            planned_target: None,
            resolved_target: None,
            bytes: 0,
            already_satisfied: false,
            error_class: None,
            message: None,
        }
    }

    pub fn failed(
        run_id: &str,
        collection: &str,
        filename: &str,
        action: ActionKind,
        err: &SyncError,
    ) -> Self {
        let mut result = Self::new(run_id, collection, filename, action, Outcome::Error);
        result.error_class = Some(err.class());
        result.message = Some(err.to_string());
        result
    }

    /// A write went to a different name than planned.
    pub fn collided(&self) -> bool {
        !self.already_satisfied
            && matches!(
                (&self.planned_target, &self.resolved_target),
                (Some(planned), Some(resolved)) if planned != resolved
            )
    }
}

/// A failed action as listed in the run summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    pub collection: String,
    pub filename: String,
    pub action: ActionKind,
    pub class: ErrorClass,
    pub message: String,
}

/// Everything one `execute` call did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub counts: BTreeMap<Outcome, usize>,
    pub collisions_resolved: usize,
    pub already_satisfied: usize,
    pub bytes_transferred: u64,
    pub errors: Vec<ItemError>,
    pub cancelled: bool,
    /// Actions left for a later run because of cancellation or a fatal error.
    pub not_started: usize,
    /// Set when a fatal error stopped the run.
    pub fatal: Option<String>,
    pub results: Vec<ExecutionResult>,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            counts: BTreeMap::new(),
            collisions_resolved: 0,
            already_satisfied: 0,
            bytes_transferred: 0,
            errors: Vec::new(),
            cancelled: false,
            not_started: 0,
            fatal: None,
            results: Vec::new(),
        }
    }

    pub fn record(&mut self, result: ExecutionResult) {
        *self.counts.entry(result.outcome).or_insert(0) += 1;
        if result.collided() {
            self.collisions_resolved += 1;
        }
        if result.already_satisfied {
            self.already_satisfied += 1;
        }
        self.bytes_transferred += result.bytes;
        if result.outcome == Outcome::Error {
            self.errors.push(ItemError {
                collection: result.collection.clone(),
                filename: result.filename.clone(),
                action: result.action,
                class: result.error_class.unwrap_or(ErrorClass::ItemFailure),
                message: result.message.clone().unwrap_or_default(),
            });
        }
        self.results.push(result);
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.counts.get(&outcome).copied().unwrap_or(0)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.fatal.is_some()
    }

    /// Successful renames, as `(collection, old filename, new filename)`.
    pub fn renames(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.results.iter().filter_map(|r| {
            if r.outcome != Outcome::Success || !r.action.is_rename() {
                return None;
            }
            let new_name = r.resolved_target.as_deref()?;
            Some((r.collection.as_str(), r.filename.as_str(), new_name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_collisions_and_errors() {
        let mut report = RunReport::new("run-1");

        let mut copied = ExecutionResult::new("run-1", "A/C", "Song.pdf", ActionKind::CopyToRemote, Outcome::Success);
        copied.planned_target = Some("Song.pdf".into());
        copied.resolved_target = Some("Song-2.pdf".into());
        copied.bytes = 42;
        report.record(copied);

        let err = SyncError::NotFound("A/C/Gone.pdf".into());
        report.record(ExecutionResult::failed("run-1", "A/C", "Gone.pdf", ActionKind::CopyToLocal, &err));

        assert_eq!(report.count(Outcome::Success), 1);
        assert_eq!(report.count(Outcome::Error), 1);
        assert_eq!(report.collisions_resolved, 1);
        assert_eq!(report.bytes_transferred, 42);
        assert_eq!(report.errors[0].class, ErrorClass::NotFound);
        assert!(report.has_errors());
    }

    #[test]
    fn test_renames_only_lists_successes() {
        let mut report = RunReport::new("r");
        let mut ok = ExecutionResult::new("r", "A/C", "old.pdf", ActionKind::RenameLocal, Outcome::Success);
        ok.resolved_target = Some("new.pdf".into());
        report.record(ok);
        let err = SyncError::Store { message: "x".into() };
        report.record(ExecutionResult::failed("r", "A/C", "b.pdf", ActionKind::RenameLocal, &err));

        let renames: Vec<_> = report.renames().collect();
        assert_eq!(renames, vec![("A/C", "old.pdf", "new.pdf")]);
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = ExecutionResult::new("r", "A/C", "a.pdf", ActionKind::DeleteLocal, Outcome::Skipped);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["runId"], "r");
        assert_eq!(json["outcome"], "Skipped");
        assert!(json.get("errorClass").is_none());
    }
}
