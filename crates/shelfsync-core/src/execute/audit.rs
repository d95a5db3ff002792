//! Append-only JSON Lines audit log.

use super::report::{ExecutionResult, Outcome};
use crate::error::{Result, SyncError};
use crate::metadata::append_json_line;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Writer for the audit log. Shared by every worker of a run; each record is
/// flushed before `append` returns.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, result: &ExecutionResult) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        append_json_line(&self.path, result)
    }
}

/// Read every record back. Lines that do not parse are logged and skipped.
pub fn read_audit_log(path: &Path) -> Result<Vec<ExecutionResult>> {
    let file = std::fs::File::open(path).map_err(|e| SyncError::io_with_path(e, path))?;
    let mut results = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| SyncError::io_with_path(e, path))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ExecutionResult>(&line) {
            Ok(result) => results.push(result),
            Err(e) => warn!("{}:{}: skipping unreadable record: {}", path.display(), index + 1, e),
        }
    }
    Ok(results)
}

/// Summary of one run reconstructed from the audit log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub first_record: DateTime<Utc>,
    pub last_record: DateTime<Utc>,
    pub counts: BTreeMap<Outcome, usize>,
    pub actions: BTreeMap<String, usize>,
    pub collisions_resolved: usize,
    pub already_satisfied: usize,
    pub bytes_transferred: u64,
    /// `collection/filename: message` for every failed action.
    pub errors: Vec<String>,
}

impl RunSummary {
    fn start(result: &ExecutionResult) -> Self {
        Self {
            run_id: result.run_id.clone(),
            first_record: result.timestamp,
            last_record: result.timestamp,
            counts: BTreeMap::new(),
            actions: BTreeMap::new(),
            collisions_resolved: 0,
            already_satisfied: 0,
            bytes_transferred: 0,
            errors: Vec::new(),
        }
    }

    fn add(&mut self, result: &ExecutionResult) {
        self.first_record = self.first_record.min(result.timestamp);
        self.last_record = self.last_record.max(result.timestamp);
        *self.counts.entry(result.outcome).or_insert(0) += 1;
        *self.actions.entry(result.action.to_string()).or_insert(0) += 1;
        if result.collided() {
            self.collisions_resolved += 1;
        }
        if result.already_satisfied {
            self.already_satisfied += 1;
        }
        self.bytes_transferred += result.bytes;
        if result.outcome == Outcome::Error {
            self.errors.push(format!(
                "{}/{}: {}",
                result.collection,
                result.filename,
                result.message.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    pub fn error_count(&self) -> usize {
        self.counts.get(&Outcome::Error).copied().unwrap_or(0)
    }
}

/// Group records by run, oldest run first. With `run_id`, only that run.
pub fn summarize(results: &[ExecutionResult], run_id: Option<&str>) -> Vec<RunSummary> {
    let mut runs: BTreeMap<&str, RunSummary> = BTreeMap::new();
    for result in results {
        if run_id.is_some_and(|id| id != result.run_id) {
            continue;
        }
        runs.entry(result.run_id.as_str())
            .or_insert_with(|| RunSummary::start(result))
            .add(result);
    }
    let mut summaries: Vec<RunSummary> = runs.into_values().collect();
    summaries.sort_by(|a, b| a.first_record.cmp(&b.first_record).then_with(|| a.run_id.cmp(&b.run_id)));
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ActionKind;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read_back() {
        let tmp = TempDir::new().unwrap();
        let log = AuditLog::new(tmp.path().join("audit.jsonl"));

        let mut first = ExecutionResult::new("run-a", "A/C", "a.pdf", ActionKind::CopyToRemote, Outcome::Success);
        first.bytes = 10;
        log.append(&first).unwrap();
        log.append(&ExecutionResult::new("run-b", "A/C", "b.pdf", ActionKind::DeleteLocal, Outcome::Skipped))
            .unwrap();

        let records = read_audit_log(log.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], first);
    }

    #[test]
    fn test_unreadable_lines_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("audit.jsonl");
        let log = AuditLog::new(&path);
        log.append(&ExecutionResult::new("r", "A/C", "a.pdf", ActionKind::CopyToLocal, Outcome::Success))
            .unwrap();
        std::fs::write(
            &path,
            format!("{}{{truncated\n", std::fs::read_to_string(&path).unwrap()),
        )
        .unwrap();

        assert_eq!(read_audit_log(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_summarize_filters_by_run() {
        let mut records = vec![
            ExecutionResult::new("r1", "A/C", "a.pdf", ActionKind::CopyToRemote, Outcome::Success),
            ExecutionResult::new("r2", "A/C", "a.pdf", ActionKind::CopyToRemote, Outcome::Skipped),
        ];
        let mut failed = ExecutionResult::new("r1", "A/C", "b.pdf", ActionKind::CopyToLocal, Outcome::Error);
        failed.message = Some("boom".into());
        records.push(failed);

        let all = summarize(&records, None);
        assert_eq!(all.len(), 2);

        let one = summarize(&records, Some("r1"));
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].error_count(), 1);
        assert_eq!(one[0].errors, vec!["A/C/b.pdf: boom".to_string()]);
        assert_eq!(one[0].actions["CopyToRemote"], 1);
    }
}
