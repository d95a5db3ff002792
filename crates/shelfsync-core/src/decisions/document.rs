//! Decision document schema and persistence.

use crate::error::{Result, SyncError};
use crate::inventory::CollectionKey;
use crate::matching::MatchTier;
use crate::metadata::{atomic_read_json, atomic_write_json};
use crate::plan::{ActionKind, FileDecision, FileDecisions, ReasonCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Current schema version written by this crate.
pub const DECISION_DOCUMENT_VERSION: u32 = 1;

fn default_tier() -> MatchTier {
    MatchTier::NoMatch
}

/// Reviewable plan for one matched collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionSet {
    /// Local `artist/collection`.
    pub local_path: String,
    /// Remote `artist/collection`.
    pub remote_path: String,
    /// Execution gate. Only a reviewer or `approve` sets it.
    #[serde(default)]
    pub completed: bool,
    pub generated_at: DateTime<Utc>,
    #[serde(default = "default_tier")]
    pub match_tier: MatchTier,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub file_decisions: FileDecisions,
}

impl DecisionSet {
    pub fn new(
        local: &CollectionKey,
        remote: &CollectionKey,
        match_tier: MatchTier,
        confidence: f64,
        file_decisions: FileDecisions,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            local_path: local.to_string(),
            remote_path: remote.to_string(),
            completed: false,
            generated_at,
            match_tier,
            confidence,
            file_decisions,
        }
    }

    pub fn local_key(&self) -> Result<CollectionKey> {
        CollectionKey::parse(&self.local_path).ok_or_else(|| SyncError::InvalidPlan {
            message: format!("bad localPath: {:?}", self.local_path),
        })
    }

    pub fn remote_key(&self) -> Result<CollectionKey> {
        CollectionKey::parse(&self.remote_path).ok_or_else(|| SyncError::InvalidPlan {
            message: format!("bad remotePath: {:?}", self.remote_path),
        })
    }

    /// Decisions that would change something.
    pub fn pending(&self) -> impl Iterator<Item = (&String, &FileDecision)> {
        self.file_decisions
            .iter()
            .filter(|(_, d)| d.action != ActionKind::NoAction)
    }

    pub fn has_destructive(&self) -> bool {
        self.file_decisions.values().any(|d| d.action.is_destructive())
    }

    /// Contains a disagreement with a previous review or an unresolved conflict.
    pub fn needs_review(&self) -> bool {
        self.file_decisions.values().any(|d| {
            d.conflict_with_previous.is_some()
                || matches!(
                    d.reason,
                    ReasonCode::ConflictNeedsReview | ReasonCode::ContentConflictNeedsReview
                )
        })
    }

    /// Check keys and every decision for hand-edit mistakes.
    pub fn check(&self) -> Result<()> {
        self.local_key()?;
        self.remote_key()?;
        for (filename, decision) in &self.file_decisions {
            decision.check(filename)?;
        }
        Ok(())
    }
}

/// The persisted plan for a whole run, keyed by local `artist/collection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionDocument {
    #[serde(default)]
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    /// Set by a successful validation; cleared whenever the plan changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub decisions: BTreeMap<String, DecisionSet>,
}

impl DecisionDocument {
    pub fn new(generated_at: DateTime<Utc>) -> Self {
        Self {
            version: DECISION_DOCUMENT_VERSION,
            generated_at,
            validated_at: None,
            decisions: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, set: DecisionSet) {
        self.decisions.insert(set.local_path.clone(), set);
    }

    pub fn pending_count(&self) -> usize {
        self.decisions.values().map(|s| s.pending().count()).sum()
    }

    pub fn approved_count(&self) -> usize {
        self.decisions.values().filter(|s| s.completed).count()
    }

    /// Count of pending actions per kind, for summaries.
    pub fn action_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for set in self.decisions.values() {
            for (_, decision) in set.pending() {
                *counts.entry(decision.action.to_string()).or_insert(0) += 1;
            }
        }
        counts
    }
}

/// Reads and writes a decision document, keeping a `.bak` of the previous
/// version on every overwrite.
pub struct DecisionStore {
    path: PathBuf,
}

impl DecisionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<DecisionDocument>> {
        let document: Option<DecisionDocument> = atomic_read_json(&self.path)?;
        if let Some(doc) = &document {
            if doc.version > DECISION_DOCUMENT_VERSION {
                return Err(SyncError::config(format!(
                    "{} has schema version {}, newer than supported {}",
                    self.path.display(),
                    doc.version,
                    DECISION_DOCUMENT_VERSION
                )));
            }
            for set in doc.decisions.values() {
                set.check()?;
            }
        }
        Ok(document)
    }

    /// Load, treating a missing file as a configuration error.
    pub fn load_required(&self) -> Result<DecisionDocument> {
        self.load()?.ok_or_else(|| {
            SyncError::config(format!("decision file not found: {}", self.path.display()))
        })
    }

    pub fn save(&self, document: &DecisionDocument) -> Result<()> {
        debug!(
            "Writing {} decision sets to {}",
            document.decisions.len(),
            self.path.display()
        );
        atomic_write_json(&self.path, document, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::backup_path_for;
    use crate::plan::Direction;
    use tempfile::TempDir;

    fn sample_document() -> DecisionDocument {
        let mut decisions = FileDecisions::new();
        decisions.insert(
            "B.pdf".into(),
            FileDecision::new(ActionKind::CopyToRemote, ReasonCode::OnlyLocal)
                .with_sizes(Some(200), None),
        );
        decisions.insert(
            "D.pdf".into(),
            FileDecision::new(ActionKind::ConflictOverwrite, ReasonCode::SizeDiffersLocalLarger)
                .with_sizes(Some(20), Some(10))
                .with_direction(Direction::LocalToRemote),
        );
        let mut doc = DecisionDocument::new(Utc::now());
        doc.insert(DecisionSet::new(
            &CollectionKey::new("Queen", "Hits"),
            &CollectionKey::new("Queen", "Queen - Hits"),
            MatchTier::Perfect,
            1.0,
            decisions,
            Utc::now(),
        ));
        doc
    }

    #[test]
    fn test_wire_format() {
        let doc = sample_document();
        let json = serde_json::to_value(&doc).unwrap();
        let set = &json["decisions"]["Queen/Hits"];
        assert_eq!(set["localPath"], "Queen/Hits");
        assert_eq!(set["remotePath"], "Queen/Queen - Hits");
        assert_eq!(set["completed"], false);
        assert_eq!(set["matchTier"], "PERFECT");
        assert_eq!(set["fileDecisions"]["B.pdf"]["action"], "CopyToRemote");
        assert_eq!(set["fileDecisions"]["D.pdf"]["direction"], "localToRemote");
        assert!(json.get("validatedAt").is_none());
    }

    #[test]
    fn test_save_keeps_backup() {
        let tmp = TempDir::new().unwrap();
        let store = DecisionStore::new(tmp.path().join("decisions.json"));
        assert!(store.load().unwrap().is_none());

        let mut doc = sample_document();
        store.save(&doc).unwrap();
        doc.decisions.get_mut("Queen/Hits").unwrap().completed = true;
        store.save(&doc).unwrap();

        let loaded = store.load_required().unwrap();
        assert!(loaded.decisions["Queen/Hits"].completed);
        assert!(backup_path_for(store.path()).exists());
    }

    #[test]
    fn test_hand_edited_minimal_document_loads() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("decisions.json");
        std::fs::write(
            &path,
            r#"{
                "generatedAt": "2026-01-01T00:00:00Z",
                "decisions": {
                    "Queen/Hits": {
                        "localPath": "Queen/Hits",
                        "remotePath": "Queen/Hits",
                        "completed": true,
                        "generatedAt": "2026-01-01T00:00:00Z",
                        "fileDecisions": {
                            "old.pdf": { "action": "DeleteRemote", "reason": "MANUAL", "manual": true }
                        }
                    }
                }
            }"#,
        )
        .unwrap();

        let doc = DecisionStore::new(&path).load_required().unwrap();
        let set = &doc.decisions["Queen/Hits"];
        assert_eq!(set.match_tier, MatchTier::NoMatch);
        assert!(set.file_decisions["old.pdf"].manual);
        assert!(set.has_destructive());
    }

    #[test]
    fn test_broken_manual_rename_rejected_on_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("decisions.json");
        std::fs::write(
            &path,
            r#"{
                "generatedAt": "2026-01-01T00:00:00Z",
                "decisions": {
                    "Queen/Hits": {
                        "localPath": "Queen/Hits",
                        "remotePath": "Queen/Hits",
                        "generatedAt": "2026-01-01T00:00:00Z",
                        "fileDecisions": {
                            "a.pdf": { "action": "RenameLocal", "reason": "MANUAL", "manual": true }
                        }
                    }
                }
            }"#,
        )
        .unwrap();
        let err = DecisionStore::new(&path).load().unwrap_err();
        assert!(matches!(err, SyncError::InvalidPlan { .. }));
    }

    #[test]
    fn test_missing_required_file() {
        let tmp = TempDir::new().unwrap();
        let store = DecisionStore::new(tmp.path().join("absent.json"));
        assert!(store.load_required().unwrap_err().is_fatal());
    }
}
