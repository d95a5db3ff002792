//! Collection manifests.
//!
//! A manifest is an externally owned JSON document per collection at
//! `<manifest root>/<artist>/<collection>.json`. Only item filenames are ever
//! rewritten here, after a successful rename; every other field, known or
//! not, is carried through unchanged.

use super::atomic::{atomic_read_json, atomic_write_json};
use crate::config::PathsConfig;
use crate::error::Result;
use crate::inventory::CollectionKey;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestItem {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub collection_id: String,
    #[serde(default)]
    pub items: Vec<ManifestItem>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    pub fn references(&self, filename: &str) -> bool {
        self.items.iter().any(|i| i.filename == filename)
    }
}

/// What happened to one rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestRename {
    Updated,
    /// The manifest already names the new file.
    AlreadyCurrent,
    NoManifest,
    /// Neither the old nor the new name is listed.
    NotReferenced,
}

/// Counters from one [`ManifestStore::apply_renames`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestUpdateStats {
    pub updated: usize,
    pub already_current: usize,
    pub missing_manifest: usize,
    pub not_referenced: usize,
    pub failed: usize,
}

/// Reads and rewrites manifests under one root.
pub struct ManifestStore {
    root: PathBuf,
    /// Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl ManifestStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CollectionKey) -> PathBuf {
        self.root
            .join(&key.artist)
            .join(format!("{}.{}", key.name, PathsConfig::MANIFEST_EXTENSION))
    }

    pub fn load(&self, key: &CollectionKey) -> Result<Option<Manifest>> {
        atomic_read_json(&self.path_for(key))
    }

    pub fn save(&self, key: &CollectionKey, manifest: &Manifest) -> Result<()> {
        atomic_write_json(&self.path_for(key), manifest, false)
    }

    /// Rewrite the reference to `old` as `new`. Writes nothing unless the
    /// manifest still lists `old`; when it lists both, the `old` entry is
    /// dropped.
    pub fn rename_item(&self, key: &CollectionKey, old: &str, new: &str) -> Result<ManifestRename> {
        self.rename_items(key, &[(old, new)]).map(|mut r| r.pop().unwrap_or(ManifestRename::NoManifest))
    }

    fn rename_items(&self, key: &CollectionKey, renames: &[(&str, &str)]) -> Result<Vec<ManifestRename>> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());

        let Some(mut manifest) = self.load(key)? else {
            return Ok(vec![ManifestRename::NoManifest; renames.len()]);
        };

        let mut outcomes = Vec::with_capacity(renames.len());
        let mut changed = false;
        for (old, new) in renames {
            let position = manifest.items.iter().position(|i| i.filename == *old);
            let outcome = match position {
                Some(index) if old != new => {
                    if manifest.references(new) {
                        // Both names listed: the old entry is stale.
                        manifest.items.remove(index);
                    } else {
                        manifest.items[index].filename = new.to_string();
                    }
                    changed = true;
                    ManifestRename::Updated
                }
                _ if manifest.references(new) => ManifestRename::AlreadyCurrent,
                _ => ManifestRename::NotReferenced,
            };
            outcomes.push(outcome);
        }

        if changed {
            self.save(key, &manifest)?;
            debug!("Rewrote manifest {}", self.path_for(key).display());
        }
        Ok(outcomes)
    }

    /// Apply successful renames, given as `(artist/collection, old, new)`.
    ///
    /// Safe to repeat. A failing manifest is logged and counted; the others
    /// are still updated.
    pub fn apply_renames<'a>(
        &self,
        renames: impl IntoIterator<Item = (&'a str, &'a str, &'a str)>,
    ) -> ManifestUpdateStats {
        let mut by_collection: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();
        for (collection, old, new) in renames {
            by_collection.entry(collection).or_default().push((old, new));
        }

        let mut stats = ManifestUpdateStats::default();
        for (collection, pairs) in by_collection {
            let Some(key) = CollectionKey::parse(collection) else {
                warn!("Cannot locate manifest for malformed collection key {:?}", collection);
                stats.failed += pairs.len();
                continue;
            };
            match self.rename_items(&key, &pairs) {
                Ok(outcomes) => {
                    for outcome in outcomes {
                        match outcome {
                            ManifestRename::Updated => stats.updated += 1,
                            ManifestRename::AlreadyCurrent => stats.already_current += 1,
                            ManifestRename::NoManifest => {
                                debug!("No manifest for {}", key);
                                stats.missing_manifest += 1
                            }
                            ManifestRename::NotReferenced => {
                                warn!("Manifest for {} lists neither old nor new name", key);
                                stats.not_referenced += 1
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to update manifest for {}: {}", key, e);
                    stats.failed += pairs.len();
                }
            }
        }

        if stats.updated > 0 || stats.failed > 0 {
            info!(
                updated = stats.updated,
                already_current = stats.already_current,
                missing = stats.missing_manifest,
                failed = stats.failed,
                "Updated manifests"
            );
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"{
        "collectionId": "queen-hits",
        "publisher": "EMI",
        "items": [
            { "filename": "Queen, Bowie - Pressure.pdf", "size": 12, "pages": 4 },
            { "filename": "Somebody.pdf", "size": 3 }
        ]
    }"#;

    fn store_with_manifest() -> (TempDir, ManifestStore, CollectionKey) {
        let tmp = TempDir::new().unwrap();
        let store = ManifestStore::new(tmp.path());
        let key = CollectionKey::new("Queen", "Hits");
        let path = store.path_for(&key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, MANIFEST).unwrap();
        (tmp, store, key)
    }

    #[test]
    fn test_path_layout() {
        let store = ManifestStore::new("/m");
        assert_eq!(
            store.path_for(&CollectionKey::new("Queen", "Hits")),
            PathBuf::from("/m/Queen/Hits.json")
        );
    }

    #[test]
    fn test_rename_preserves_unknown_fields() {
        let (_tmp, store, key) = store_with_manifest();

        let outcome = store
            .rename_item(&key, "Queen, Bowie - Pressure.pdf", "Queen - Pressure.pdf")
            .unwrap();
        assert_eq!(outcome, ManifestRename::Updated);

        let manifest = store.load(&key).unwrap().unwrap();
        assert_eq!(manifest.collection_id, "queen-hits");
        assert_eq!(manifest.extra["publisher"], "EMI");
        assert_eq!(manifest.items[0].filename, "Queen - Pressure.pdf");
        assert_eq!(manifest.items[0].extra["pages"], 4);
    }

    #[test]
    fn test_rename_is_idempotent() {
        let (_tmp, store, key) = store_with_manifest();
        let renames = [("Queen/Hits", "Queen, Bowie - Pressure.pdf", "Queen - Pressure.pdf")];

        let first = store.apply_renames(renames);
        assert_eq!(first.updated, 1);
        let modified = std::fs::metadata(store.path_for(&key)).unwrap().modified().unwrap();

        let second = store.apply_renames(renames);
        assert_eq!(second.updated, 0);
        assert_eq!(second.already_current, 1);
        assert_eq!(
            std::fs::metadata(store.path_for(&key)).unwrap().modified().unwrap(),
            modified
        );
    }

    #[test]
    fn test_stale_old_entry_dropped_when_new_is_listed() {
        let (_tmp, store, key) = store_with_manifest();
        let mut manifest = store.load(&key).unwrap().unwrap();
        let mut renamed = manifest.items[0].clone();
        renamed.filename = "Queen - Pressure.pdf".to_string();
        manifest.items.push(renamed);
        store.save(&key, &manifest).unwrap();

        let outcome = store
            .rename_item(&key, "Queen, Bowie - Pressure.pdf", "Queen - Pressure.pdf")
            .unwrap();
        assert_eq!(outcome, ManifestRename::Updated);

        let manifest = store.load(&key).unwrap().unwrap();
        assert!(!manifest.references("Queen, Bowie - Pressure.pdf"));
        let listed = manifest
            .items
            .iter()
            .filter(|i| i.filename == "Queen - Pressure.pdf")
            .count();
        assert_eq!(listed, 1);
        assert_eq!(manifest.items.len(), 2);
    }

    #[test]
    fn test_missing_manifest_skipped() {
        let tmp = TempDir::new().unwrap();
        let store = ManifestStore::new(tmp.path());
        let stats = store.apply_renames([("Queen/Hits", "a.pdf", "b.pdf")]);
        assert_eq!(stats.missing_manifest, 1);
        assert_eq!(stats.failed, 0);
    }
}
