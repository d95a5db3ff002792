//! Directory-backed object store with S3-style key-ordered pagination.
//!
//! Objects live at `root/bucket/<key>`. Used for offline runs and tests; it
//! behaves like the real backend where it matters (flat keys, paged
//! listings, per-key deletes) and can inject transient faults.

use super::{hash_if_present, ItemRef, ItemStore, ListPage, ObjectMeta, Side};
use crate::config::StoreConfig;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EmulatedObjectStore {
    root: PathBuf,
    bucket: String,
    page_size: usize,
    transient_failures: Arc<AtomicU32>,
    /// Sorted keys captured by the first page of the current scan.
    snapshot: Arc<Mutex<Option<Snapshot>>>,
}

type Snapshot = Arc<Vec<(String, u64)>>;

impl EmulatedObjectStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
            page_size: StoreConfig::DEFAULT_PAGE_SIZE,
            transient_failures: Arc::new(AtomicU32::new(0)),
            snapshot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Make the next `count` store calls fail with a transient error.
    pub fn inject_transient_failures(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn bucket_dir(&self) -> PathBuf {
        self.root.join(&self.bucket)
    }

    fn object_path(&self, item: &ItemRef) -> Result<PathBuf> {
        for component in [&item.artist, &item.collection, &item.filename] {
            if component.is_empty() || component == ".." || component.contains('/') {
                return Err(SyncError::InvalidPlan {
                    message: format!("invalid key component: {:?}", component),
                });
            }
        }
        Ok(self.bucket_dir().join(item.key()))
    }

    fn maybe_fail(&self, op: &str) -> Result<()> {
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .transient_failures
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(SyncError::Throttled {
                store: self.describe(),
                message: format!("injected SlowDown on {}", op),
            });
        }
        Ok(())
    }

    fn sorted_keys(bucket_dir: &Path) -> Vec<(String, u64)> {
        let mut keys = Vec::new();
        for entry in walkdir::WalkDir::new(bucket_dir)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(bucket_dir) else {
                continue;
            };
            let key = rel.to_string_lossy().replace('\\', "/");
            if key.ends_with(StoreConfig::TEMP_SUFFIX) {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            keys.push((key, size));
        }
        keys.sort();
        keys
    }

    async fn put_file(&self, src: &Path, dest: &Path) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io_with_path(e, parent))?;
        }
        let mut temp_name = dest.file_name().unwrap_or_default().to_os_string();
        temp_name.push(StoreConfig::TEMP_SUFFIX);
        let temp = dest.with_file_name(temp_name);
        let written = tokio::fs::copy(src, &temp)
            .await
            .map_err(|e| SyncError::io_with_path(e, src))?;
        tokio::fs::rename(&temp, dest)
            .await
            .map_err(|e| SyncError::io_with_path(e, dest))?;
        Ok(written)
    }
}

#[async_trait]
impl ItemStore for EmulatedObjectStore {
    fn side(&self) -> Side {
        Side::Remote
    }

    fn describe(&self) -> String {
        format!("emulated://{}#{}", self.root.display(), self.bucket)
    }

    async fn list_page(&self, continuation: Option<String>) -> Result<ListPage> {
        self.maybe_fail("list")?;
        let bucket_dir = self.bucket_dir();
        let page_size = self.page_size;

        let cached = match &continuation {
            Some(_) => self.snapshot.lock().unwrap_or_else(|p| p.into_inner()).clone(),
            None => None,
        };

        let keys: Snapshot = match cached {
            Some(keys) => keys,
            None => {
                let keys = tokio::task::spawn_blocking(move || {
                    if bucket_dir.exists() {
                        Self::sorted_keys(&bucket_dir)
                    } else {
                        Vec::new()
                    }
                })
                .await?;
                let keys = Arc::new(keys);
                *self.snapshot.lock().unwrap_or_else(|p| p.into_inner()) = Some(keys.clone());
                keys
            }
        };

        let start = continuation
            .as_deref()
            .map_or(0, |token| keys.partition_point(|(key, _)| key.as_str() <= token));
        let end = (start + page_size).min(keys.len());

        let mut entries = Vec::new();
        for (key, size) in &keys[start..end] {
            match ItemRef::from_key(key) {
                Some(item) => entries.push(ObjectMeta {
                    item,
                    size: *size,
                    content_hash: None,
                }),
                None => debug!("Ignoring key outside artist/collection/file layout: {}", key),
            }
        }

        let next = if end < keys.len() {
            Some(keys[end - 1].0.clone())
        } else {
            self.snapshot.lock().unwrap_or_else(|p| p.into_inner()).take();
            None
        };
        Ok(ListPage { entries, next })
    }

    async fn head(&self, item: &ItemRef) -> Result<Option<ObjectMeta>> {
        self.maybe_fail("head")?;
        let path = self.object_path(item)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(ObjectMeta {
                item: item.clone(),
                size: meta.len(),
                content_hash: None,
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::io_with_path(e, path)),
        }
    }

    async fn download_to(&self, item: &ItemRef, dest: &Path) -> Result<u64> {
        self.maybe_fail("get")?;
        let path = self.object_path(item)?;
        tokio::fs::copy(&path, dest)
            .await
            .map_err(|e| SyncError::io_with_path(e, &path))
    }

    async fn upload_from(&self, item: &ItemRef, src: &Path) -> Result<u64> {
        self.maybe_fail("put")?;
        let dest = self.object_path(item)?;
        self.put_file(src, &dest).await
    }

    async fn copy_within(&self, from: &ItemRef, to: &ItemRef) -> Result<u64> {
        self.maybe_fail("copy")?;
        let src = self.object_path(from)?;
        let dest = self.object_path(to)?;
        self.put_file(&src, &dest).await
    }

    async fn delete(&self, item: &ItemRef) -> Result<bool> {
        self.maybe_fail("delete")?;
        let path = self.object_path(item)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SyncError::io_with_path(e, path)),
        }
    }

    async fn content_hash(&self, item: &ItemRef) -> Result<Option<String>> {
        self.maybe_fail("hash")?;
        hash_if_present(self.object_path(item)?).await
    }
}
