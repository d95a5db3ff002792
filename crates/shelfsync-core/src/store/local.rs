//! Local filesystem side: `root/artist/collection/filename`.

use super::{hash_if_present, ItemRef, ItemStore, ListPage, ObjectMeta, Side};
use crate::config::StoreConfig;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A two-level directory tree of collections.
///
/// Listing pages are one artist directory each, in name order, so a scan
/// never holds the whole tree's directory entries at once.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of an item, rejecting names that would escape the tree.
    pub fn path_for(&self, item: &ItemRef) -> Result<PathBuf> {
        for component in [&item.artist, &item.collection, &item.filename] {
            validate_component(component)?;
        }
        Ok(self
            .root
            .join(&item.artist)
            .join(&item.collection)
            .join(&item.filename))
    }

    fn list_artist_dirs(root: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(root).map_err(|e| SyncError::io_with_path(e, root))? {
            let entry = entry.map_err(|e| SyncError::io_with_path(e, root))?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn list_artist(root: &Path, artist: &str) -> Result<Vec<ObjectMeta>> {
        let artist_dir = root.join(artist);
        let mut entries = Vec::new();

        for collection in walkdir::WalkDir::new(&artist_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let collection = collection.map_err(|e| SyncError::Io {
                message: e.to_string(),
                path: Some(artist_dir.clone()),
                source: None,
            })?;
            if !collection.file_type().is_dir() {
                continue;
            }
            let Some(collection_name) = collection.file_name().to_str() else {
                continue;
            };
            if collection_name.starts_with('.') {
                continue;
            }

            for file in walkdir::WalkDir::new(collection.path())
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
            {
                let file = file.map_err(|e| SyncError::Io {
                    message: e.to_string(),
                    path: Some(collection.path().to_path_buf()),
                    source: None,
                })?;
                if !file.file_type().is_file() {
                    continue;
                }
                let Some(filename) = file.file_name().to_str() else {
                    debug!("Skipping non-UTF-8 filename in {}", collection.path().display());
                    continue;
                };
                let size = file
                    .metadata()
                    .map_err(|e| SyncError::Io {
                        message: e.to_string(),
                        path: Some(file.path().to_path_buf()),
                        source: None,
                    })?
                    .len();
                entries.push(ObjectMeta {
                    item: ItemRef::new(artist, collection_name, filename),
                    size,
                    content_hash: None,
                });
            }
        }

        Ok(entries)
    }

    async fn write_via_temp(&self, src: &Path, dest: &Path) -> Result<u64> {
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
        if let Err(e) = tokio::fs::rename(&temp, dest).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(SyncError::io_with_path(e, dest));
        }
        Ok(written)
    }
}

fn validate_component(component: &str) -> Result<()> {
    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains('/')
        || component.contains('\\')
    {
        return Err(SyncError::InvalidPlan {
            message: format!("unsafe path component: {:?}", component),
        });
    }
    Ok(())
}

#[async_trait]
impl ItemStore for LocalStore {
    fn side(&self) -> Side {
        Side::Local
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn list_page(&self, continuation: Option<String>) -> Result<ListPage> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || -> Result<ListPage> {
            let artists = Self::list_artist_dirs(&root)?;
            let mut remaining = artists
                .iter()
                .filter(|name| continuation.as_deref().map_or(true, |t| name.as_str() > t));

            let Some(artist) = remaining.next() else {
                return Ok(ListPage::default());
            };
            let entries = Self::list_artist(&root, artist)?;
            let next = remaining.next().map(|_| artist.clone());
            Ok(ListPage { entries, next })
        })
        .await?
    }

    async fn head(&self, item: &ItemRef) -> Result<Option<ObjectMeta>> {
        let path = self.path_for(item)?;
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
        let path = self.path_for(item)?;
        tokio::fs::copy(&path, dest)
            .await
            .map_err(|e| SyncError::io_with_path(e, &path))
    }

    async fn upload_from(&self, item: &ItemRef, src: &Path) -> Result<u64> {
        let dest = self.path_for(item)?;
        self.write_via_temp(src, &dest).await
    }

    async fn copy_within(&self, from: &ItemRef, to: &ItemRef) -> Result<u64> {
        let src = self.path_for(from)?;
        let dest = self.path_for(to)?;
        self.write_via_temp(&src, &dest).await
    }

    async fn delete(&self, item: &ItemRef) -> Result<bool> {
        let path = self.path_for(item)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SyncError::io_with_path(e, path)),
        }
    }

    async fn content_hash(&self, item: &ItemRef) -> Result<Option<String>> {
        hash_if_present(self.path_for(item)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::list_pages;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, bytes: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    #[tokio::test]
    async fn test_pages_are_one_artist_each() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "ABBA/Gold/Waterloo.pdf", b"12345");
        write(tmp.path(), "Queen/Hits/Bohemian Rhapsody.pdf", b"123");
        write(tmp.path(), "Queen/Hits/Somebody.pdf", b"1");
        write(tmp.path(), ".manifests/Queen/Hits.json", b"{}");

        let store = LocalStore::new(tmp.path());
        let pages: Vec<ListPage> = list_pages(&store).try_collect().await.unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].entries.len(), 1);
        assert_eq!(pages[0].entries[0].size, 5);
        assert_eq!(pages[1].entries.len(), 2);
        assert!(pages[1].next.is_none());
    }

    #[tokio::test]
    async fn test_head_upload_delete() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path().join("lib"));
        let src = tmp.path().join("src.pdf");
        fs::write(&src, b"abcdef").unwrap();
        let item = ItemRef::new("Queen", "Hits", "Song.pdf");

        assert!(store.head(&item).await.unwrap().is_none());
        assert_eq!(store.upload_from(&item, &src).await.unwrap(), 6);
        assert_eq!(store.head(&item).await.unwrap().unwrap().size, 6);

        assert!(store.delete(&item).await.unwrap());
        assert!(!store.delete(&item).await.unwrap());
    }

    #[test]
    fn test_path_for_rejects_traversal() {
        let store = LocalStore::new("/lib");
        let item = ItemRef::new("Queen", "..", "Song.pdf");
        assert!(matches!(store.path_for(&item), Err(SyncError::InvalidPlan { .. })));
    }
}
