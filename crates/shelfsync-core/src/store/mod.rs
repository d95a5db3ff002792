//! Store abstraction over the two sides of a reconciliation.
//!
//! Both the local directory tree and the remote object store are addressed
//! the same way: `artist/collection/filename`. The executor, validator and
//! scanner only ever talk to [`ItemStore`].
//!
//! ```text
//! ItemStore (trait)
//!     ├── LocalStore          - artist/collection directory tree
//!     ├── EmulatedObjectStore - directory-backed bucket, key-ordered pages
//!     ├── S3ObjectStore       - aws-sdk-s3 (feature "s3")
//!     └── ResilientStore      - timeout + retry wrapper for any of the above
//! ```

mod emulated;
mod local;
mod resilient;
#[cfg(feature = "s3")]
mod s3;

pub use emulated::EmulatedObjectStore;
pub use local::LocalStore;
pub use resilient::ResilientStore;
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;

use crate::config::ReconcileConfig;
use crate::inventory::sha256_file;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Which store an item lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Remote,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Local => Side::Remote,
            Side::Remote => Side::Local,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Local => "local",
            Side::Remote => "remote",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of one item file, independent of side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemRef {
    pub artist: String,
    pub collection: String,
    pub filename: String,
}

impl ItemRef {
    pub fn new(
        artist: impl Into<String>,
        collection: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            artist: artist.into(),
            collection: collection.into(),
            filename: filename.into(),
        }
    }

    /// Same collection, different filename.
    pub fn with_filename(&self, filename: impl Into<String>) -> Self {
        Self {
            artist: self.artist.clone(),
            collection: self.collection.clone(),
            filename: filename.into(),
        }
    }

    /// `artist/collection/filename`
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.artist, self.collection, self.filename)
    }

    /// Parse `artist/collection/filename`; anything at a different depth is `None`.
    pub fn from_key(key: &str) -> Option<Self> {
        let mut parts = key.split('/');
        let artist = parts.next()?;
        let collection = parts.next()?;
        let filename = parts.next()?;
        if parts.next().is_some() || artist.is_empty() || collection.is_empty() || filename.is_empty()
        {
            return None;
        }
        Some(Self::new(artist, collection, filename))
    }
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.artist, self.collection, self.filename)
    }
}

/// What a listing or head call knows about one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub item: ItemRef,
    pub size: u64,
    /// `"<algorithm>:<hex>"`, only when cheaply available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<ObjectMeta>,
    /// Continuation token for the next page; `None` on the last page.
    pub next: Option<String>,
}

/// Uniform access to one side of the reconciliation.
///
/// Writes replace whatever is at the destination. Callers that must not
/// overwrite check with [`ItemStore::head`] first and pick a free name.
#[async_trait]
pub trait ItemStore: Send + Sync {
    fn side(&self) -> Side;

    /// Human-readable location, used in logs and reports.
    fn describe(&self) -> String;

    async fn list_page(&self, continuation: Option<String>) -> Result<ListPage>;

    async fn head(&self, item: &ItemRef) -> Result<Option<ObjectMeta>>;

    /// Write the item's bytes to a local file, returning the byte count.
    async fn download_to(&self, item: &ItemRef, dest: &Path) -> Result<u64>;

    /// Store the bytes of a local file as `item`, returning the byte count.
    async fn upload_from(&self, item: &ItemRef, src: &Path) -> Result<u64>;

    /// Copy one item to another name inside this store.
    async fn copy_within(&self, from: &ItemRef, to: &ItemRef) -> Result<u64>;

    /// Delete the item. Returns `false` when it was already absent.
    async fn delete(&self, item: &ItemRef) -> Result<bool>;

    /// `sha256:<hex>` of the item's bytes, `None` when it is absent.
    ///
    /// The default downloads into a temp file and hashes that; stores with
    /// direct file access override it.
    async fn content_hash(&self, item: &ItemRef) -> Result<Option<String>> {
        if self.head(item).await?.is_none() {
            return Ok(None);
        }
        let staged = tempfile::NamedTempFile::new()
            .map_err(|e| SyncError::io_with_path(e, std::env::temp_dir()))?;
        self.download_to(item, staged.path()).await?;
        let path = staged.path().to_path_buf();
        let hash = tokio::task::spawn_blocking(move || sha256_file(path)).await??;
        Ok(Some(hash))
    }
}

/// Hash a store-owned file on a blocking thread; `None` when it is absent.
pub(crate) async fn hash_if_present(path: PathBuf) -> Result<Option<String>> {
    tokio::task::spawn_blocking(move || {
        if !path.is_file() {
            return Ok(None);
        }
        sha256_file(&path).map(Some)
    })
    .await?
}

/// Stream every page of a store's listing, fetching lazily.
pub fn list_pages<'a>(store: &'a dyn ItemStore) -> impl Stream<Item = Result<ListPage>> + 'a {
    futures::stream::try_unfold(Some(None::<String>), move |state| async move {
        let Some(token) = state else {
            return Ok(None);
        };
        let page = store.list_page(token).await?;
        let next_state = page.next.clone().map(Some);
        Ok::<_, SyncError>(Some((page, next_state)))
    })
}

/// Parsed store location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreUri {
    /// Plain directory tree.
    Local(PathBuf),
    /// `emulated://<dir>#<bucket>`
    Emulated { root: PathBuf, bucket: String },
    /// `s3://bucket/prefix`
    S3 { bucket: String, prefix: String },
}

impl StoreUri {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SyncError::config("store location is required"));
        }

        if let Some(rest) = raw.strip_prefix("s3://") {
            let mut parts = rest.splitn(2, '/');
            let bucket = parts.next().unwrap_or_default().trim();
            let prefix = parts.next().unwrap_or_default().trim_matches('/');
            if bucket.is_empty() {
                return Err(SyncError::config(format!("s3 location missing bucket: {}", raw)));
            }
            return Ok(StoreUri::S3 {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
            });
        }

        if let Some(rest) = raw.strip_prefix("emulated://") {
            let (root, bucket) = rest.split_once('#').ok_or_else(|| {
                SyncError::config(format!("emulated location needs '#<bucket>': {}", raw))
            })?;
            if root.is_empty() || bucket.is_empty() {
                return Err(SyncError::config(format!("invalid emulated location: {}", raw)));
            }
            return Ok(StoreUri::Emulated {
                root: PathBuf::from(root),
                bucket: bucket.to_string(),
            });
        }

        if raw.contains("://") {
            return Err(SyncError::config(format!("unsupported store scheme: {}", raw)));
        }

        Ok(StoreUri::Local(PathBuf::from(raw)))
    }
}

/// Open the remote side described by `uri`, wrapped with timeouts and retries.
pub async fn open_remote(uri: &StoreUri, config: &ReconcileConfig) -> Result<Arc<dyn ItemStore>> {
    let inner: Arc<dyn ItemStore> = match uri {
        StoreUri::Local(path) => {
            return Err(SyncError::config(format!(
                "remote store must be s3:// or emulated://, got directory {}",
                path.display()
            )))
        }
        StoreUri::Emulated { root, bucket } => Arc::new(
            EmulatedObjectStore::new(root.clone(), bucket.clone()).with_page_size(config.page_size),
        ),
        #[cfg(feature = "s3")]
        StoreUri::S3 { bucket, prefix } => Arc::new(
            S3ObjectStore::connect(bucket.clone(), prefix.clone())
                .await?
                .with_page_size(config.page_size),
        ),
        #[cfg(not(feature = "s3"))]
        StoreUri::S3 { .. } => {
            return Err(SyncError::config(
                "s3:// locations require building with the `s3` feature",
            ))
        }
    };

    Ok(Arc::new(ResilientStore::new(
        inner,
        config.retry.to_retry_config(),
        config.remote_timeout(),
    )))
}

/// Open the local side rooted at `root`.
pub fn open_local(root: &Path) -> Result<Arc<dyn ItemStore>> {
    if !root.is_dir() {
        return Err(SyncError::config(format!(
            "local store root is not a directory: {}",
            root.display()
        )));
    }
    Ok(Arc::new(LocalStore::new(root)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_ref_key_round_trip() {
        let item = ItemRef::from_key("Queen/Greatest Hits/Bohemian Rhapsody.pdf").unwrap();
        assert_eq!(item.artist, "Queen");
        assert_eq!(item.filename, "Bohemian Rhapsody.pdf");
        assert_eq!(item.key(), "Queen/Greatest Hits/Bohemian Rhapsody.pdf");
    }

    #[test]
    fn test_item_ref_rejects_wrong_depth() {
        assert!(ItemRef::from_key("Queen/Song.pdf").is_none());
        assert!(ItemRef::from_key("a/b/c/d.pdf").is_none());
        assert!(ItemRef::from_key("a//c.pdf").is_none());
    }

    #[test]
    fn test_parse_store_uris() {
        assert_eq!(
            StoreUri::parse("s3://songs/library/").unwrap(),
            StoreUri::S3 {
                bucket: "songs".into(),
                prefix: "library".into()
            }
        );
        assert_eq!(
            StoreUri::parse("emulated:///tmp/objects#songs").unwrap(),
            StoreUri::Emulated {
                root: PathBuf::from("/tmp/objects"),
                bucket: "songs".into()
            }
        );
        assert_eq!(
            StoreUri::parse("/data/library").unwrap(),
            StoreUri::Local(PathBuf::from("/data/library"))
        );
        assert!(StoreUri::parse("s3://").is_err());
        assert!(StoreUri::parse("ftp://host/x").is_err());
        assert!(StoreUri::parse("emulated:///tmp/objects").is_err());
    }

    #[test]
    fn test_side_other() {
        assert_eq!(Side::Local.other(), Side::Remote);
        assert_eq!(Side::Remote.other(), Side::Local);
    }
}
