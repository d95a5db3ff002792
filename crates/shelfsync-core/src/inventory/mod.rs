//! Inventory scanning.
//!
//! Groups every item of one store by `(artist, collection)`, consuming the
//! store's paginated listing lazily so the whole bucket is never listed in one
//! call.

mod hashing;

pub use hashing::{hash_inventory, hash_remote_counterparts, sha256_file};

use crate::config::ReconcileConfig;
use crate::error::Result;
use crate::store::{list_pages, ItemStore, ObjectMeta, Side};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

/// `(artist, collection folder or prefix)` on one side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionKey {
    pub artist: String,
    pub name: String,
}

impl CollectionKey {
    pub fn new(artist: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            name: name.into(),
        }
    }

    /// Parse `artist/name`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (artist, name) = raw.split_once('/')?;
        if artist.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(artist, name))
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.artist, self.name)
    }
}

/// One file of a collection as seen on one side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub filename: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Item {
    pub fn new(filename: impl Into<String>, size: u64) -> Self {
        Self {
            filename: filename.into(),
            size,
            content_hash: None,
        }
    }
}

impl From<ObjectMeta> for Item {
    fn from(meta: ObjectMeta) -> Self {
        Self {
            filename: meta.item.filename,
            size: meta.size,
            content_hash: meta.content_hash,
        }
    }
}

/// Counters logged after a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub pages: usize,
    pub collections: usize,
    pub items: usize,
    pub bytes: u64,
    pub ignored: usize,
}

/// Every collection of one store.
#[derive(Debug, Clone)]
pub struct Inventory {
    pub side: Side,
    /// Items per collection, sorted by filename.
    pub collections: BTreeMap<CollectionKey, Vec<Item>>,
}

impl Inventory {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            collections: BTreeMap::new(),
        }
    }

    /// Add one item; used by the scanner and by tests that build inventories
    /// by hand.
    pub fn insert(&mut self, key: CollectionKey, item: Item) {
        self.collections.entry(key).or_default().push(item);
    }

    pub fn get(&self, key: &CollectionKey) -> Option<&[Item]> {
        self.collections.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    pub fn item_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.collections
            .values()
            .flat_map(|items| items.iter().map(|i| i.size))
            .sum()
    }

    fn sort_items(&mut self) {
        for items in self.collections.values_mut() {
            items.sort_by(|a, b| a.filename.cmp(&b.filename));
            items.dedup_by(|a, b| a.filename == b.filename);
        }
    }
}

/// Scan one store into an [`Inventory`].
///
/// Hidden entries, temp files and `ignoredFilenames` are skipped.
pub async fn scan_store(store: &dyn ItemStore, config: &ReconcileConfig) -> Result<Inventory> {
    let mut inventory = Inventory::new(store.side());
    let mut stats = ScanStats::default();

    let mut pages = std::pin::pin!(list_pages(store));
    while let Some(page) = pages.try_next().await? {
        stats.pages += 1;
        for entry in page.entries {
            if entry.item.artist.starts_with('.')
                || entry.item.collection.starts_with('.')
                || config.is_ignored(&entry.item.filename)
            {
                stats.ignored += 1;
                continue;
            }
            let key = CollectionKey::new(&entry.item.artist, &entry.item.collection);
            inventory.insert(key, Item::from(entry));
        }
        debug!(
            "Scanned page {} of {} ({} collections so far)",
            stats.pages,
            store.describe(),
            inventory.len()
        );
    }

    inventory.sort_items();
    stats.collections = inventory.len();
    stats.items = inventory.item_count();
    stats.bytes = inventory.total_bytes();

    info!(
        side = %store.side(),
        pages = stats.pages,
        collections = stats.collections,
        items = stats.items,
        bytes = stats.bytes,
        ignored = stats.ignored,
        "Scanned {}",
        store.describe()
    );
    Ok(inventory)
}
