//! Content hashing for local items.

use super::{CollectionKey, Inventory, Item};
use crate::config::ExecutorConfig;
use crate::error::{Result, SyncError};
use crate::store::{ItemRef, ItemStore};
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Algorithm tag prefixed to every hash this crate produces.
pub const HASH_PREFIX: &str = "sha256:";

/// Streaming SHA-256 of a file, formatted `sha256:<hex>`.
pub fn sha256_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path).map_err(|e| SyncError::io_with_path(e, path))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; ExecutorConfig::COPY_CHUNK_SIZE];
    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| SyncError::io_with_path(e, path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{}{}", HASH_PREFIX, hex::encode(hasher.finalize())))
}

/// Fill in `content_hash` for every item of a local inventory.
///
/// Collections are hashed in parallel, at most `concurrency` at a time.
/// Unreadable files keep `None` and are logged; returns the number hashed.
pub async fn hash_inventory(
    inventory: &mut Inventory,
    root: &Path,
    concurrency: usize,
) -> Result<usize> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut join_set = JoinSet::new();

    for (key, items) in &inventory.collections {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SyncError::Other("hashing worker pool closed".to_string()))?;
        let dir = root.join(&key.artist).join(&key.name);
        let filenames: Vec<String> = items.iter().map(|i| i.filename.clone()).collect();
        let key = key.clone();

        join_set.spawn_blocking(move || {
            let _permit = permit;
            let hashes: Vec<(String, Result<String>)> = filenames
                .into_iter()
                .map(|filename| {
                    let hash = sha256_file(dir.join(&filename));
                    (filename, hash)
                })
                .collect();
            (key, hashes)
        });
    }

    let mut hashed = 0usize;
    let mut failed = 0usize;
    while let Some(joined) = join_set.join_next().await {
        let (key, hashes) = joined?;
        let Some(items) = inventory.collections.get_mut(&key) else {
            continue;
        };
        for (filename, hash) in hashes {
            match hash {
                Ok(hash) => {
                    if let Some(item) = items.iter_mut().find(|i| i.filename == filename) {
                        item.content_hash = Some(hash);
                        hashed += 1;
                    }
                }
                Err(e) => {
                    failed += 1;
                    warn!("Could not hash {}/{}: {}", key, filename, e);
                }
            }
        }
    }

    info!("Hashed {} local items ({} failed)", hashed, failed);
    Ok(hashed)
}

/// Fetch remote hashes for the items a hash can still tell apart: those
/// sharing a name and size with a hashed local item.
///
/// Returns the number of remote items hashed. Failed lookups leave the hash
/// unset, which makes the pair compare by size alone.
pub async fn hash_remote_counterparts(
    store: &dyn ItemStore,
    key: &CollectionKey,
    local: &[Item],
    remote: &mut [Item],
    concurrency: usize,
) -> Result<usize> {
    let wanted: Vec<(usize, ItemRef)> = remote
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            r.content_hash.is_none()
                && local.iter().any(|l| {
                    l.filename == r.filename && l.size == r.size && l.content_hash.is_some()
                })
        })
        .map(|(i, r)| (i, ItemRef::new(&key.artist, &key.name, r.filename.as_str())))
        .collect();
    if wanted.is_empty() {
        return Ok(0);
    }

    let fetched: Vec<(usize, ItemRef, Result<Option<String>>)> = stream::iter(wanted)
        .map(|(i, item)| async move {
            let hash = store.content_hash(&item).await;
            (i, item, hash)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut hashed = 0usize;
    for (i, item, hash) in fetched {
        match hash {
            Ok(Some(hash)) => {
                remote[i].content_hash = Some(hash);
                hashed += 1;
            }
            Ok(None) => debug!("{} vanished before it could be hashed", item),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!("Could not hash {}: {}", item, e),
        }
    }
    debug!("Hashed {} remote items of {}", hashed, key);
    Ok(hashed)
}
