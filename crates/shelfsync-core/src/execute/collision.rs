//! Free-name resolution shared by every writing action.

use crate::config::ExecutorConfig;
use crate::error::{Result, SyncError};
use crate::store::{ItemRef, ItemStore};
use tracing::debug;

/// Where a write should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Write to `item`. `collided` is set when `item` is not the planned name.
    Write { item: ItemRef, collided: bool },
    /// `item` already holds an object of the source's size; nothing to write.
    Satisfied { item: ItemRef },
}

impl Resolution {
    pub fn item(&self) -> &ItemRef {
        match self {
            Resolution::Write { item, .. } | Resolution::Satisfied { item } => item,
        }
    }
}

/// `Song.pdf`, 2 -> `Song-2.pdf`
pub fn suffixed_name(filename: &str, n: u32) -> String {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => format!("{}-{}{}", &filename[..idx], n, &filename[idx..]),
        _ => format!("{}-{}", filename, n),
    }
}

/// Pick the name a write to `planned` should actually use.
///
/// With `overwrite` the planned name is always written. Otherwise an
/// occupied name is never reused: `-2`, `-3`, ... are tried up to
/// [`ExecutorConfig::MAX_COLLISION_SUFFIX`]. A candidate that already holds
/// an object of `source_size` bytes is reported as satisfied, so a collided
/// copy from an earlier run is not made twice.
pub async fn resolve_free_name(
    store: &dyn ItemStore,
    planned: &ItemRef,
    overwrite: bool,
    source_size: Option<u64>,
) -> Result<Resolution> {
    let existing = store.head(planned).await?;
    match existing {
        None => {
            return Ok(Resolution::Write {
                item: planned.clone(),
                collided: false,
            })
        }
        // An overwrite settles a conflict the sizes cannot see, so it always
        // writes.
        Some(_) if overwrite => {
            return Ok(Resolution::Write {
                item: planned.clone(),
                collided: false,
            })
        }
        Some(meta) if Some(meta.size) == source_size => {
            return Ok(Resolution::Satisfied {
                item: planned.clone(),
            })
        }
        Some(_) => {}
    }

    for n in 2..=ExecutorConfig::MAX_COLLISION_SUFFIX {
        let candidate = planned.with_filename(suffixed_name(&planned.filename, n));
        match store.head(&candidate).await? {
            None => {
                debug!("{} is taken, using {}", planned, candidate.filename);
                return Ok(Resolution::Write {
                    item: candidate,
                    collided: true,
                });
            }
            Some(meta) if Some(meta.size) == source_size => {
                return Ok(Resolution::Satisfied { item: candidate });
            }
            Some(_) => {}
        }
    }

    Err(SyncError::NoFreeName {
        target: planned.to_string(),
        attempts: ExecutorConfig::MAX_COLLISION_SUFFIX - 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;
    use tempfile::TempDir;

    fn write(store: &LocalStore, name: &str, len: usize) {
        let path = store.path_for(&ItemRef::new("A", "C", name)).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, vec![0u8; len]).unwrap();
    }

    #[test]
    fn test_suffixed_name() {
        assert_eq!(suffixed_name("Song.pdf", 2), "Song-2.pdf");
        assert_eq!(suffixed_name("Song.v1.pdf", 3), "Song.v1-3.pdf");
        assert_eq!(suffixed_name("README", 2), "README-2");
        assert_eq!(suffixed_name(".hidden", 2), ".hidden-2");
    }

    #[tokio::test]
    async fn test_free_name_used_directly() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let planned = ItemRef::new("A", "C", "Song.pdf");
        let resolution = resolve_free_name(&store, &planned, false, Some(5)).await.unwrap();
        assert_eq!(
            resolution,
            Resolution::Write {
                item: planned,
                collided: false
            }
        );
    }

    #[tokio::test]
    async fn test_occupied_name_gets_suffix() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        write(&store, "Song.pdf", 3);
        write(&store, "Song-2.pdf", 4);

        let planned = ItemRef::new("A", "C", "Song.pdf");
        let resolution = resolve_free_name(&store, &planned, false, Some(5)).await.unwrap();
        assert_eq!(resolution.item().filename, "Song-3.pdf");
        assert!(matches!(resolution, Resolution::Write { collided: true, .. }));
    }

    #[tokio::test]
    async fn test_same_size_is_satisfied() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        write(&store, "Song.pdf", 3);
        write(&store, "Song-2.pdf", 5);

        let planned = ItemRef::new("A", "C", "Song.pdf");
        let resolution = resolve_free_name(&store, &planned, false, Some(5)).await.unwrap();
        assert_eq!(
            resolution,
            Resolution::Satisfied {
                item: planned.with_filename("Song-2.pdf")
            }
        );
    }

    #[tokio::test]
    async fn test_overwrite_keeps_planned_name() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        write(&store, "Song.pdf", 3);
        let planned = ItemRef::new("A", "C", "Song.pdf");
        let resolution = resolve_free_name(&store, &planned, true, Some(5)).await.unwrap();
        assert_eq!(
            resolution,
            Resolution::Write {
                item: planned,
                collided: false
            }
        );
    }

    #[tokio::test]
    async fn test_overwrite_writes_over_same_size() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        write(&store, "Song.pdf", 5);
        let planned = ItemRef::new("A", "C", "Song.pdf");
        let resolution = resolve_free_name(&store, &planned, true, Some(5)).await.unwrap();
        assert_eq!(
            resolution,
            Resolution::Write {
                item: planned,
                collided: false
            }
        );
    }
}
