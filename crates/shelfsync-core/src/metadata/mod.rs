//! JSON persistence: atomic document I/O, the audit-log line writer, and
//! collection manifests.

mod atomic;
mod manifest;

pub use atomic::{append_json_line, atomic_read_json, atomic_write_json, backup_path_for};
pub use manifest::{Manifest, ManifestItem, ManifestRename, ManifestStore, ManifestUpdateStats};
