//! Centralized configuration for shelfsync.
//!
//! Fixed parameters live as associated constants on unit structs. Tunables a
//! user may change live in [`ReconcileConfig`], loaded from an optional JSON
//! file where every field falls back to its default.

use crate::error::{Result, SyncError};
use crate::matching::MatchTier;
use crate::metadata::atomic_read_json;
use crate::plan::ConflictPolicy;
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Identity matcher parameters.
pub struct MatchConfig;

impl MatchConfig {
    pub const EXCELLENT_THRESHOLD: f64 = 0.95;
    pub const GOOD_THRESHOLD: f64 = 0.80;
    pub const FAIR_THRESHOLD: f64 = 0.70;
    pub const POOR_THRESHOLD: f64 = 0.50;

    pub const TOKEN_OVERLAP_WEIGHT: f64 = 0.5;
    pub const STRING_SIMILARITY_WEIGHT: f64 = 0.3;
    pub const ITEM_COUNT_WEIGHT: f64 = 0.2;

    /// Shared significant words needed to consider a cross-artist candidate.
    pub const MIN_SHARED_SIGNIFICANT_WORDS: usize = 2;
    pub const MIN_SIGNIFICANT_WORD_LEN: usize = 3;
}

/// Executor parameters.
pub struct ExecutorConfig;

impl ExecutorConfig {
    pub const DEFAULT_WORKERS: usize = 4;
    /// Highest collision suffix tried before giving up (`Song-2` .. `Song-999`).
    pub const MAX_COLLISION_SUFFIX: u32 = 999;
    pub const COPY_CHUNK_SIZE: usize = 8 * 1024 * 1024;
}

/// Store access parameters.
pub struct StoreConfig;

impl StoreConfig {
    pub const DEFAULT_PAGE_SIZE: usize = 1000;
    pub const REMOTE_TIMEOUT: Duration = Duration::from_secs(60);
    pub const RETRY_ATTEMPTS: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);
    pub const TEMP_SUFFIX: &'static str = ".shelfsync-part";
}

/// File and directory names.
pub struct PathsConfig;

impl PathsConfig {
    pub const MANIFEST_DIR_NAME: &'static str = ".manifests";
    pub const STAGING_DIR_NAME: &'static str = ".shelfsync-staging";
    pub const MANIFEST_EXTENSION: &'static str = "json";
    pub const DEFAULT_AUDIT_LOG: &'static str = "shelfsync-audit.jsonl";
}

/// Retry settings as they appear in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: StoreConfig::RETRY_ATTEMPTS,
            base_delay_ms: StoreConfig::RETRY_BASE_DELAY.as_millis() as u64,
            max_delay_ms: StoreConfig::RETRY_MAX_DELAY.as_millis() as u64,
            jitter: true,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(self.max_attempts.max(1))
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_jitter(self.jitter)
    }
}

/// User-tunable settings for a reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcileConfig {
    /// How size conflicts are resolved by the planner.
    pub conflict_policy: ConflictPolicy,
    /// Collections executed concurrently.
    pub workers: usize,
    pub retry: RetrySettings,
    pub remote_timeout_secs: u64,
    /// Keys requested per remote listing page.
    pub page_size: usize,
    /// Compute SHA-256 of local files during the scan.
    pub hash_local: bool,
    /// Filenames never treated as collection items.
    pub ignored_filenames: Vec<String>,
    /// Where manifests live; defaults to `<local root>/.manifests`.
    pub manifest_root: Option<PathBuf>,
    /// Collections matched below this tier are left out of the plan.
    pub min_plan_tier: MatchTier,
    /// Lowest tier `approve --auto` will approve.
    pub auto_approve_min_tier: MatchTier,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::PreferLarger,
            workers: ExecutorConfig::DEFAULT_WORKERS,
            retry: RetrySettings::default(),
            remote_timeout_secs: StoreConfig::REMOTE_TIMEOUT.as_secs(),
            page_size: StoreConfig::DEFAULT_PAGE_SIZE,
            hash_local: false,
            ignored_filenames: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "desktop.ini".to_string(),
            ],
            manifest_root: None,
            min_plan_tier: MatchTier::Poor,
            auto_approve_min_tier: MatchTier::Excellent,
        }
    }
}

impl ReconcileConfig {
    /// Load from `path`, or return defaults when no path is given.
    ///
    /// An explicitly named file that does not exist is a configuration error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let config: Option<Self> = atomic_read_json(path)?;
        let config = config.ok_or_else(|| {
            SyncError::config(format!("Config file not found: {}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(SyncError::config("workers must be at least 1"));
        }
        if self.page_size == 0 {
            return Err(SyncError::config("pageSize must be at least 1"));
        }
        if self.remote_timeout_secs == 0 {
            return Err(SyncError::config("remoteTimeoutSecs must be at least 1"));
        }
        Ok(())
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    pub fn manifest_root_for(&self, local_root: &Path) -> PathBuf {
        self.manifest_root
            .clone()
            .unwrap_or_else(|| local_root.join(PathsConfig::MANIFEST_DIR_NAME))
    }

    pub fn is_ignored(&self, filename: &str) -> bool {
        filename.starts_with('.')
            || filename.ends_with(StoreConfig::TEMP_SUFFIX)
            || self.ignored_filenames.iter().any(|f| f == filename)
    }
}
