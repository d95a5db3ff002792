//! The Plan → Merge → Validate → Execute pipeline.
//!
//! Every stage takes and returns plain values; nothing is accumulated between
//! calls. A [`Reconciler`] only holds the two stores, the configuration and the
//! run's cancellation token.

use crate::cancel::CancellationToken;
use crate::config::{PathsConfig, ReconcileConfig};
use crate::decisions::{merge_documents, DecisionDocument, DecisionSet, MergeStats};
use crate::error::{Result, SyncError};
use crate::execute::{AuditLog, Executor, RunReport};
use crate::inventory::{hash_inventory, hash_remote_counterparts, scan_store, Inventory};
use crate::matching::{match_collections, CollectionMatch, MatchOutcome};
use crate::metadata::{ManifestStore, ManifestUpdateStats};
use crate::plan::plan_collection;
use crate::store::{open_local, open_remote, ItemStore, StoreUri};
use crate::validate::{ValidationOutcome, Validator};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of the planning stage.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOutcome {
    pub document: DecisionDocument,
    pub matching: MatchOutcome,
    /// Matches left out of the document for being under `minPlanTier`.
    pub below_tier: Vec<CollectionMatch>,
}

/// Builder for [`Reconciler`].
///
/// ```rust,ignore
/// let reconciler = Reconciler::builder("/data/library")
///     .remote_uri("s3://songs/library")
///     .config(config)
///     .build()
///     .await?;
/// ```
pub struct ReconcilerBuilder {
    local_root: PathBuf,
    remote_uri: Option<String>,
    remote_store: Option<Arc<dyn ItemStore>>,
    config: ReconcileConfig,
    cancel: CancellationToken,
    audit_log: Option<PathBuf>,
}

impl ReconcilerBuilder {
    pub fn new(local_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            remote_uri: None,
            remote_store: None,
            config: ReconcileConfig::default(),
            cancel: CancellationToken::new(),
            audit_log: None,
        }
    }

    /// Remote location: `s3://bucket/prefix` or `emulated://<dir>#<bucket>`.
    pub fn remote_uri(mut self, uri: impl Into<String>) -> Self {
        self.remote_uri = Some(uri.into());
        self
    }

    /// Use an already opened remote store instead of a URI.
    pub fn remote_store(mut self, store: Arc<dyn ItemStore>) -> Self {
        self.remote_store = Some(store);
        self
    }

    pub fn config(mut self, config: ReconcileConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Append every execution result to this JSON Lines file.
    pub fn audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_log = Some(path.into());
        self
    }

    pub async fn build(self) -> Result<Reconciler> {
        self.config.validate()?;
        let local = open_local(&self.local_root)?;

        let remote = match (self.remote_store, self.remote_uri) {
            (Some(store), _) => store,
            (None, Some(uri)) => open_remote(&StoreUri::parse(&uri)?, &self.config).await?,
            (None, None) => return Err(SyncError::config("a remote store is required")),
        };

        let manifests = ManifestStore::new(self.config.manifest_root_for(&self.local_root));
        info!(
            "Reconciling {} with {}",
            local.describe(),
            remote.describe()
        );

        Ok(Reconciler {
            local_root: self.local_root,
            local,
            remote,
            config: self.config,
            cancel: self.cancel,
            audit: self.audit_log.map(|p| Arc::new(AuditLog::new(p))),
            manifests,
        })
    }
}

/// Owns both sides of a reconciliation.
pub struct Reconciler {
    local_root: PathBuf,
    local: Arc<dyn ItemStore>,
    remote: Arc<dyn ItemStore>,
    config: ReconcileConfig,
    cancel: CancellationToken,
    audit: Option<Arc<AuditLog>>,
    manifests: ManifestStore,
}

impl Reconciler {
    pub fn builder(local_root: impl Into<PathBuf>) -> ReconcilerBuilder {
        ReconcilerBuilder::new(local_root)
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub fn local_store(&self) -> Arc<dyn ItemStore> {
        self.local.clone()
    }

    pub fn remote_store(&self) -> Arc<dyn ItemStore> {
        self.remote.clone()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Scan both sides concurrently, hashing local items when configured.
    pub async fn scan(&self) -> Result<(Inventory, Inventory)> {
        let (mut local, remote) = tokio::try_join!(
            scan_store(self.local.as_ref(), &self.config),
            scan_store(self.remote.as_ref(), &self.config),
        )?;
        self.cancel.check()?;

        if self.config.hash_local {
            hash_inventory(&mut local, &self.local_root, self.config.workers).await?;
        }
        Ok((local, remote))
    }

    /// Scan, match and diff into a fresh, unapproved decision document.
    ///
    /// With `hashLocal`, remote items that share a name and size with a
    /// local item are hashed too, so same-size content conflicts surface.
    pub async fn plan(&self) -> Result<PlanOutcome> {
        let (local, remote) = self.scan().await?;
        let matching = match_collections(&local, &remote);

        let generated_at = Utc::now();
        let mut document = DecisionDocument::new(generated_at);
        let mut below_tier = Vec::new();

        for m in &matching.matches {
            if m.tier < self.config.min_plan_tier {
                debug!("Leaving {} <-> {} out of the plan ({})", m.local, m.remote, m.tier);
                below_tier.push(m.clone());
                continue;
            }
            let local_items = local.get(&m.local).unwrap_or_default();
            let mut remote_items = remote.get(&m.remote).unwrap_or_default().to_vec();
            if self.config.hash_local {
                hash_remote_counterparts(
                    self.remote.as_ref(),
                    &m.remote,
                    local_items,
                    &mut remote_items,
                    self.config.workers,
                )
                .await?;
            }
            let decisions = plan_collection(
                &m.local.artist,
                local_items,
                &remote_items,
                self.config.conflict_policy,
            );
            document.insert(DecisionSet::new(
                &m.local,
                &m.remote,
                m.tier,
                m.confidence,
                decisions,
                generated_at,
            ));
        }

        info!(
            collections = document.decisions.len(),
            pending = document.pending_count(),
            unmatched_local = matching.unmatched_local.len(),
            unmatched_remote = matching.unmatched_remote.len(),
            below_tier = below_tier.len(),
            "Planned"
        );
        Ok(PlanOutcome {
            document,
            matching,
            below_tier,
        })
    }

    /// Carry reviewed decisions from `previous` into a fresh plan.
    pub fn merge_with_previous(
        &self,
        fresh: DecisionDocument,
        previous: &DecisionDocument,
    ) -> (DecisionDocument, MergeStats) {
        merge_documents(fresh, previous)
    }

    /// Re-check approved sets against live state.
    pub async fn validate(&self, document: DecisionDocument) -> Result<ValidationOutcome> {
        Validator::new(self.local.clone(), self.remote.clone(), self.config.workers)
            .validate(document)
            .await
    }

    /// Execute a validated document.
    pub async fn execute(&self, document: &DecisionDocument) -> Result<RunReport> {
        let mut executor = Executor::new(
            self.local.clone(),
            self.remote.clone(),
            self.local_root.join(PathsConfig::STAGING_DIR_NAME),
        )
        .with_workers(self.config.workers)
        .with_cancellation(self.cancel.clone());
        if let Some(audit) = &self.audit {
            executor = executor.with_audit_log(audit.clone());
        }
        executor.execute(document).await
    }

    /// Point manifests at the new names of every successful rename.
    pub fn update_manifests(&self, report: &RunReport) -> ManifestUpdateStats {
        self.manifests.apply_renames(report.renames())
    }
}
