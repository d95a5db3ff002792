//! Shelfsync Core - reconciliation engine for a file collection library kept
//! both in a local directory tree and in an object store.
//!
//! Both sides are organised as `artist/collection/filename`. A run scans both
//! sides, matches collections across them, plans per-file actions into a
//! reviewable decision document, re-validates approved sets against live
//! state, and executes them without ever overwriting silently.
//!
//! # Example
//!
//! ```rust,ignore
//! use shelfsync_core::{DecisionStore, Reconciler};
//!
//! #[tokio::main]
//! async fn main() -> shelfsync_core::Result<()> {
//!     let reconciler = Reconciler::builder("/data/library")
//!         .remote_uri("s3://songs/library")
//!         .build()
//!         .await?;
//!
//!     let plan = reconciler.plan().await?;
//!     DecisionStore::new("decisions.json").save(&plan.document)?;
//!
//!     // ... a reviewer sets `completed` on the sets to run ...
//!
//!     let document = DecisionStore::new("decisions.json").load_required()?;
//!     let validated = reconciler.validate(document).await?;
//!     let report = reconciler.execute(&validated.document).await?;
//!     reconciler.update_manifests(&report);
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod decisions;
pub mod error;
pub mod execute;
pub mod inventory;
pub mod matching;
pub mod metadata;
pub mod pipeline;
pub mod plan;
pub mod retry;
pub mod store;
pub mod validate;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use config::ReconcileConfig;
pub use decisions::{approve, Approval, ApprovalReport, DecisionDocument, DecisionSet, DecisionStore};
pub use error::{ErrorClass, Result, SyncError};
pub use execute::{AuditLog, ExecutionResult, Outcome, RunReport};
pub use inventory::{CollectionKey, Inventory, Item};
pub use matching::{match_collections, MatchOutcome, MatchTier};
pub use metadata::ManifestStore;
pub use pipeline::{PlanOutcome, Reconciler, ReconcilerBuilder};
pub use plan::{ActionKind, ConflictPolicy, FileDecision, ReasonCode};
pub use store::{ItemRef, ItemStore, Side, StoreUri};
pub use validate::{ValidationOutcome, ValidationReport, Validator};
