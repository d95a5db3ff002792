//! Persisted, reviewable action plans.

mod approve;
mod document;
mod merge;

pub use approve::{approve, Approval, ApprovalReport};
pub use document::{DecisionDocument, DecisionSet, DecisionStore, DECISION_DOCUMENT_VERSION};
pub use merge::{merge_documents, MergeStats};
