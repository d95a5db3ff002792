//! Executing validated plans.

mod audit;
mod collision;
mod executor;
mod report;

pub use audit::{read_audit_log, summarize, AuditLog, RunSummary};
pub use collision::{resolve_free_name, suffixed_name, Resolution};
pub use executor::Executor;
pub use report::{ExecutionResult, ItemError, Outcome, RunReport};
