//! Per-collection action planning.

mod action;
mod planner;
mod title;

pub use action::{
    ActionKind, ConflictPolicy, Direction, FileDecision, HintSource, Location, Phase, ReasonCode,
};
pub use planner::{enforce_unique_targets, plan_collection, FileDecisions};
pub use title::normalize_title;
