//! Action vocabulary shared by the planner, decision store, validator and
//! executor.

use crate::error::{Result, SyncError};
use crate::store::Side;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What to do with one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    NoAction,
    CopyToLocal,
    CopyToRemote,
    RenameLocal,
    RenameRemote,
    /// Replace the item on one side with the other side's bytes.
    ConflictOverwrite,
    DeleteLocal,
    DeleteRemote,
    DeleteBoth,
}

/// Execution phase within one collection. Lower phases run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Transfer,
    Rename,
    Delete,
    Skip,
}

impl ActionKind {
    pub fn phase(&self) -> Phase {
        match self {
            ActionKind::CopyToLocal | ActionKind::CopyToRemote | ActionKind::ConflictOverwrite => {
                Phase::Transfer
            }
            ActionKind::RenameLocal | ActionKind::RenameRemote => Phase::Rename,
            ActionKind::DeleteLocal | ActionKind::DeleteRemote | ActionKind::DeleteBoth => {
                Phase::Delete
            }
            ActionKind::NoAction => Phase::Skip,
        }
    }

    /// Overwrites or removes existing data.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            ActionKind::ConflictOverwrite
                | ActionKind::DeleteLocal
                | ActionKind::DeleteRemote
                | ActionKind::DeleteBoth
        )
    }

    pub fn is_rename(&self) -> bool {
        matches!(self, ActionKind::RenameLocal | ActionKind::RenameRemote)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::NoAction => "NoAction",
            ActionKind::CopyToLocal => "CopyToLocal",
            ActionKind::CopyToRemote => "CopyToRemote",
            ActionKind::RenameLocal => "RenameLocal",
            ActionKind::RenameRemote => "RenameRemote",
            ActionKind::ConflictOverwrite => "ConflictOverwrite",
            ActionKind::DeleteLocal => "DeleteLocal",
            ActionKind::DeleteRemote => "DeleteRemote",
            ActionKind::DeleteBoth => "DeleteBoth",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed vocabulary explaining why an action was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Identical,
    OnlyLocal,
    OnlyRemote,
    SizeDiffersLocalLarger,
    SizeDiffersRemoteLarger,
    SizeTiePreferLocal,
    PolicyPreferLocal,
    PolicyPreferRemote,
    ConflictNeedsReview,
    ContentConflictNeedsReview,
    TitleNormalized,
    Manual,
    AlreadySatisfied,
    SizeChanged,
    DuplicateTarget,
}

/// Copy direction of a `ConflictOverwrite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    LocalToRemote,
    RemoteToLocal,
}

impl Direction {
    pub fn source(&self) -> Side {
        match self {
            Direction::LocalToRemote => Side::Local,
            Direction::RemoteToLocal => Side::Remote,
        }
    }

    pub fn target(&self) -> Side {
        self.source().other()
    }
}

/// Where a decision came from after a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintSource {
    /// Fresh and previous decisions agree.
    Aligned,
    /// A human decision carried over from the previous document.
    Manual,
    /// No previous decision, or a disagreeing one (see `conflictWithPrevious`).
    Fresh,
}

/// How the planner settles a size or content conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictPolicy {
    /// Larger file wins; a same-size content conflict is left for review.
    #[default]
    PreferLarger,
    PreferLocal,
    PreferRemote,
    /// Never resolve automatically.
    Manual,
}

impl FromStr for ConflictPolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "preferlarger" | "larger" => Ok(ConflictPolicy::PreferLarger),
            "preferlocal" | "local" => Ok(ConflictPolicy::PreferLocal),
            "preferremote" | "remote" => Ok(ConflictPolicy::PreferRemote),
            "manual" => Ok(ConflictPolicy::Manual),
            other => Err(SyncError::config(format!("unknown conflict policy: {}", other))),
        }
    }
}

/// One side plus a filename inside the collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub side: Side,
    pub name: String,
}

impl Location {
    pub fn new(side: Side, name: impl Into<String>) -> Self {
        Self {
            side,
            name: name.into(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.side, self.name)
    }
}

/// The planned (or hand-written) action for one filename of a collection.
///
/// `source_size` is the size of the item the action reads from (or removes);
/// `target_size` is the size currently at the target, if anything is there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDecision {
    pub action: ActionKind,
    pub reason: ReasonCode,
    #[serde(default)]
    pub source_size: Option<u64>,
    #[serde(default)]
    pub target_size: Option<u64>,
    /// Rename target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub manual: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint_source: Option<HintSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_with_previous: Option<Box<FileDecision>>,
}

impl FileDecision {
    pub fn new(action: ActionKind, reason: ReasonCode) -> Self {
        Self {
            action,
            reason,
            source_size: None,
            target_size: None,
            normalized_name: None,
            direction: None,
            manual: false,
            hint_source: None,
            conflict_with_previous: None,
        }
    }

    pub fn with_sizes(mut self, source: Option<u64>, target: Option<u64>) -> Self {
        self.source_size = source;
        self.target_size = target;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_normalized_name(mut self, name: impl Into<String>) -> Self {
        self.normalized_name = Some(name.into());
        self
    }

    /// Turn this decision into a no-op, keeping its size evidence.
    pub fn downgrade(&mut self, reason: ReasonCode) {
        self.action = ActionKind::NoAction;
        self.reason = reason;
        self.direction = None;
        self.normalized_name = None;
    }

    /// Side the action reads from. `None` for `NoAction` and `DeleteBoth`.
    pub fn source_side(&self) -> Option<Side> {
        match self.action {
            ActionKind::CopyToRemote | ActionKind::RenameLocal | ActionKind::DeleteLocal => {
                Some(Side::Local)
            }
            ActionKind::CopyToLocal | ActionKind::RenameRemote | ActionKind::DeleteRemote => {
                Some(Side::Remote)
            }
            ActionKind::ConflictOverwrite => self.direction.map(|d| d.source()),
            ActionKind::NoAction | ActionKind::DeleteBoth => None,
        }
    }

    /// Where the action writes, if it writes anywhere.
    pub fn target(&self, filename: &str) -> Option<Location> {
        match self.action {
            ActionKind::CopyToRemote => Some(Location::new(Side::Remote, filename)),
            ActionKind::CopyToLocal => Some(Location::new(Side::Local, filename)),
            ActionKind::ConflictOverwrite => self
                .direction
                .map(|d| Location::new(d.target(), filename)),
            ActionKind::RenameLocal => self
                .normalized_name
                .as_ref()
                .map(|n| Location::new(Side::Local, n)),
            ActionKind::RenameRemote => self
                .normalized_name
                .as_ref()
                .map(|n| Location::new(Side::Remote, n)),
            _ => None,
        }
    }

    /// Same kind, direction and rename target.
    pub fn agrees_with(&self, other: &FileDecision) -> bool {
        self.action == other.action
            && self.direction == other.direction
            && (!self.action.is_rename() || self.normalized_name == other.normalized_name)
    }

    /// Structural problems a hand edit can introduce.
    pub fn check(&self, filename: &str) -> Result<()> {
        if self.action == ActionKind::ConflictOverwrite && self.direction.is_none() {
            return Err(SyncError::InvalidPlan {
                message: format!("{}: ConflictOverwrite without direction", filename),
            });
        }
        if self.action.is_rename() {
            match self.normalized_name.as_deref() {
                None | Some("") => {
                    return Err(SyncError::InvalidPlan {
                        message: format!("{}: rename without normalizedName", filename),
                    })
                }
                Some(name) if name == filename => {
                    return Err(SyncError::InvalidPlan {
                        message: format!("{}: rename onto itself", filename),
                    })
                }
                _ => {}
            }
        }
        Ok(())
    }
}
