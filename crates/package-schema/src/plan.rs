//! Decision and report types - output of the merge pipeline.

use crate::entry::{AclEntry, NodeType};
use crate::progress::{Action, Outcome, ProgressEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use vaultpack_common::{Error, ImportBehaviorMode};

/// Why a path cannot be merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FailureReason {
    TypeConflict { existing: NodeType, incoming: NodeType },
    ProtectedItemViolation { item: String },
}

impl FailureReason {
    /// Convert into the error taxonomy for `path`.
    pub fn into_error(self, path: &str) -> Error {
        match self {
            FailureReason::TypeConflict { existing, incoming } => Error::TypeConflict {
                path: path.to_string(),
                existing: existing.to_string(),
                incoming: incoming.to_string(),
            },
            FailureReason::ProtectedItemViolation { item } => Error::ProtectedItemViolation {
                path: path.to_string(),
                item,
            },
        }
    }
}

/// Structural merge outcome for one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "kebab-case")]
pub enum MergeDecision {
    Create,
    ReplaceProperties,
    MergeProperties,
    SkipExisting,
    Delete,
    DeleteAndRecreate,
    Fail { reason: FailureReason },
}

impl MergeDecision {
    /// Progress action reported when the decision is applied.
    pub fn action(&self) -> Action {
        match self {
            MergeDecision::Create => Action::Add,
            MergeDecision::ReplaceProperties | MergeDecision::MergeProperties => Action::Update,
            MergeDecision::SkipExisting => Action::Noop,
            MergeDecision::Delete => Action::Delete,
            MergeDecision::DeleteAndRecreate => Action::Replace,
            MergeDecision::Fail { .. } => Action::Skip,
        }
    }

    /// Whether applying the decision mutates the repository.
    pub fn changes_structure(&self) -> bool {
        !matches!(
            self,
            MergeDecision::SkipExisting | MergeDecision::Fail { .. }
        )
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, MergeDecision::Fail { .. })
    }
}

/// Import run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportState {
    Idle,
    Reading,
    Resolving,
    Applying,
    Reconciling,
    Committed,
    RolledBack,
    PartiallyFailed,
}

impl ImportState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportState::Committed | ImportState::RolledBack | ImportState::PartiallyFailed
        )
    }
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportState::Idle => "idle",
            ImportState::Reading => "reading",
            ImportState::Resolving => "resolving",
            ImportState::Applying => "applying",
            ImportState::Reconciling => "reconciling",
            ImportState::Committed => "committed",
            ImportState::RolledBack => "rolled-back",
            ImportState::PartiallyFailed => "partially-failed",
        };
        f.write_str(name)
    }
}

/// Direction of one access control change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclOp {
    Add,
    Remove,
}

/// One access control change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclChange {
    pub op: AclOp,
    pub entry: AclEntry,
}

/// Ordered access control changes for one path: removals first, then additions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclChangeSet {
    pub path: String,
    pub changes: Vec<AclChange>,
}

impl AclChangeSet {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            changes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn removals(&self) -> impl Iterator<Item = &AclEntry> {
        self.changes
            .iter()
            .filter(|c| c.op == AclOp::Remove)
            .map(|c| &c.entry)
    }

    pub fn additions(&self) -> impl Iterator<Item = &AclEntry> {
        self.changes
            .iter()
            .filter(|c| c.op == AclOp::Add)
            .map(|c| &c.entry)
    }
}

/// Counters for protected-item handling during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionStats {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cleared: usize,
    /// Names of skipped items, `path:item`.
    pub skipped_items: Vec<String>,
}

impl ProtectionStats {
    pub fn total(&self) -> usize {
        self.applied + self.skipped + self.failed
    }

    /// Merge with another stats.
    pub fn merge(&mut self, other: &ProtectionStats) {
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.cleared += other.cleared;
        self.skipped_items
            .extend(other.skipped_items.iter().cloned());
    }
}

/// The failure that terminated or degraded a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub path: String,
    pub error: String,
}

/// Summary of one import run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    /// Unique identifier for this run.
    pub run_id: String,
    /// Package id (`group:name:version`).
    pub package: String,
    /// SHA-256 of the container bytes.
    pub package_digest: String,
    pub mode: ImportBehaviorMode,
    pub dry_run: bool,
    pub status: ImportState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Every event emitted during the run, in order.
    pub events: Vec<ProgressEvent>,
    /// One terminal outcome per touched path.
    pub path_outcomes: BTreeMap<String, Outcome>,
    /// First fatal or subtree-aborting failures.
    pub failures: Vec<RunFailure>,
    pub warnings: Vec<String>,
    pub acl_change_sets: Vec<AclChangeSet>,
    pub protection: ProtectionStats,
}

impl ImportReport {
    pub fn new(package: impl Into<String>, package_digest: impl Into<String>, mode: ImportBehaviorMode, dry_run: bool) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            package: package.into(),
            package_digest: package_digest.into(),
            mode,
            dry_run,
            status: ImportState::Idle,
            started_at: Utc::now(),
            completed_at: None,
            events: Vec::new(),
            path_outcomes: BTreeMap::new(),
            failures: Vec::new(),
            warnings: Vec::new(),
            acl_change_sets: Vec::new(),
            protection: ProtectionStats::default(),
        }
    }

    /// Whether the run ended without losing any part of the package.
    pub fn is_success(&self) -> bool {
        self.status == ImportState::Committed
    }

    /// Paths whose terminal outcome is an error.
    pub fn failed_paths(&self) -> Vec<&str> {
        self.path_outcomes
            .iter()
            .filter(|(_, o)| o.is_error())
            .map(|(p, _)| p.as_str())
            .collect()
    }

    /// Paths whose terminal outcome is skipped.
    pub fn skipped_paths(&self) -> Vec<&str> {
        self.path_outcomes
            .iter()
            .filter(|(_, o)| matches!(o, Outcome::Skipped { .. }))
            .map(|(p, _)| p.as_str())
            .collect()
    }
}
