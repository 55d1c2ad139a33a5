//! Progress events emitted while a package is imported.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use vaultpack_common::Timestamp;

/// Pipeline phase an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Filter,
    Structure,
    AccessControl,
    Rollback,
}

/// What happened to the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Add,
    Update,
    Replace,
    Delete,
    Noop,
    Skip,
    AclModify,
    Rollback,
}

impl Action {
    /// Single character code used in listener output.
    pub fn code(&self) -> &'static str {
        match self {
            Action::Add => "A",
            Action::Update => "U",
            Action::Replace => "R",
            Action::Delete => "D",
            Action::Noop => "-",
            Action::Skip => "S",
            Action::AclModify => "M",
            Action::Rollback => "!",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Why a path was deliberately not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    Filtered,
    ParentFailed,
    ProtectedItem,
    Cancelled,
    RolledBack,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Filtered => write!(f, "filtered"),
            SkipReason::ParentFailed => write!(f, "parent failed"),
            SkipReason::ProtectedItem => write!(f, "protected item"),
            SkipReason::Cancelled => write!(f, "cancelled"),
            SkipReason::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// Terminal outcome of one path in one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Skipped { reason: SkipReason },
    Error { detail: String },
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error { .. })
    }

    fn severity(&self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::Skipped { .. } => 1,
            Outcome::Error { .. } => 2,
        }
    }
}

/// A single progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Sequence number, assigned by the log.
    pub seq: u64,
    pub phase: Phase,
    pub action: Action,
    pub path: String,
    pub outcome: Outcome,
    pub at: Timestamp,
}

impl ProgressEvent {
    pub fn new(phase: Phase, action: Action, path: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            seq: 0,
            phase,
            action,
            path: path.into(),
            outcome,
            at: Timestamp::now(),
        }
    }

    pub fn success(phase: Phase, action: Action, path: impl Into<String>) -> Self {
        Self::new(phase, action, path, Outcome::Success)
    }

    pub fn skipped(phase: Phase, path: impl Into<String>, reason: SkipReason) -> Self {
        Self::new(phase, Action::Skip, path, Outcome::Skipped { reason })
    }

    pub fn error(phase: Phase, action: Action, path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(
            phase,
            action,
            path,
            Outcome::Error {
                detail: detail.into(),
            },
        )
    }
}

/// Append-only progress log (written as JSONL).
#[derive(Debug, Clone, Default)]
pub struct ProgressLog {
    events: Vec<ProgressEvent>,
    next_seq: u64,
}

impl ProgressLog {
    /// Create a new empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, assigning its sequence number. Returns the stored event.
    pub fn add(&mut self, mut event: ProgressEvent) -> &ProgressEvent {
        event.seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(event);
        &self.events[self.events.len() - 1]
    }

    /// Get all events.
    pub fn events(&self) -> &[ProgressEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events with an error outcome.
    pub fn errors(&self) -> impl Iterator<Item = &ProgressEvent> {
        self.events.iter().filter(|e| e.outcome.is_error())
    }

    /// One terminal outcome per path: the most severe across phases.
    ///
    /// Rollback events are run-level and excluded.
    pub fn rollup(&self) -> BTreeMap<String, Outcome> {
        let mut outcomes: BTreeMap<String, Outcome> = BTreeMap::new();
        for event in self.events.iter().filter(|e| e.phase != Phase::Rollback) {
            match outcomes.get(&event.path) {
                Some(current) if current.severity() >= event.outcome.severity() => {}
                _ => {
                    outcomes.insert(event.path.clone(), event.outcome.clone());
                }
            }
        }
        outcomes
    }

    /// Convert to JSONL format.
    pub fn to_jsonl(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| serde_json::to_string(e).ok())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parse from JSONL format.
    pub fn from_jsonl(content: &str) -> Result<Self, serde_json::Error> {
        let mut log = Self::new();
        for line in content.lines() {
            if !line.trim().is_empty() {
                let event: ProgressEvent = serde_json::from_str(line)?;
                log.events.push(event);
            }
        }
        if let Some(last) = log.events.last() {
            log.next_seq = last.seq + 1;
        }
        Ok(log)
    }
}
