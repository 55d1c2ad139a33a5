//! Import behavior mode definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Global policy for conflicts and protected items during one import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ImportBehaviorMode {
    /// Any conflict or protected-item mismatch aborts the run.
    Strict,
    /// Failures are isolated to the affected subtree.
    #[default]
    BestEffort,
    /// Existing protected state is cleared; incoming protected items are ignored.
    Clear,
}

impl fmt::Display for ImportBehaviorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportBehaviorMode::Strict => write!(f, "strict"),
            ImportBehaviorMode::BestEffort => write!(f, "best-effort"),
            ImportBehaviorMode::Clear => write!(f, "clear"),
        }
    }
}

impl FromStr for ImportBehaviorMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" | "abort" => Ok(ImportBehaviorMode::Strict),
            "best-effort" | "besteffort" | "best_effort" => Ok(ImportBehaviorMode::BestEffort),
            "clear" => Ok(ImportBehaviorMode::Clear),
            _ => Err(crate::Error::Config(format!("unknown import mode: {}", s))),
        }
    }
}

impl ImportBehaviorMode {
    /// Check if apply-time failures abort the whole run.
    pub fn is_strict(&self) -> bool {
        matches!(self, ImportBehaviorMode::Strict)
    }

    /// Check if existing access control may only grow.
    pub fn is_additive_only(&self) -> bool {
        matches!(self, ImportBehaviorMode::BestEffort)
    }
}
