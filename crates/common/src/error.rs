//! Common error types for vaultpack.

use thiserror::Error;

/// Common error type for vaultpack operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed package: {0}")]
    MalformedPackage(String),

    #[error("Corrupt entry {path}: {reason}")]
    CorruptEntry { path: String, reason: String },

    #[error("Ambiguous filter rule: more than one rule rooted at {root}")]
    AmbiguousFilterRule { root: String },

    #[error("Invalid filter pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Type conflict at {path}: existing {existing}, incoming {incoming}")]
    TypeConflict {
        path: String,
        existing: String,
        incoming: String,
    },

    #[error("Protected item violation at {path}: {item}")]
    ProtectedItemViolation { path: String, item: String },

    #[error("Cannot remove {path}: {descendant} is outside the package filters")]
    ExcludedDescendant { path: String, descendant: String },

    #[error("Cannot resolve principal {principal} for {path}")]
    PrincipalResolutionFailure { path: String, principal: String },

    #[error("Persistence failed: {0}")]
    PersistenceFailure(String),

    #[error("Invalid repository path: {0}")]
    InvalidPath(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors raised while reading a package, before anything is mutated.
    pub fn is_reading_time(&self) -> bool {
        matches!(
            self,
            Error::MalformedPackage(_)
                | Error::CorruptEntry { .. }
                | Error::AmbiguousFilterRule { .. }
                | Error::InvalidPattern { .. }
        )
    }

    /// Errors raised while applying a single path.
    pub fn is_apply_time(&self) -> bool {
        matches!(
            self,
            Error::TypeConflict { .. }
                | Error::ProtectedItemViolation { .. }
                | Error::ExcludedDescendant { .. }
                | Error::PrincipalResolutionFailure { .. }
                | Error::Repository(_)
        )
    }
}

/// Result type alias using common Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(Error::MalformedPackage("no manifest".into()).is_reading_time());
        assert!(Error::AmbiguousFilterRule {
            root: "/content".into()
        }
        .is_reading_time());
        assert!(Error::TypeConflict {
            path: "/a".into(),
            existing: "nt:folder".into(),
            incoming: "nt:unstructured".into(),
        }
        .is_apply_time());
        assert!(!Error::PersistenceFailure("disk full".into()).is_apply_time());
        assert!(!Error::PersistenceFailure("disk full".into()).is_reading_time());
    }

    #[test]
    fn test_error_display() {
        let err = Error::CorruptEntry {
            path: "/content/a".into(),
            reason: "expected value".into(),
        };
        assert_eq!(err.to_string(), "Corrupt entry /content/a: expected value");
    }
}
