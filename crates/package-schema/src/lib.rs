//! Package schema definitions for vaultpack.
//!
//! This crate defines the structure of content packages (manifest, filter
//! rules, node descriptors) and the records an import produces (merge
//! decisions, progress events, run reports).

pub mod entry;
pub mod manifest;
pub mod plan;
pub mod progress;
pub mod schema;
pub mod validation;

pub use entry::{
    AclEntry, EntryKind, ExistingNodeState, NodeDescriptor, NodeType, PackageEntry, PackageSource,
    PropertyValue,
};
pub use manifest::{
    Dependency, FilterPattern, FilterRule, PackageManifest, PackageMetadata, RuleImportMode,
    SCHEMA_VERSION,
};
pub use plan::{
    AclChange, AclChangeSet, AclOp, FailureReason, ImportReport, ImportState, MergeDecision,
    ProtectionStats, RunFailure,
};
pub use progress::{Action, Outcome, Phase, ProgressEvent, ProgressLog, SkipReason};
pub use validation::{validate_descriptor, validate_manifest, validate_package};
