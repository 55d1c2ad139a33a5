//! Vaultpack merge - pure decision functions of the import pipeline.
//!
//! Nothing in this crate touches a repository: every function takes the
//! state it needs explicitly and returns a decision the installer applies.

pub mod acl;
pub mod conflict;
pub mod filter;
pub mod ordering;

pub use acl::reconcile;
pub use conflict::{decide, ConflictResolver};
pub use filter::{remap_rules, FilterEngine};
pub use ordering::{order_children, resequence};
