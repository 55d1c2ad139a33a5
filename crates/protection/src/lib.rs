//! Protected-item handling for vaultpack imports.
//!
//! Protected items are node types and properties whose direct write would
//! bypass repository-enforced invariants: access control structures,
//! authorizables and system-managed metadata. This crate classifies them and
//! decides, per import behavior mode, whether each one is applied, skipped or
//! fails the entry.

pub mod patterns;
pub mod policy;

pub use policy::{
    acl_target, classify, protected_items, resolve_protected, ProtectedItem, ProtectedItemPolicy,
    ProtectedResolution, ProtectionLevel, ProtectionPlan,
};
pub use vaultpack_package_schema::ProtectionStats;

/// Name of the child node that carries a node's access control list.
pub const POLICY_NODE_NAME: &str = "rep:policy";
