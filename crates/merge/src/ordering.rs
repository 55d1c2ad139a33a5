//! Parent-first resequencing and child ordering.

use vaultpack_common::path;
use vaultpack_package_schema::PackageEntry;

/// Re-sequence entries parent-first.
///
/// Stable sort by path depth: entries of equal depth keep archive order.
pub fn resequence(mut entries: Vec<PackageEntry>) -> Vec<PackageEntry> {
    entries.sort_by_key(|e| path::depth(&e.path));
    entries
}

/// Apply an ordering hint to the current child names.
///
/// Named children come first in hint order; names not present are ignored;
/// children the hint does not name keep their relative order after them.
pub fn order_children(current: &[String], hint: &[String]) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::with_capacity(current.len());
    for name in hint {
        if current.contains(name) && !ordered.contains(name) {
            ordered.push(name.clone());
        }
    }
    for name in current {
        if !ordered.contains(name) {
            ordered.push(name.clone());
        }
    }
    ordered
}
