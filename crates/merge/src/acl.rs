//! ACL reconciliation: compute the minimal change set that moves an
//! existing access control list towards the incoming one.

use std::collections::BTreeSet;
use tracing::debug;
use vaultpack_common::ImportBehaviorMode;
use vaultpack_package_schema::{AclChange, AclChangeSet, AclEntry, AclOp};

/// Reconcile the access control list at `path`.
///
/// Removals come before additions. Under `BestEffort` nothing is revoked
/// implicitly: an existing entry is only replaced when an incoming entry for
/// the same principal overlaps its privileges, and the privileges it does
/// not overlap are granted again.
pub fn reconcile(
    path: &str,
    incoming: &[AclEntry],
    existing: &[AclEntry],
    mode: ImportBehaviorMode,
) -> AclChangeSet {
    let mut set = AclChangeSet::new(path);
    let mut additions: Vec<AclEntry> = Vec::new();

    if mode.is_additive_only() {
        for current in existing {
            if incoming.contains(current) {
                continue;
            }
            let superseding: Vec<&AclEntry> =
                incoming.iter().filter(|i| i.overlaps(current)).collect();
            if superseding.is_empty() {
                continue;
            }

            set.changes.push(AclChange {
                op: AclOp::Remove,
                entry: current.clone(),
            });

            let covered: BTreeSet<&String> =
                superseding.iter().flat_map(|i| i.privileges.iter()).collect();
            let residual: BTreeSet<String> = current
                .privileges
                .iter()
                .filter(|p| !covered.contains(p))
                .cloned()
                .collect();
            if !residual.is_empty() {
                additions.push(AclEntry {
                    principal: current.principal.clone(),
                    privileges: residual,
                    allow: current.allow,
                });
            }
        }
    } else {
        for current in existing {
            if !incoming.contains(current) {
                set.changes.push(AclChange {
                    op: AclOp::Remove,
                    entry: current.clone(),
                });
            }
        }
    }

    for entry in incoming {
        if !existing.contains(entry) && !additions.contains(entry) {
            additions.push(entry.clone());
        }
    }

    set.changes.extend(additions.into_iter().map(|entry| AclChange {
        op: AclOp::Add,
        entry,
    }));

    debug!(
        "Reconciled ACL at {}: {} removals, {} additions",
        path,
        set.removals().count(),
        set.additions().count()
    );
    set
}
