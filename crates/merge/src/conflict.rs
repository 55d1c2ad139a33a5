//! Conflict resolution: decide how an incoming entry merges with the
//! node already at its path.

use crate::ordering::order_children;
use tracing::trace;
use vaultpack_common::ImportBehaviorMode;
use vaultpack_package_schema::{
    ExistingNodeState, FailureReason, FilterRule, MergeDecision, PackageEntry, RuleImportMode,
};
use vaultpack_protection::patterns::is_protected_property;

/// Decides merge outcomes for entries covered by one filter rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    rule_mode: RuleImportMode,
}

impl ConflictResolver {
    pub fn new(rule_mode: RuleImportMode) -> Self {
        Self { rule_mode }
    }

    /// Resolver for the rule covering an entry.
    pub fn for_rule(rule: Option<&FilterRule>) -> Self {
        Self::new(rule.map(|r| r.mode).unwrap_or_default())
    }

    /// Decide the merge outcome.
    ///
    /// | existing | condition | decision |
    /// |---|---|---|
    /// | absent | content | `Create` |
    /// | absent | tombstone | `SkipExisting` |
    /// | present | tombstone | `Delete` |
    /// | present | rule mode `merge` | `SkipExisting` |
    /// | present, other type | `Strict` | `Fail(TypeConflict)` |
    /// | present, other type | otherwise | `DeleteAndRecreate` |
    /// | present, same type | nothing changes | `SkipExisting` |
    /// | present, same type | rule mode `replace` | `ReplaceProperties` |
    /// | present, same type | rule mode `update` | `MergeProperties` |
    pub fn decide(
        &self,
        existing: Option<&ExistingNodeState>,
        incoming: &PackageEntry,
        mode: ImportBehaviorMode,
    ) -> MergeDecision {
        let decision = match existing.filter(|e| e.exists) {
            None if incoming.is_tombstone() => MergeDecision::SkipExisting,
            None => MergeDecision::Create,
            Some(_) if incoming.is_tombstone() => MergeDecision::Delete,
            Some(_) if self.rule_mode == RuleImportMode::Merge => MergeDecision::SkipExisting,
            Some(current) if current.node_type != incoming.node_type => {
                if mode.is_strict() {
                    MergeDecision::Fail {
                        reason: FailureReason::TypeConflict {
                            existing: current.node_type.clone(),
                            incoming: incoming.node_type.clone(),
                        },
                    }
                } else {
                    MergeDecision::DeleteAndRecreate
                }
            }
            Some(current) if !self.would_change(current, incoming) => MergeDecision::SkipExisting,
            Some(_) if self.rule_mode == RuleImportMode::Replace => MergeDecision::ReplaceProperties,
            Some(_) => MergeDecision::MergeProperties,
        };

        trace!("Decision for {}: {:?}", incoming.path, decision);
        decision
    }

    /// Whether merging `incoming` into a same-typed `current` writes anything.
    fn would_change(&self, current: &ExistingNodeState, incoming: &PackageEntry) -> bool {
        let property_changes = incoming
            .properties
            .iter()
            .filter(|(name, _)| !is_protected_property(name))
            .any(|(name, value)| current.properties.get(name) != Some(value));
        if property_changes {
            return true;
        }

        if self.rule_mode == RuleImportMode::Replace
            && current
                .properties
                .keys()
                .filter(|name| !is_protected_property(name))
                .any(|name| !incoming.properties.contains_key(name))
        {
            return true;
        }

        incoming.node_type.allows_child_ordering()
            && !incoming.child_order.is_empty()
            && order_children(&current.child_names, &incoming.child_order) != current.child_names
    }
}

/// Decide with the default (`update`) rule mode.
pub fn decide(
    existing: Option<&ExistingNodeState>,
    incoming: &PackageEntry,
    mode: ImportBehaviorMode,
) -> MergeDecision {
    ConflictResolver::default().decide(existing, incoming, mode)
}
