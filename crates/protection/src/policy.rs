//! Protected-item policy implementation.

use crate::patterns::{
    is_protected_node_type, is_protected_property, is_reconcilable_node_type, is_valid_privilege,
};
use crate::POLICY_NODE_NAME;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};
use vaultpack_common::{path, ImportBehaviorMode};
use vaultpack_package_schema::{
    AclEntry, ExistingNodeState, FailureReason, NodeType, PackageEntry, PropertyValue,
    ProtectionStats,
};

/// Classification of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionLevel {
    Normal,
    Protected,
}

/// What to do with one protected item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectedResolution {
    Apply,
    Skip,
    Fail,
}

/// A single protected item carried by an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectedItem {
    NodeType(NodeType),
    Property(String),
    AccessControl,
}

impl ProtectedItem {
    /// Item name used in progress details and warnings.
    pub fn name(&self) -> String {
        match self {
            ProtectedItem::NodeType(t) => t.to_string(),
            ProtectedItem::Property(name) => name.clone(),
            ProtectedItem::AccessControl => POLICY_NODE_NAME.to_string(),
        }
    }
}

/// `jcr:primaryType` repeating the entry's own type carries no information.
fn is_redundant_type_property(entry: &PackageEntry, name: &str, value: &PropertyValue) -> bool {
    name == "jcr:primaryType"
        && matches!(value, PropertyValue::String(s) if s == entry.node_type.as_str())
}

/// Whether the entry is an access control list node (`<parent>/rep:policy`).
fn is_policy_node(entry: &PackageEntry) -> bool {
    is_reconcilable_node_type(&entry.node_type) && path::name(&entry.path) == POLICY_NODE_NAME
}

/// Classify an entry.
pub fn classify(entry: &PackageEntry) -> ProtectionLevel {
    if protected_items(entry).is_empty() {
        ProtectionLevel::Normal
    } else {
        ProtectionLevel::Protected
    }
}

/// Path whose access control list the entry's ACL applies to.
///
/// A `rep:policy` node carries the list of its parent.
pub fn acl_target(entry: &PackageEntry) -> &str {
    if is_policy_node(entry) {
        path::parent(&entry.path).unwrap_or(path::ROOT)
    } else {
        &entry.path
    }
}

/// All protected items carried by an entry.
pub fn protected_items(entry: &PackageEntry) -> Vec<ProtectedItem> {
    if entry.is_tombstone() {
        return Vec::new();
    }

    let mut items = Vec::new();
    let policy_node = is_policy_node(entry);

    if is_protected_node_type(&entry.node_type) && !policy_node {
        items.push(ProtectedItem::NodeType(entry.node_type.clone()));
    }
    for (name, value) in &entry.properties {
        if is_protected_property(name) && !is_redundant_type_property(entry, name, value) {
            items.push(ProtectedItem::Property(name.clone()));
        }
    }
    if entry.acl.is_some() || policy_node {
        items.push(ProtectedItem::AccessControl);
    }
    items
}

/// Resolution of all protected items of an entry, folded into one answer:
/// `Fail` if any item fails, `Apply` if any item applies, `Skip` otherwise.
pub fn resolve_protected(
    entry: &PackageEntry,
    existing: Option<&ExistingNodeState>,
    existing_acl: &[AclEntry],
    mode: ImportBehaviorMode,
) -> ProtectedResolution {
    let policy = ProtectedItemPolicy::new(mode);
    let resolutions: Vec<ProtectedResolution> = protected_items(entry)
        .iter()
        .map(|item| policy.resolve_item(item, entry, existing, existing_acl))
        .collect();

    if resolutions.contains(&ProtectedResolution::Fail) {
        ProtectedResolution::Fail
    } else if resolutions.contains(&ProtectedResolution::Apply) {
        ProtectedResolution::Apply
    } else {
        ProtectedResolution::Skip
    }
}

/// How one entry is split between raw writes, the ACL reconciler and
/// skipped items.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectionPlan {
    pub level: ProtectionLevel,
    /// Properties safe for a raw write.
    pub normal_properties: BTreeMap<String, PropertyValue>,
    /// ACL to hand to the reconciler; `None` leaves access control alone.
    pub acl: Option<Vec<AclEntry>>,
    /// Path the ACL applies to.
    pub acl_target: String,
    /// The node itself must not be written structurally.
    pub skip_node: bool,
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
    /// Existing ACL entries the plan clears.
    pub cleared: usize,
    pub failure: Option<FailureReason>,
}

impl ProtectionPlan {
    /// Fold this plan into run-level counters.
    pub fn record(&self, stats: &mut ProtectionStats, path: &str) {
        stats.applied += self.applied.len();
        stats.skipped += self.skipped.len();
        stats.cleared += self.cleared;
        if self.failure.is_some() {
            stats.failed += 1;
        }
        stats
            .skipped_items
            .extend(self.skipped.iter().map(|item| format!("{}:{}", path, item)));
    }
}

/// Protected-item policy for one import run.
#[derive(Debug, Clone, Copy)]
pub struct ProtectedItemPolicy {
    mode: ImportBehaviorMode,
}

impl ProtectedItemPolicy {
    pub fn new(mode: ImportBehaviorMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ImportBehaviorMode {
        self.mode
    }

    /// Resolve a single protected item.
    pub fn resolve_item(
        &self,
        item: &ProtectedItem,
        entry: &PackageEntry,
        existing: Option<&ExistingNodeState>,
        existing_acl: &[AclEntry],
    ) -> ProtectedResolution {
        match self.mode {
            ImportBehaviorMode::Strict => {
                if is_identical(item, entry, existing, existing_acl) {
                    ProtectedResolution::Apply
                } else {
                    ProtectedResolution::Fail
                }
            }
            ImportBehaviorMode::BestEffort => match item {
                ProtectedItem::AccessControl => ProtectedResolution::Apply,
                _ => ProtectedResolution::Skip,
            },
            ImportBehaviorMode::Clear => ProtectedResolution::Skip,
        }
    }

    /// Split an entry into raw writes, ACL work and skipped items.
    ///
    /// `existing_acl` is the current list at [`acl_target`] of the entry.
    pub fn plan(
        &self,
        entry: &PackageEntry,
        existing: Option<&ExistingNodeState>,
        existing_acl: &[AclEntry],
    ) -> ProtectionPlan {
        let normal_properties = entry
            .properties
            .iter()
            .filter(|(name, value)| {
                !is_protected_property(name) && !is_redundant_type_property(entry, name, value)
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let mut plan = ProtectionPlan {
            level: classify(entry),
            normal_properties,
            acl: None,
            acl_target: acl_target(entry).to_string(),
            skip_node: is_policy_node(entry),
            applied: Vec::new(),
            skipped: Vec::new(),
            cleared: 0,
            failure: None,
        };

        if entry.is_tombstone() {
            return plan;
        }

        for item in protected_items(entry) {
            let resolution = self.resolve_item(&item, entry, existing, existing_acl);
            match resolution {
                ProtectedResolution::Apply => {
                    if item == ProtectedItem::AccessControl {
                        plan.acl = Some(self.reconcilable_entries(entry, &mut plan.skipped));
                    }
                    plan.applied.push(item.name());
                }
                ProtectedResolution::Skip => {
                    if let ProtectedItem::NodeType(_) = item {
                        plan.skip_node = true;
                    }
                    if self.mode == ImportBehaviorMode::Clear {
                        debug!("Ignoring protected item {} at {}", item.name(), entry.path);
                    } else {
                        warn!("Skipping protected item {} at {}", item.name(), entry.path);
                    }
                    plan.skipped.push(item.name());
                }
                ProtectedResolution::Fail => {
                    plan.failure = Some(FailureReason::ProtectedItemViolation { item: item.name() });
                    return plan;
                }
            }
        }

        if self.mode == ImportBehaviorMode::Clear && !plan.skip_node {
            plan.cleared = existing_acl.len();
            plan.acl = Some(Vec::new());
        }

        plan
    }

    /// Incoming ACL entries the reconciler can apply; the rest are recorded as skipped.
    fn reconcilable_entries(&self, entry: &PackageEntry, skipped: &mut Vec<String>) -> Vec<AclEntry> {
        let incoming = entry.acl.clone().unwrap_or_default();
        if self.mode != ImportBehaviorMode::BestEffort {
            return incoming;
        }

        let mut accepted = Vec::new();
        for ace in incoming {
            if ace.privileges.iter().all(|p| is_valid_privilege(p)) && !ace.privileges.is_empty() {
                accepted.push(ace);
            } else {
                warn!(
                    "Skipping access control entry for {} at {}: unrecognised privileges",
                    ace.principal, entry.path
                );
                skipped.push(format!("{}[{}]", POLICY_NODE_NAME, ace.principal));
            }
        }
        accepted
    }
}

fn is_identical(
    item: &ProtectedItem,
    entry: &PackageEntry,
    existing: Option<&ExistingNodeState>,
    existing_acl: &[AclEntry],
) -> bool {
    match item {
        ProtectedItem::NodeType(t) => existing.map(|e| &e.node_type == t).unwrap_or(false),
        ProtectedItem::Property(name) => {
            let current = existing.and_then(|e| e.properties.get(name));
            current.is_some() && current == entry.properties.get(name)
        }
        ProtectedItem::AccessControl => {
            let incoming: BTreeSet<&AclEntry> = entry.acl.iter().flatten().collect();
            let current: BTreeSet<&AclEntry> = existing_acl.iter().collect();
            incoming == current
        }
    }
}
