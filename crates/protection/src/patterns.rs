//! Regex patterns for recognising protected items.

use regex::Regex;
use std::sync::LazyLock;
use vaultpack_package_schema::NodeType;

/// Properties maintained by the repository itself.
pub static PROTECTED_PROPERTY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(jcr:(primaryType|mixinTypes|uuid|created|createdBy|baseVersion|predecessors|versionHistory|isCheckedOut|frozenUuid|lockOwner|lockIsDeep)|rep:.+)$").unwrap()
});

/// Node types that may only be written through dedicated APIs.
pub static PROTECTED_NODE_TYPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^rep:(ACL|CugPolicy|GrantACE|DenyACE|User|SystemUser|Group|Authorizable|root|system|versionStorage)$").unwrap()
});

/// Protected node types whose content the ACL reconciler can apply.
pub static RECONCILABLE_NODE_TYPE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^rep:(ACL|GrantACE|DenyACE)$").unwrap());

/// Privilege names: namespaced, no whitespace.
pub static PRIVILEGE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(jcr|rep|crx):[A-Za-z][A-Za-z0-9]*$").unwrap());

/// Check if a property name is protected.
pub fn is_protected_property(name: &str) -> bool {
    PROTECTED_PROPERTY_PATTERN.is_match(name)
}

/// Check if a node type is protected.
pub fn is_protected_node_type(node_type: &NodeType) -> bool {
    node_type.is_protected() || PROTECTED_NODE_TYPE_PATTERN.is_match(node_type.as_str())
}

/// Check if a protected node type can be applied by the ACL reconciler.
pub fn is_reconcilable_node_type(node_type: &NodeType) -> bool {
    RECONCILABLE_NODE_TYPE_PATTERN.is_match(node_type.as_str())
}

/// Check if a privilege name is well formed.
pub fn is_valid_privilege(name: &str) -> bool {
    PRIVILEGE_PATTERN.is_match(name)
}

/// All patterns used for protected-item classification.
pub fn all_protection_patterns() -> Vec<(&'static str, &'static Regex)> {
    vec![
        ("protected_property", &*PROTECTED_PROPERTY_PATTERN),
        ("protected_node_type", &*PROTECTED_NODE_TYPE_PATTERN),
        ("reconcilable_node_type", &*RECONCILABLE_NODE_TYPE_PATTERN),
        ("privilege", &*PRIVILEGE_PATTERN),
    ]
}
