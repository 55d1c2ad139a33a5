//! Entry types: node descriptors carried by a package and the repository
//! state they are merged into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Repository node type.
///
/// Well-known types get their own variant; anything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    Folder,
    OrderedFolder,
    Unstructured,
    File,
    Resource,
    Root,
    AccessControlList,
    User,
    Group,
    Custom(String),
}

impl NodeType {
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Folder => "nt:folder",
            NodeType::OrderedFolder => "sling:OrderedFolder",
            NodeType::Unstructured => "nt:unstructured",
            NodeType::File => "nt:file",
            NodeType::Resource => "nt:resource",
            NodeType::Root => "rep:root",
            NodeType::AccessControlList => "rep:ACL",
            NodeType::User => "rep:User",
            NodeType::Group => "rep:Group",
            NodeType::Custom(name) => name,
        }
    }

    /// Whether a direct write of this node type bypasses repository invariants.
    pub fn is_protected(&self) -> bool {
        match self {
            NodeType::Root | NodeType::AccessControlList | NodeType::User | NodeType::Group => {
                true
            }
            NodeType::Custom(name) => name.starts_with("rep:"),
            _ => false,
        }
    }

    /// Whether children of this node keep a caller-defined order.
    pub fn allows_child_ordering(&self) -> bool {
        matches!(
            self,
            NodeType::Unstructured | NodeType::OrderedFolder | NodeType::Root
        )
    }
}

impl From<String> for NodeType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "nt:folder" => NodeType::Folder,
            "sling:OrderedFolder" => NodeType::OrderedFolder,
            "nt:unstructured" => NodeType::Unstructured,
            "nt:file" => NodeType::File,
            "nt:resource" => NodeType::Resource,
            "rep:root" => NodeType::Root,
            "rep:ACL" => NodeType::AccessControlList,
            "rep:User" => NodeType::User,
            "rep:Group" => NodeType::Group,
            _ => NodeType::Custom(s),
        }
    }
}

impl From<&str> for NodeType {
    fn from(s: &str) -> Self {
        NodeType::from(s.to_string())
    }
}

impl From<NodeType> for String {
    fn from(t: NodeType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PropertyValue {
    String(String),
    Strings(Vec<String>),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl PropertyValue {
    /// Type name as written in descriptors.
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::String(_) => "String",
            PropertyValue::Strings(_) => "Strings",
            PropertyValue::Long(_) => "Long",
            PropertyValue::Double(_) => "Double",
            PropertyValue::Boolean(_) => "Boolean",
            PropertyValue::Date(_) => "Date",
            PropertyValue::Binary(_) => "Binary",
        }
    }

    /// String rendering of the value, multi-values joined with `,`.
    pub fn to_display_string(&self) -> String {
        match self {
            PropertyValue::String(s) => s.clone(),
            PropertyValue::Strings(v) => v.join(","),
            PropertyValue::Long(n) => n.to_string(),
            PropertyValue::Double(d) => d.to_string(),
            PropertyValue::Boolean(b) => b.to_string(),
            PropertyValue::Date(d) => d.to_rfc3339(),
            PropertyValue::Binary(b) => format!("<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// One access control entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AclEntry {
    pub principal: String,
    pub privileges: BTreeSet<String>,
    #[serde(default = "default_allow")]
    pub allow: bool,
}

fn default_allow() -> bool {
    true
}

impl AclEntry {
    pub fn allow<I, S>(principal: impl Into<String>, privileges: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            principal: principal.into(),
            privileges: privileges.into_iter().map(Into::into).collect(),
            allow: true,
        }
    }

    pub fn deny<I, S>(principal: impl Into<String>, privileges: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow: false,
            ..Self::allow(principal, privileges)
        }
    }

    /// Whether both entries name the same principal and share a privilege.
    pub fn overlaps(&self, other: &AclEntry) -> bool {
        self.principal == other.principal
            && self.privileges.intersection(&other.privileges).next().is_some()
    }
}

impl fmt::Display for AclEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let privileges: Vec<&str> = self.privileges.iter().map(String::as_str).collect();
        write!(
            f,
            "{} {} {}",
            if self.allow { "allow" } else { "deny" },
            self.principal,
            privileges.join(",")
        )
    }
}

/// Whether an entry carries content or marks its path for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[default]
    Content,
    Tombstone,
}

/// The on-disk node descriptor (`.content.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    pub primary_type: NodeType,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_order: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<Vec<AclEntry>>,
}

/// A decoded package entry. Immutable once read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageEntry {
    pub path: String,
    #[serde(default)]
    pub kind: EntryKind,
    #[serde(default = "default_node_type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_order: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<Vec<AclEntry>>,
}

fn default_node_type() -> NodeType {
    NodeType::Unstructured
}

impl PackageEntry {
    /// A content entry with no properties.
    pub fn node(path: impl Into<String>, node_type: impl Into<NodeType>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Content,
            node_type: node_type.into(),
            properties: BTreeMap::new(),
            child_order: Vec::new(),
            acl: None,
        }
    }

    /// A tombstone entry.
    pub fn tombstone(path: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Tombstone,
            ..Self::node(path, NodeType::Unstructured)
        }
    }

    pub fn from_descriptor(path: impl Into<String>, descriptor: NodeDescriptor) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Content,
            node_type: descriptor.primary_type,
            properties: descriptor.properties,
            child_order: descriptor.child_order,
            acl: descriptor.acl,
        }
    }

    pub fn to_descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            primary_type: self.node_type.clone(),
            properties: self.properties.clone(),
            child_order: self.child_order.clone(),
            acl: self.acl.clone(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_acl(mut self, acl: Vec<AclEntry>) -> Self {
        self.acl = Some(acl);
        self
    }

    pub fn with_child_order<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.child_order = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_tombstone(&self) -> bool {
        self.kind == EntryKind::Tombstone
    }

    /// Coarse flag: the entry may carry protected items and must go through
    /// protected-item classification.
    pub fn is_protected_candidate(&self) -> bool {
        !self.is_tombstone()
            && (self.node_type.is_protected()
                || self.acl.is_some()
                || self
                    .properties
                    .keys()
                    .any(|k| k.starts_with("jcr:") || k.starts_with("rep:")))
    }
}

/// Snapshot of a repository node read before mutating its path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingNodeState {
    pub exists: bool,
    pub node_type: NodeType,
    pub properties: BTreeMap<String, PropertyValue>,
    pub child_names: Vec<String>,
    pub protected_acl_entries: Vec<AclEntry>,
}

impl ExistingNodeState {
    pub fn present(node_type: NodeType) -> Self {
        Self {
            exists: true,
            node_type,
            properties: BTreeMap::new(),
            child_names: Vec::new(),
            protected_acl_entries: Vec::new(),
        }
    }
}

/// A buildable package description: manifest plus entries in archive order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageSource {
    pub manifest: crate::PackageManifest,
    pub entries: Vec<PackageEntry>,
}
