//! Manifest types for the content package.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Current manifest schema version.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// The manifest.json resource - package metadata plus filter rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    /// Schema version for forward compatibility.
    pub schema_version: String,
    /// Package identity and informational metadata.
    pub package: PackageMetadata,
    /// Filter rules bounding what the package may touch.
    pub filters: Vec<FilterRule>,
    /// Free-form package properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl PackageManifest {
    /// Create a manifest for the named package with no filters.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            package: PackageMetadata {
                name: name.into(),
                version: version.into(),
                ..Default::default()
            },
            filters: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style helper to append a filter rule.
    pub fn with_filter(mut self, rule: FilterRule) -> Self {
        self.filters.push(rule);
        self
    }

    /// Roots of all filter rules, in declaration order.
    pub fn filter_roots(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.root.as_str()).collect()
    }
}

/// Package identity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    /// Declared dependencies. Informational only, never resolved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

impl PackageMetadata {
    /// `group:name:version`, or `name:version` without a group.
    pub fn id(&self) -> String {
        match &self.group {
            Some(group) => format!("{}:{}:{}", group, self.name, self.version),
            None => format!("{}:{}", self.name, self.version),
        }
    }
}

/// A declared package dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_range: Option<String>,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(group) = &self.group {
            write!(f, "{}:", group)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(range) = &self.version_range {
            write!(f, ":{}", range)?;
        }
        Ok(())
    }
}

/// A filter rule: a root path plus ordered include/exclude patterns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    /// Absolute root path covered by this rule.
    pub root: String,
    /// Include/exclude patterns in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<FilterPattern>,
    /// How existing nodes under this root are treated.
    #[serde(default)]
    pub mode: RuleImportMode,
}

impl FilterRule {
    /// A rule that includes everything under `root`.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            rules: Vec::new(),
            mode: RuleImportMode::default(),
        }
    }

    /// Append an include pattern.
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.rules.push(FilterPattern::Include(pattern.into()));
        self
    }

    /// Append an exclude pattern.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.rules.push(FilterPattern::Exclude(pattern.into()));
        self
    }

    /// Set the import mode.
    pub fn with_mode(mut self, mode: RuleImportMode) -> Self {
        self.mode = mode;
        self
    }

    /// Include patterns, in declaration order.
    pub fn include_patterns(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.is_include())
            .map(|r| r.pattern())
            .collect()
    }

    /// Exclude patterns, in declaration order.
    pub fn exclude_patterns(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| !r.is_include())
            .map(|r| r.pattern())
            .collect()
    }
}

/// One include or exclude pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterPattern {
    Include(String),
    Exclude(String),
}

impl FilterPattern {
    pub fn pattern(&self) -> &str {
        match self {
            FilterPattern::Include(p) | FilterPattern::Exclude(p) => p,
        }
    }

    pub fn is_include(&self) -> bool {
        matches!(self, FilterPattern::Include(_))
    }
}

/// How a filter rule treats nodes that already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleImportMode {
    /// Incoming properties overwrite, unspecified ones are kept.
    #[default]
    Update,
    /// Properties missing from the incoming node are removed.
    Replace,
    /// Existing nodes are left alone; only missing nodes are created.
    Merge,
}
