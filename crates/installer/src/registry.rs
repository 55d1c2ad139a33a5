//! Installed-package registry under `/etc/packages`.

use crate::session::RepositorySession;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use vaultpack_common::{path, Result};
use vaultpack_package_schema::{ImportState, NodeType, PackageManifest, PropertyValue};

/// Registry root.
pub const PACKAGES_ROOT: &str = "/etc/packages";

/// A package recorded as installed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPackage {
    pub name: String,
    pub group: Option<String>,
    pub version: String,
    pub status: String,
    pub installed_at: Option<DateTime<Utc>>,
    pub dependencies: Vec<String>,
}

fn string_property(state: &vaultpack_package_schema::ExistingNodeState, name: &str) -> Option<String> {
    match state.properties.get(name) {
        Some(PropertyValue::String(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Record `manifest` as installed with the run's final status.
///
/// The change is staged on `session`; the caller saves.
pub fn record_installation<S: RepositorySession + ?Sized>(
    session: &mut S,
    manifest: &PackageManifest,
    status: ImportState,
) -> Result<()> {
    for ancestor in path::ancestors(PACKAGES_ROOT)
        .into_iter()
        .skip(1)
        .chain(std::iter::once(PACKAGES_ROOT))
    {
        if !session.node_exists(ancestor)? {
            session.add_node(ancestor, &NodeType::Folder)?;
        }
    }

    let node = path::join(PACKAGES_ROOT, &manifest.package.name);
    match session.get_node(&node)? {
        Some(existing) if existing.node_type != NodeType::Unstructured => {
            session.remove_node(&node)?;
            session.add_node(&node, &NodeType::Unstructured)?;
        }
        Some(_) => {}
        None => session.add_node(&node, &NodeType::Unstructured)?,
    }

    let package = &manifest.package;
    session.set_property(&node, "version", &PropertyValue::String(package.version.clone()))?;
    session.set_property(&node, "status", &PropertyValue::String(status.to_string()))?;
    session.set_property(&node, "installedAt", &PropertyValue::Date(Utc::now()))?;
    session.set_property(
        &node,
        "dependencies",
        &PropertyValue::Strings(package.dependencies.iter().map(|d| d.to_string()).collect()),
    )?;
    match &package.group {
        Some(group) => session.set_property(&node, "group", &PropertyValue::String(group.clone()))?,
        None => session.remove_property(&node, "group")?,
    }

    info!("Recorded {} as {}", package.id(), status);
    Ok(())
}

/// Packages recorded in the registry, by name.
pub fn list_installed<S: RepositorySession + ?Sized>(session: &S) -> Result<Vec<InstalledPackage>> {
    let Some(root) = session.get_node(PACKAGES_ROOT)? else {
        return Ok(Vec::new());
    };

    let mut installed = Vec::new();
    for name in &root.child_names {
        let Some(state) = session.get_node(&path::join(PACKAGES_ROOT, name))? else {
            continue;
        };
        let installed_at = match state.properties.get("installedAt") {
            Some(PropertyValue::Date(d)) => Some(*d),
            _ => None,
        };
        let dependencies = match state.properties.get("dependencies") {
            Some(PropertyValue::Strings(v)) => v.clone(),
            _ => Vec::new(),
        };
        installed.push(InstalledPackage {
            name: name.clone(),
            group: string_property(&state, "group"),
            version: string_property(&state, "version").unwrap_or_default(),
            status: string_property(&state, "status").unwrap_or_default(),
            installed_at,
            dependencies,
        });
    }
    installed.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(installed)
}
