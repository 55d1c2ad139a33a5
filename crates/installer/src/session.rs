//! Repository collaborators: the session and access control traits the
//! importer works against, and an in-memory repository implementing them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use vaultpack_common::{hash, path, Error, Result};
use vaultpack_merge::order_children;
use vaultpack_package_schema::{AclEntry, ExistingNodeState, NodeType, PropertyValue};

/// A repository session. Changes stay pending until [`save`](Self::save).
pub trait RepositorySession {
    /// User the session was opened for.
    fn user(&self) -> &str;

    /// Snapshot of the node at `path`, `None` when absent.
    fn get_node(&self, path: &str) -> Result<Option<ExistingNodeState>>;

    fn node_exists(&self, path: &str) -> Result<bool> {
        Ok(self.get_node(path)?.is_some())
    }

    /// Add a node. The parent must exist.
    fn add_node(&mut self, path: &str, node_type: &NodeType) -> Result<()>;

    /// Remove a node and its subtree.
    fn remove_node(&mut self, path: &str) -> Result<()>;

    fn set_property(&mut self, path: &str, name: &str, value: &PropertyValue) -> Result<()>;

    fn remove_property(&mut self, path: &str, name: &str) -> Result<()>;

    /// Reorder children of `path`; see [`order_children`].
    fn order_children(&mut self, path: &str, order: &[String]) -> Result<()>;

    /// Persist pending changes. The only durability boundary.
    fn save(&mut self) -> Result<()>;

    /// Drop pending changes.
    fn discard(&mut self) -> Result<()>;

    fn has_pending_changes(&self) -> bool;
}

/// Access control list management.
pub trait AccessControlProvider {
    /// Entries of the list at `path`, in list order.
    fn get_entries(&self, path: &str) -> Result<Vec<AclEntry>>;

    /// Whether `principal` is known to the repository.
    fn principal_exists(&self, principal: &str) -> Result<bool>;

    fn add_entry(&mut self, path: &str, entry: &AclEntry) -> Result<()>;

    fn remove_entry(&mut self, path: &str, entry: &AclEntry) -> Result<()>;
}

/// A node as stored by [`MemoryRepository`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNode {
    pub node_type: NodeType,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    /// Child names in order.
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub acl: Vec<AclEntry>,
}

impl StoredNode {
    fn new(node_type: NodeType) -> Self {
        Self {
            node_type,
            properties: BTreeMap::new(),
            children: Vec::new(),
            acl: Vec::new(),
        }
    }

    fn snapshot(&self) -> ExistingNodeState {
        ExistingNodeState {
            exists: true,
            node_type: self.node_type.clone(),
            properties: self.properties.clone(),
            child_names: self.children.clone(),
            protected_acl_entries: self.acl.clone(),
        }
    }
}

type Tree = BTreeMap<String, StoredNode>;

/// One staged change.
#[derive(Debug, Clone)]
enum Op {
    AddNode { path: String, node_type: NodeType },
    RemoveNode { path: String },
    SetProperty { path: String, name: String, value: PropertyValue },
    RemoveProperty { path: String, name: String },
    OrderChildren { path: String, order: Vec<String> },
    AddEntry { path: String, entry: AclEntry },
    RemoveEntry { path: String, entry: AclEntry },
}

fn node_mut<'t>(tree: &'t mut Tree, p: &str) -> Result<&'t mut StoredNode> {
    tree.get_mut(p)
        .ok_or_else(|| Error::Repository(format!("No node at {}", p)))
}

fn apply_op(tree: &mut Tree, principals: &BTreeSet<String>, op: &Op) -> Result<()> {
    match op {
        Op::AddNode { path: p, node_type } => {
            if let Some(existing) = tree.get(p) {
                if &existing.node_type == node_type {
                    return Ok(());
                }
                return Err(Error::Repository(format!(
                    "Node {} already exists as {}",
                    p, existing.node_type
                )));
            }
            let parent = path::parent(p)
                .ok_or_else(|| Error::Repository("Cannot add the root node".to_string()))?;
            let parent = node_mut(tree, parent)?;
            let name = path::name(p).to_string();
            // unordered parents keep children sorted
            if parent.node_type.allows_child_ordering() {
                parent.children.push(name);
            } else {
                let at = parent.children.partition_point(|c| c < &name);
                parent.children.insert(at, name);
            }
            tree.insert(p.clone(), StoredNode::new(node_type.clone()));
        }
        Op::RemoveNode { path: p } => {
            let parent = path::parent(p)
                .ok_or_else(|| Error::Repository("Cannot remove the root node".to_string()))?;
            if !tree.contains_key(p) {
                return Err(Error::Repository(format!("No node at {}", p)));
            }
            tree.retain(|k, _| !path::is_same_or_descendant(p, k));
            let name = path::name(p);
            node_mut(tree, parent)?.children.retain(|c| c != name);
        }
        Op::SetProperty { path: p, name, value } => {
            node_mut(tree, p)?
                .properties
                .insert(name.clone(), value.clone());
        }
        Op::RemoveProperty { path: p, name } => {
            node_mut(tree, p)?.properties.remove(name);
        }
        Op::OrderChildren { path: p, order } => {
            let node = node_mut(tree, p)?;
            node.children = order_children(&node.children, order);
        }
        Op::AddEntry { path: p, entry } => {
            if !principals.contains(&entry.principal) {
                return Err(Error::PrincipalResolutionFailure {
                    path: p.clone(),
                    principal: entry.principal.clone(),
                });
            }
            let node = node_mut(tree, p)?;
            if !node.acl.contains(entry) {
                node.acl.push(entry.clone());
            }
        }
        Op::RemoveEntry { path: p, entry } => {
            node_mut(tree, p)?.acl.retain(|e| e != entry);
        }
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
struct RepoSnapshot {
    nodes: Tree,
    principals: BTreeSet<String>,
}

#[derive(Debug)]
struct RepoState {
    nodes: Tree,
    principals: BTreeSet<String>,
    file: Option<PathBuf>,
    read_only: bool,
}

impl RepoState {
    fn persist(&self, nodes: &Tree) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let snapshot = RepoSnapshot {
            nodes: nodes.clone(),
            principals: self.principals.clone(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| Error::PersistenceFailure(e.to_string()))?;
        fs::write(file, json).map_err(|e| {
            Error::PersistenceFailure(format!("Cannot write {}: {}", file.display(), e))
        })
    }
}

/// In-memory repository, optionally backed by a JSON file.
///
/// Cloning yields another handle to the same tree.
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    inner: Arc<Mutex<RepoState>>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    /// An empty repository holding only the root node.
    pub fn new() -> Self {
        let mut nodes = Tree::new();
        nodes.insert(path::ROOT.to_string(), StoredNode::new(NodeType::Root));
        let principals = ["everyone", "admin", "anonymous"]
            .into_iter()
            .map(String::from)
            .collect();

        Self {
            inner: Arc::new(Mutex::new(RepoState {
                nodes,
                principals,
                file: None,
                read_only: false,
            })),
        }
    }

    /// Grant `everyone` read access at the root.
    pub fn with_default_acl(self) -> Self {
        if let Ok(mut state) = self.inner.lock() {
            if let Some(root) = state.nodes.get_mut(path::ROOT) {
                let entry = AclEntry::allow("everyone", ["jcr:read"]);
                if !root.acl.contains(&entry) {
                    root.acl.push(entry);
                }
            }
        }
        self
    }

    /// Open a file-backed repository, creating an empty one when the file
    /// does not exist yet.
    pub fn open(file: &Path) -> Result<Self> {
        let repo = Self::new();
        {
            let mut state = repo.state()?;
            if file.exists() {
                let bytes = fs::read(file)?;
                let snapshot: RepoSnapshot = serde_json::from_slice(&bytes)?;
                state.nodes = snapshot.nodes;
                state.principals = snapshot.principals;
                info!("Loaded repository {} ({} nodes)", file.display(), state.nodes.len());
            }
            state.file = Some(file.to_path_buf());
        }
        Ok(repo)
    }

    /// Write the current tree to the backing file.
    pub fn flush(&self) -> Result<()> {
        let state = self.state()?;
        state.persist(&state.nodes)
    }

    fn state(&self) -> Result<MutexGuard<'_, RepoState>> {
        self.inner
            .lock()
            .map_err(|_| Error::Repository("Repository lock poisoned".to_string()))
    }

    pub fn add_principal(&self, principal: impl Into<String>) -> Result<()> {
        self.state()?.principals.insert(principal.into());
        Ok(())
    }

    /// Make every save fail with `PersistenceFailure`.
    pub fn set_read_only(&self, read_only: bool) -> Result<()> {
        self.state()?.read_only = read_only;
        Ok(())
    }

    /// Open a session for a known principal.
    pub fn login(&self, user: &str) -> Result<MemorySession> {
        let state = self.state()?;
        if !state.principals.contains(user) {
            return Err(Error::Repository(format!("Unknown user {}", user)));
        }
        debug!("Session opened for {}", user);
        Ok(MemorySession {
            repo: self.clone(),
            user: user.to_string(),
            staged: state.nodes.clone(),
            principals: state.principals.clone(),
            ops: Vec::new(),
        })
    }

    /// Close a session, dropping anything it did not save.
    pub fn logout(&self, mut session: MemorySession) {
        if session.has_pending_changes() {
            warn!(
                "Session for {} closed with {} unsaved changes",
                session.user,
                session.ops.len()
            );
            session.ops.clear();
        }
        debug!("Session closed for {}", session.user);
    }

    /// Node stored at `path`.
    pub fn node(&self, p: &str) -> Result<Option<StoredNode>> {
        Ok(self.state()?.nodes.get(p).cloned())
    }

    /// Copy of the whole tree.
    pub fn snapshot(&self) -> Result<BTreeMap<String, StoredNode>> {
        Ok(self.state()?.nodes.clone())
    }

    /// SHA-256 of the canonical tree.
    pub fn fingerprint(&self) -> Result<String> {
        let state = self.state()?;
        Ok(hash::sha256_json(&state.nodes)?)
    }
}

/// A session over a [`MemoryRepository`].
///
/// Changes are applied to a private copy and logged; `save` replays the
/// log onto the shared tree.
#[derive(Debug)]
pub struct MemorySession {
    repo: MemoryRepository,
    user: String,
    staged: Tree,
    principals: BTreeSet<String>,
    ops: Vec<Op>,
}

impl MemorySession {
    fn stage(&mut self, op: Op) -> Result<()> {
        apply_op(&mut self.staged, &self.principals, &op)?;
        self.ops.push(op);
        Ok(())
    }

    /// Number of staged changes.
    pub fn pending_changes(&self) -> usize {
        self.ops.len()
    }
}

impl RepositorySession for MemorySession {
    fn user(&self) -> &str {
        &self.user
    }

    fn get_node(&self, p: &str) -> Result<Option<ExistingNodeState>> {
        Ok(self.staged.get(p).map(StoredNode::snapshot))
    }

    fn add_node(&mut self, p: &str, node_type: &NodeType) -> Result<()> {
        self.stage(Op::AddNode {
            path: p.to_string(),
            node_type: node_type.clone(),
        })
    }

    fn remove_node(&mut self, p: &str) -> Result<()> {
        self.stage(Op::RemoveNode { path: p.to_string() })
    }

    fn set_property(&mut self, p: &str, name: &str, value: &PropertyValue) -> Result<()> {
        self.stage(Op::SetProperty {
            path: p.to_string(),
            name: name.to_string(),
            value: value.clone(),
        })
    }

    fn remove_property(&mut self, p: &str, name: &str) -> Result<()> {
        self.stage(Op::RemoveProperty {
            path: p.to_string(),
            name: name.to_string(),
        })
    }

    fn order_children(&mut self, p: &str, order: &[String]) -> Result<()> {
        self.stage(Op::OrderChildren {
            path: p.to_string(),
            order: order.to_vec(),
        })
    }

    fn save(&mut self) -> Result<()> {
        let mut state = self.repo.state()?;
        if state.read_only {
            return Err(Error::PersistenceFailure("Repository is read-only".to_string()));
        }

        let mut nodes = state.nodes.clone();
        for op in &self.ops {
            apply_op(&mut nodes, &state.principals, op)
                .map_err(|e| Error::PersistenceFailure(format!("Conflicting change: {}", e)))?;
        }
        state.persist(&nodes)?;

        debug!("Saved {} changes for {}", self.ops.len(), self.user);
        state.nodes = nodes;
        self.staged = state.nodes.clone();
        self.principals = state.principals.clone();
        self.ops.clear();
        Ok(())
    }

    fn discard(&mut self) -> Result<()> {
        let state = self.repo.state()?;
        if !self.ops.is_empty() {
            debug!("Discarding {} changes for {}", self.ops.len(), self.user);
        }
        self.staged = state.nodes.clone();
        self.ops.clear();
        Ok(())
    }

    fn has_pending_changes(&self) -> bool {
        !self.ops.is_empty()
    }
}

impl AccessControlProvider for MemorySession {
    fn get_entries(&self, p: &str) -> Result<Vec<AclEntry>> {
        self.staged
            .get(p)
            .map(|n| n.acl.clone())
            .ok_or_else(|| Error::Repository(format!("No node at {}", p)))
    }

    fn principal_exists(&self, principal: &str) -> Result<bool> {
        Ok(self.principals.contains(principal))
    }

    fn add_entry(&mut self, p: &str, entry: &AclEntry) -> Result<()> {
        self.stage(Op::AddEntry {
            path: p.to_string(),
            entry: entry.clone(),
        })
    }

    fn remove_entry(&mut self, p: &str, entry: &AclEntry) -> Result<()> {
        self.stage(Op::RemoveEntry {
            path: p.to_string(),
            entry: entry.clone(),
        })
    }
}
