//! Absolute repository path helpers.
//!
//! Repository paths are `/`-separated, start at `/`, never end with `/`
//! (except the root itself) and contain no empty, `.` or `..` segments.

use crate::{Error, Result};

/// The repository root path.
pub const ROOT: &str = "/";

/// Validate and normalize a repository path.
///
/// Duplicate separators and a trailing separator are dropped.
pub fn normalize(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(Error::InvalidPath(format!("{} is not absolute", path)));
    }

    let mut segments = Vec::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(Error::InvalidPath(format!(
                "{} contains a relative segment",
                path
            )));
        }
        segments.push(segment);
    }

    if segments.is_empty() {
        Ok(ROOT.to_string())
    } else {
        Ok(format!("/{}", segments.join("/")))
    }
}

/// Parent path, `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of the path, empty for the root.
pub fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// Number of segments below the root (the root has depth 0).
pub fn depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Join a child name onto a parent path.
pub fn join(parent: &str, child: &str) -> String {
    if parent == ROOT {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Check if `path` equals `ancestor` or lies below it.
pub fn is_same_or_descendant(ancestor: &str, path: &str) -> bool {
    if ancestor == ROOT {
        return true;
    }
    path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

/// Check if `path` lies strictly below `ancestor`.
pub fn is_descendant(ancestor: &str, path: &str) -> bool {
    path != ancestor && is_same_or_descendant(ancestor, path)
}

/// All proper ancestors of `path`, root first.
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut current = parent(path);
    while let Some(p) = current {
        result.push(p);
        current = parent(p);
    }
    result.reverse();
    result
}

/// Rewrite `path` from below `from` to below `to`.
///
/// Returns `None` when `path` is not under `from`.
pub fn remap(path: &str, from: &str, to: &str) -> Option<String> {
    if !is_same_or_descendant(from, path) {
        return None;
    }
    let rest = if from == ROOT {
        path.trim_start_matches('/')
    } else {
        path[from.len()..].trim_start_matches('/')
    };
    if rest.is_empty() {
        Some(to.to_string())
    } else {
        Some(join(to, rest))
    }
}
