//! Filter engine: path scoping by filter rules.

use globset::{GlobBuilder, GlobMatcher};
use std::collections::HashSet;
use tracing::trace;
use vaultpack_common::{path, Error, Result};
use vaultpack_package_schema::{FilterPattern, FilterRule};

/// A filter rule with its patterns compiled.
#[derive(Debug, Clone)]
struct CompiledRule {
    rule: FilterRule,
    /// `(matcher, include)` in declaration order.
    patterns: Vec<(GlobMatcher, bool)>,
    has_includes: bool,
}

impl CompiledRule {
    fn compile(rule: &FilterRule) -> Result<Self> {
        let root = path::normalize(&rule.root)?;

        let mut patterns = Vec::with_capacity(rule.rules.len());
        for pattern in &rule.rules {
            let glob = GlobBuilder::new(pattern.pattern())
                .literal_separator(true)
                .build()
                .map_err(|e| Error::InvalidPattern {
                    pattern: pattern.pattern().to_string(),
                    reason: e.to_string(),
                })?;
            patterns.push((glob.compile_matcher(), pattern.is_include()));
        }

        let has_includes = rule.rules.iter().any(FilterPattern::is_include);
        Ok(Self {
            rule: FilterRule {
                root,
                ..rule.clone()
            },
            patterns,
            has_includes,
        })
    }

    fn covers(&self, p: &str) -> bool {
        path::is_same_or_descendant(&self.rule.root, p)
    }

    /// First matching pattern decides; with no match the path is included
    /// only when the rule has no include patterns. The rule root itself is
    /// included unless a pattern excludes it explicitly.
    fn admits(&self, p: &str) -> bool {
        for (matcher, include) in &self.patterns {
            if matcher.is_match(p) {
                return *include;
            }
        }
        !self.has_includes || p == self.rule.root
    }
}

/// Evaluates filter rules for one package.
#[derive(Debug, Clone)]
pub struct FilterEngine {
    /// Sorted deepest root first.
    rules: Vec<CompiledRule>,
}

impl FilterEngine {
    /// Compile a set of rules.
    ///
    /// Fails with `AmbiguousFilterRule` when two rules share a root and with
    /// `InvalidPattern` when a glob does not compile.
    pub fn new(rules: &[FilterRule]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        let mut roots = HashSet::new();

        for rule in rules {
            let rule = CompiledRule::compile(rule)?;
            if !roots.insert(rule.rule.root.clone()) {
                return Err(Error::AmbiguousFilterRule {
                    root: rule.rule.root,
                });
            }
            compiled.push(rule);
        }

        compiled.sort_by(|a, b| path::depth(&b.rule.root).cmp(&path::depth(&a.rule.root)));
        Ok(Self { rules: compiled })
    }

    /// The most specific rule whose root covers `path`.
    pub fn covering_rule(&self, path: &str) -> Option<&FilterRule> {
        self.rules
            .iter()
            .find(|r| r.covers(path))
            .map(|r| &r.rule)
    }

    /// Whether `path` is imported by this package.
    pub fn is_in_scope(&self, path: &str) -> bool {
        let in_scope = self
            .rules
            .iter()
            .find(|r| r.covers(path))
            .map(|r| r.admits(path))
            .unwrap_or(false);
        trace!("Filter {} -> {}", path, in_scope);
        in_scope
    }

    /// Compiled rules, deepest root first.
    pub fn rules(&self) -> impl Iterator<Item = &FilterRule> {
        self.rules.iter().map(|r| &r.rule)
    }

    /// Normalized filter roots, deepest first.
    pub fn roots(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.rule.root.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Rewrite filter roots and pattern prefixes from below `from` to below `to`.
///
/// Rules and patterns outside `from` are kept unchanged.
pub fn remap_rules(rules: &[FilterRule], from: &str, to: &str) -> Vec<FilterRule> {
    let remap = |s: &str| path::remap(s, from, to).unwrap_or_else(|| s.to_string());

    rules
        .iter()
        .map(|rule| FilterRule {
            root: remap(&rule.root),
            rules: rule
                .rules
                .iter()
                .map(|p| match p {
                    FilterPattern::Include(g) => FilterPattern::Include(remap(g)),
                    FilterPattern::Exclude(g) => FilterPattern::Exclude(remap(g)),
                })
                .collect(),
            mode: rule.mode,
        })
        .collect()
}
