//! End-to-end import scenarios against the in-memory repository.

use crate::archive::{write_package_bytes, PackageReader, MANIFEST_PATH};
use crate::config::{ImportOptions, RootRemap};
use crate::orchestrator::Importer;
use crate::progress::{CollectingSink, ProgressSink};
use crate::registry::list_installed;
use crate::session::{AccessControlProvider, MemoryRepository, MemorySession, RepositorySession};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vaultpack_common::{Error, ImportBehaviorMode, Result};
use vaultpack_package_schema::{
    AclEntry, Action, ExistingNodeState, FilterRule, ImportReport, ImportState, NodeType, Outcome,
    PackageEntry, PackageManifest, PackageSource, Phase, ProgressEvent, PropertyValue, SkipReason,
};

fn package(name: &str, rules: Vec<FilterRule>, entries: Vec<PackageEntry>) -> PackageReader {
    let mut manifest = PackageManifest::new(name, "1.0");
    for rule in rules {
        manifest = manifest.with_filter(rule);
    }
    let bytes = write_package_bytes(&PackageSource { manifest, entries }).unwrap();
    PackageReader::from_bytes(&bytes).unwrap()
}

fn site_rule() -> FilterRule {
    FilterRule::new("/content/site").include("/content/site/**")
}

fn site_package() -> PackageReader {
    package(
        "site",
        vec![site_rule()],
        vec![PackageEntry::node("/content/site/en", NodeType::Folder)],
    )
}

fn import(session: &mut MemorySession, options: ImportOptions, reader: &PackageReader) -> ImportReport {
    Importer::new(session, options).import(reader).unwrap()
}

fn events_for<'r>(report: &'r ImportReport, path: &str) -> Vec<&'r ProgressEvent> {
    report.events.iter().filter(|e| e.path == path).collect()
}

/// Seed nodes and save.
fn seed(repo: &MemoryRepository, nodes: &[(&str, NodeType)]) {
    let mut session = repo.login("admin").unwrap();
    for (p, node_type) in nodes {
        session.add_node(p, node_type).unwrap();
    }
    session.save().unwrap();
}

#[test]
fn test_strict_import_into_empty_repository() {
    let repo = MemoryRepository::new();
    let mut session = repo.login("admin").unwrap();

    let report = import(
        &mut session,
        ImportOptions::new(ImportBehaviorMode::Strict),
        &site_package(),
    );
    session.save().unwrap();

    assert_eq!(report.status, ImportState::Committed);
    assert_eq!(report.events.len(), 1);
    assert_eq!(report.events[0].path, "/content/site/en");
    assert_eq!(report.events[0].action, Action::Add);
    assert_eq!(report.events[0].outcome, Outcome::Success);
    assert_eq!(
        repo.node("/content/site/en").unwrap().unwrap().node_type,
        NodeType::Folder
    );
    assert_eq!(
        repo.node("/content/site").unwrap().unwrap().node_type,
        NodeType::Folder
    );
}

#[test]
fn test_strict_type_conflict_rolls_back() {
    let repo = MemoryRepository::new();
    seed(
        &repo,
        &[
            ("/content", NodeType::Folder),
            ("/content/site", NodeType::Folder),
            ("/content/site/en", NodeType::Unstructured),
        ],
    );
    let before = repo.fingerprint().unwrap();

    let mut session = repo.login("admin").unwrap();
    let mut importer = Importer::new(&mut session, ImportOptions::new(ImportBehaviorMode::Strict));
    let report = importer.import(&site_package()).unwrap();
    assert_eq!(importer.state(), ImportState::RolledBack);

    assert_eq!(report.status, ImportState::RolledBack);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].error.contains("Type conflict"));
    assert_eq!(report.failed_paths(), vec!["/content/site/en"]);
    assert!(report
        .events
        .iter()
        .any(|e| e.phase == Phase::Rollback && e.action == Action::Rollback));

    assert!(!session.has_pending_changes());
    assert_eq!(repo.fingerprint().unwrap(), before);
}

#[test]
fn test_strict_rollback_reports_applied_paths_rolled_back() {
    let repo = MemoryRepository::new();
    seed(
        &repo,
        &[
            ("/content", NodeType::Folder),
            ("/content/site", NodeType::Folder),
            ("/content/site/fr", NodeType::Unstructured),
        ],
    );
    let reader = package(
        "site",
        vec![site_rule()],
        vec![
            PackageEntry::node("/content/site/en", NodeType::Folder),
            PackageEntry::node("/content/site/fr", NodeType::Folder),
        ],
    );

    let mut session = repo.login("admin").unwrap();
    let report = import(&mut session, ImportOptions::new(ImportBehaviorMode::Strict), &reader);

    assert_eq!(report.status, ImportState::RolledBack);
    assert_eq!(
        report.path_outcomes.get("/content/site/en"),
        Some(&Outcome::Skipped {
            reason: SkipReason::RolledBack
        })
    );
    assert!(report.path_outcomes["/content/site/fr"].is_error());
    assert!(!report
        .path_outcomes
        .values()
        .any(|outcome| *outcome == Outcome::Success));
}

#[test]
fn test_recreate_keeps_filtered_descendants() {
    let repo = MemoryRepository::new();
    seed(
        &repo,
        &[
            ("/content", NodeType::Folder),
            ("/content/site", NodeType::Folder),
            ("/content/site/en", NodeType::Unstructured),
            ("/content/site/en/keep", NodeType::Folder),
        ],
    );
    let reader = package(
        "site",
        vec![FilterRule::new("/content/site")
            .exclude("/content/site/en/keep")
            .exclude("/content/site/en/keep/**")],
        vec![PackageEntry::node("/content/site/en", NodeType::Folder)],
    );

    let mut session = repo.login("admin").unwrap();
    let report = import(
        &mut session,
        ImportOptions::new(ImportBehaviorMode::BestEffort),
        &reader,
    );
    session.save().unwrap();

    assert_eq!(report.status, ImportState::PartiallyFailed);
    assert!(report.failures[0].error.contains("/content/site/en/keep"));
    assert!(repo.node("/content/site/en/keep").unwrap().is_some());
    assert_eq!(
        repo.node("/content/site/en").unwrap().unwrap().node_type,
        NodeType::Unstructured
    );
}

#[test]
fn test_tombstone_keeps_filtered_descendants() {
    let repo = MemoryRepository::new();
    seed(
        &repo,
        &[
            ("/content", NodeType::Folder),
            ("/content/site", NodeType::Folder),
            ("/content/site/old", NodeType::Folder),
            ("/content/site/old/keep", NodeType::Folder),
        ],
    );
    let before = repo.fingerprint().unwrap();
    let reader = package(
        "site",
        vec![FilterRule::new("/content/site")
            .exclude("/content/site/old/keep")
            .exclude("/content/site/old/keep/**")],
        vec![PackageEntry::tombstone("/content/site/old")],
    );

    let mut session = repo.login("admin").unwrap();
    let report = import(&mut session, ImportOptions::new(ImportBehaviorMode::Strict), &reader);

    assert_eq!(report.status, ImportState::RolledBack);
    assert!(matches!(
        report.path_outcomes.get("/content/site/old"),
        Some(Outcome::Error { .. })
    ));
    assert!(session.get_node("/content/site/old/keep").unwrap().is_some());
    assert_eq!(repo.fingerprint().unwrap(), before);
}

#[test]
fn test_best_effort_recreates_conflicting_node() {
    let repo = MemoryRepository::new();
    seed(
        &repo,
        &[
            ("/content", NodeType::Folder),
            ("/content/site", NodeType::Folder),
            ("/content/site/en", NodeType::Unstructured),
        ],
    );

    let mut session = repo.login("admin").unwrap();
    let report = import(
        &mut session,
        ImportOptions::new(ImportBehaviorMode::BestEffort),
        &site_package(),
    );
    session.save().unwrap();

    assert_eq!(report.status, ImportState::Committed);
    let events = events_for(&report, "/content/site/en");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, Action::Replace);
    assert_eq!(events[0].outcome, Outcome::Success);
    assert_eq!(
        repo.node("/content/site/en").unwrap().unwrap().node_type,
        NodeType::Folder
    );
}

fn rich_package() -> PackageReader {
    package(
        "site",
        vec![FilterRule::new("/content/site")],
        vec![
            PackageEntry::node("/content/site/en/b", NodeType::Folder).with_property("title", "B"),
            PackageEntry::node("/content/site", NodeType::Folder).with_property("title", "Site"),
            PackageEntry::node("/content/site/en", NodeType::Unstructured)
                .with_property("title", "English")
                .with_child_order(["b", "a"]),
            PackageEntry::node("/content/site/en/a", NodeType::Folder).with_property("title", "A"),
        ],
    )
}

#[test]
fn test_reimport_is_idempotent() {
    let repo = MemoryRepository::new();
    let options = ImportOptions::new(ImportBehaviorMode::BestEffort);

    let mut session = repo.login("admin").unwrap();
    let first = import(&mut session, options.clone(), &rich_package());
    session.save().unwrap();
    assert_eq!(first.status, ImportState::Committed);
    assert_eq!(
        repo.node("/content/site/en").unwrap().unwrap().children,
        vec!["b".to_string(), "a".to_string()]
    );
    let after_first = repo.fingerprint().unwrap();

    let second = import(&mut session, options, &rich_package());
    assert_eq!(second.status, ImportState::Committed);
    assert!(!session.has_pending_changes());
    assert_eq!(second.events.len(), 4);
    assert!(second
        .events
        .iter()
        .all(|e| e.action == Action::Noop && e.outcome == Outcome::Success));

    session.save().unwrap();
    assert_eq!(repo.fingerprint().unwrap(), after_first);
}

fn disjoint_a() -> (FilterRule, Vec<PackageEntry>) {
    (
        FilterRule::new("/content/a"),
        vec![
            PackageEntry::node("/content/a", NodeType::Folder).with_property("title", "A"),
            PackageEntry::node("/content/a/x", NodeType::Unstructured).with_property("n", "1"),
        ],
    )
}

fn disjoint_b() -> (FilterRule, Vec<PackageEntry>) {
    (
        FilterRule::new("/content/b"),
        vec![
            PackageEntry::node("/content/b/y", NodeType::Folder),
            PackageEntry::node("/content/b", NodeType::Folder).with_property("title", "B"),
        ],
    )
}

fn import_all(repo: &MemoryRepository, readers: &[PackageReader]) {
    for reader in readers {
        let mut session = repo.login("admin").unwrap();
        let report = import(
            &mut session,
            ImportOptions::new(ImportBehaviorMode::BestEffort),
            reader,
        );
        assert_eq!(report.status, ImportState::Committed);
        session.save().unwrap();
    }
}

#[test]
fn test_disjoint_packages_compose_in_either_order() {
    let (rule_a, entries_a) = disjoint_a();
    let (rule_b, entries_b) = disjoint_b();
    let a = || package("a", vec![rule_a.clone()], entries_a.clone());
    let b = || package("b", vec![rule_b.clone()], entries_b.clone());
    let union = || {
        let mut entries = entries_a.clone();
        entries.extend(entries_b.clone());
        package("union", vec![rule_a.clone(), rule_b.clone()], entries)
    };

    let a_then_b = MemoryRepository::new();
    import_all(&a_then_b, &[a(), b()]);
    let b_then_a = MemoryRepository::new();
    import_all(&b_then_a, &[b(), a()]);
    let together = MemoryRepository::new();
    import_all(&together, &[union()]);

    let expected = together.fingerprint().unwrap();
    assert_eq!(a_then_b.fingerprint().unwrap(), expected);
    assert_eq!(b_then_a.fingerprint().unwrap(), expected);
}

#[test]
fn test_concurrent_sessions_with_disjoint_scopes() {
    let (rule_a, entries_a) = disjoint_a();
    let (rule_b, entries_b) = disjoint_b();
    let options = ImportOptions::new(ImportBehaviorMode::BestEffort);

    let repo = MemoryRepository::new();
    let mut first = repo.login("admin").unwrap();
    let mut second = repo.login("admin").unwrap();
    import(&mut first, options.clone(), &package("a", vec![rule_a.clone()], entries_a.clone()));
    import(&mut second, options, &package("b", vec![rule_b.clone()], entries_b.clone()));
    second.save().unwrap();
    first.save().unwrap();

    let mut entries = entries_a;
    entries.extend(entries_b);
    let together = MemoryRepository::new();
    import_all(&together, &[package("union", vec![rule_a, rule_b], entries)]);

    assert_eq!(repo.fingerprint().unwrap(), together.fingerprint().unwrap());
}

#[test]
fn test_out_of_scope_paths_are_untouched() {
    let repo = MemoryRepository::new();
    seed(
        &repo,
        &[
            ("/content", NodeType::Folder),
            ("/content/outside", NodeType::Unstructured),
        ],
    );
    let outside_before = repo.node("/content/outside").unwrap();

    let reader = package(
        "site",
        vec![FilterRule::new("/content/site").exclude("/content/site/private/**")],
        vec![
            PackageEntry::node("/content/site", NodeType::Folder),
            PackageEntry::node("/content/site/private/doc", NodeType::Folder),
            PackageEntry::node("/content/outside/x", NodeType::Folder),
        ],
    );

    let mut session = repo.login("admin").unwrap();
    let report = import(
        &mut session,
        ImportOptions::new(ImportBehaviorMode::BestEffort),
        &reader,
    );
    session.save().unwrap();

    assert_eq!(report.status, ImportState::Committed);
    for filtered in ["/content/site/private/doc", "/content/outside/x"] {
        let events = events_for(&report, filtered);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].phase, Phase::Filter);
        assert_eq!(
            events[0].outcome,
            Outcome::Skipped {
                reason: SkipReason::Filtered
            }
        );
        assert!(repo.node(filtered).unwrap().is_none());
    }
    assert!(repo.node("/content/site/private").unwrap().is_none());
    assert_eq!(repo.node("/content/outside").unwrap(), outside_before);
}

#[test]
fn test_best_effort_acl_keeps_unrelated_allows() {
    let repo = MemoryRepository::new();
    repo.add_principal("bob").unwrap();
    repo.add_principal("alice").unwrap();
    {
        let mut session = repo.login("admin").unwrap();
        session.add_node("/content", &NodeType::Folder).unwrap();
        session.add_node("/content/site", &NodeType::Folder).unwrap();
        session
            .add_entry("/content/site", &AclEntry::allow("bob", ["jcr:read"]))
            .unwrap();
        session
            .add_entry("/content/site", &AclEntry::allow("alice", ["jcr:write"]))
            .unwrap();
        session.save().unwrap();
    }

    let reader = package(
        "site",
        vec![FilterRule::new("/content/site")],
        vec![PackageEntry::node("/content/site", NodeType::Folder)
            .with_acl(vec![AclEntry::deny("bob", ["jcr:read"])])],
    );

    let mut session = repo.login("admin").unwrap();
    let report = import(
        &mut session,
        ImportOptions::new(ImportBehaviorMode::BestEffort),
        &reader,
    );
    session.save().unwrap();

    assert_eq!(report.status, ImportState::Committed);
    assert_eq!(report.acl_change_sets.len(), 1);
    let acl = repo.node("/content/site").unwrap().unwrap().acl;
    assert!(acl.contains(&AclEntry::allow("alice", ["jcr:write"])));
    assert!(acl.contains(&AclEntry::deny("bob", ["jcr:read"])));
    assert!(!acl.contains(&AclEntry::allow("bob", ["jcr:read"])));
    let events = events_for(&report, "/content/site");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].phase, Phase::AccessControl);
    assert_eq!(events[0].action, Action::AclModify);
}

#[test]
fn test_access_control_entry_reports_single_event() {
    let repo = MemoryRepository::new();
    let reader = package(
        "site",
        vec![site_rule()],
        vec![PackageEntry::node("/content/site/en", NodeType::Folder)
            .with_acl(vec![AclEntry::allow("everyone", ["jcr:read"])])],
    );
    let collecting = CollectingSink::new();

    let mut session = repo.login("admin").unwrap();
    let report = Importer::new(&mut session, ImportOptions::new(ImportBehaviorMode::BestEffort))
        .with_sink(collecting.clone())
        .import(&reader)
        .unwrap();
    session.save().unwrap();

    assert_eq!(report.status, ImportState::Committed);
    let seen: Vec<(String, Phase, Action)> = collecting
        .events()
        .into_iter()
        .filter(|e| e.path == "/content/site/en")
        .map(|e| (e.path, e.phase, e.action))
        .collect();
    assert_eq!(
        seen,
        vec![(
            "/content/site/en".to_string(),
            Phase::AccessControl,
            Action::Add
        )]
    );
    assert_eq!(report.acl_change_sets.len(), 1);
    assert_eq!(
        repo.node("/content/site/en").unwrap().unwrap().acl,
        vec![AclEntry::allow("everyone", ["jcr:read"])]
    );
}

#[test]
fn test_policy_node_applies_to_parent() {
    let repo = MemoryRepository::new();
    let reader = package(
        "site",
        vec![FilterRule::new("/content/site")],
        vec![
            PackageEntry::node("/content/site/rep:policy", NodeType::AccessControlList)
                .with_acl(vec![AclEntry::allow("everyone", ["jcr:read"])]),
            PackageEntry::node("/content/site", NodeType::Folder),
        ],
    );

    let mut session = repo.login("admin").unwrap();
    let report = import(
        &mut session,
        ImportOptions::new(ImportBehaviorMode::BestEffort),
        &reader,
    );
    session.save().unwrap();

    assert_eq!(report.status, ImportState::Committed);
    assert!(repo.node("/content/site/rep:policy").unwrap().is_none());
    assert_eq!(
        repo.node("/content/site").unwrap().unwrap().acl,
        vec![AclEntry::allow("everyone", ["jcr:read"])]
    );
    assert_eq!(report.protection.applied, 1);
}

#[test]
fn test_clear_removes_existing_access_control() {
    let repo = MemoryRepository::new();
    {
        let mut session = repo.login("admin").unwrap();
        session.add_node("/content", &NodeType::Folder).unwrap();
        session.add_node("/content/site", &NodeType::Folder).unwrap();
        session
            .add_entry("/content/site", &AclEntry::allow("everyone", ["jcr:read"]))
            .unwrap();
        session.save().unwrap();
    }

    let reader = package(
        "site",
        vec![FilterRule::new("/content/site")],
        vec![PackageEntry::node("/content/site", NodeType::Folder)
            .with_property("title", "Site")
            .with_acl(vec![AclEntry::allow("anonymous", ["jcr:read"])])],
    );

    let mut session = repo.login("admin").unwrap();
    let report = import(&mut session, ImportOptions::new(ImportBehaviorMode::Clear), &reader);
    session.save().unwrap();

    assert_eq!(report.status, ImportState::Committed);
    let node = repo.node("/content/site").unwrap().unwrap();
    assert!(node.acl.is_empty());
    assert_eq!(
        node.properties.get("title"),
        Some(&PropertyValue::String("Site".to_string()))
    );
    assert_eq!(report.protection.cleared, 1);
    assert_eq!(report.protection.skipped, 1);
}

#[test]
fn test_best_effort_skips_protected_items() {
    let repo = MemoryRepository::new();
    let reader = package(
        "users",
        vec![FilterRule::new("/content/site"), FilterRule::new("/home/users")],
        vec![
            PackageEntry::node("/content/site", NodeType::Folder)
                .with_property("title", "Site")
                .with_property("jcr:uuid", "0f3e"),
            PackageEntry::node("/home/users/bob", NodeType::User),
            PackageEntry::node("/home/users/bob/profile", NodeType::Unstructured),
        ],
    );

    let mut session = repo.login("admin").unwrap();
    let report = import(
        &mut session,
        ImportOptions::new(ImportBehaviorMode::BestEffort),
        &reader,
    );
    session.save().unwrap();

    let site = repo.node("/content/site").unwrap().unwrap();
    assert!(site.properties.contains_key("title"));
    assert!(!site.properties.contains_key("jcr:uuid"));

    assert!(repo.node("/home/users/bob").unwrap().is_none());
    for skipped in ["/home/users/bob", "/home/users/bob/profile"] {
        assert_eq!(
            report.path_outcomes.get(skipped),
            Some(&Outcome::Skipped {
                reason: SkipReason::ProtectedItem
            })
        );
    }
    assert_eq!(report.protection.skipped, 2);
    assert_eq!(report.warnings.len(), 2);
}

#[test]
fn test_strict_rejects_access_control_changes() {
    let repo = MemoryRepository::new();
    let before = repo.fingerprint().unwrap();
    let reader = package(
        "site",
        vec![FilterRule::new("/content/site")],
        vec![PackageEntry::node("/content/site", NodeType::Folder)
            .with_acl(vec![AclEntry::allow("everyone", ["jcr:read"])])],
    );

    let mut session = repo.login("admin").unwrap();
    let report = import(&mut session, ImportOptions::new(ImportBehaviorMode::Strict), &reader);

    assert_eq!(report.status, ImportState::RolledBack);
    assert!(report.failures[0].error.contains("rep:policy"));
    assert_eq!(report.protection.failed, 1);
    assert!(!session.has_pending_changes());
    assert_eq!(repo.fingerprint().unwrap(), before);
}

#[test]
fn test_unknown_principal_is_isolated_under_best_effort() {
    let repo = MemoryRepository::new();
    let reader = package(
        "site",
        vec![FilterRule::new("/content/site")],
        vec![
            PackageEntry::node("/content/site", NodeType::Folder)
                .with_acl(vec![AclEntry::allow("ghost", ["jcr:read"])]),
            PackageEntry::node("/content/site/en", NodeType::Folder),
        ],
    );

    let mut session = repo.login("admin").unwrap();
    let report = import(
        &mut session,
        ImportOptions::new(ImportBehaviorMode::BestEffort),
        &reader,
    );
    session.save().unwrap();

    assert_eq!(report.status, ImportState::PartiallyFailed);
    assert!(report.failures[0].error.contains("ghost"));
    let events = events_for(&report, "/content/site");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].phase, Phase::AccessControl);
    assert!(events[0].outcome.is_error());

    let site = repo.node("/content/site").unwrap().unwrap();
    assert!(site.acl.is_empty());
    assert!(repo.node("/content/site/en").unwrap().is_some());
}

/// Session whose `add_node` fails for one path.
struct FlakySession {
    inner: MemorySession,
    broken: String,
}

impl RepositorySession for FlakySession {
    fn user(&self) -> &str {
        self.inner.user()
    }

    fn get_node(&self, path: &str) -> Result<Option<ExistingNodeState>> {
        self.inner.get_node(path)
    }

    fn add_node(&mut self, path: &str, node_type: &NodeType) -> Result<()> {
        if path == self.broken {
            return Err(Error::Repository(format!("Constraint violation at {}", path)));
        }
        self.inner.add_node(path, node_type)
    }

    fn remove_node(&mut self, path: &str) -> Result<()> {
        self.inner.remove_node(path)
    }

    fn set_property(&mut self, path: &str, name: &str, value: &PropertyValue) -> Result<()> {
        self.inner.set_property(path, name, value)
    }

    fn remove_property(&mut self, path: &str, name: &str) -> Result<()> {
        self.inner.remove_property(path, name)
    }

    fn order_children(&mut self, path: &str, order: &[String]) -> Result<()> {
        self.inner.order_children(path, order)
    }

    fn save(&mut self) -> Result<()> {
        self.inner.save()
    }

    fn discard(&mut self) -> Result<()> {
        self.inner.discard()
    }

    fn has_pending_changes(&self) -> bool {
        self.inner.has_pending_changes()
    }
}

impl AccessControlProvider for FlakySession {
    fn get_entries(&self, path: &str) -> Result<Vec<AclEntry>> {
        self.inner.get_entries(path)
    }

    fn principal_exists(&self, principal: &str) -> Result<bool> {
        self.inner.principal_exists(principal)
    }

    fn add_entry(&mut self, path: &str, entry: &AclEntry) -> Result<()> {
        self.inner.add_entry(path, entry)
    }

    fn remove_entry(&mut self, path: &str, entry: &AclEntry) -> Result<()> {
        self.inner.remove_entry(path, entry)
    }
}

fn sibling_package() -> PackageReader {
    package(
        "site",
        vec![FilterRule::new("/content/site")],
        vec![
            PackageEntry::node("/content/site", NodeType::Folder),
            PackageEntry::node("/content/site/a", NodeType::Folder),
            PackageEntry::node("/content/site/a/child", NodeType::Folder),
            PackageEntry::node("/content/site/b", NodeType::Folder),
            PackageEntry::node("/content/site/b/child", NodeType::Folder),
        ],
    )
}

#[test]
fn test_failure_does_not_block_siblings() {
    let repo = MemoryRepository::new();
    let mut session = FlakySession {
        inner: repo.login("admin").unwrap(),
        broken: "/content/site/a".to_string(),
    };

    let report = Importer::new(&mut session, ImportOptions::new(ImportBehaviorMode::BestEffort))
        .import(&sibling_package())
        .unwrap();
    session.save().unwrap();

    assert_eq!(report.status, ImportState::PartiallyFailed);
    assert_eq!(report.failed_paths(), vec!["/content/site/a"]);
    assert_eq!(
        report.path_outcomes.get("/content/site/a/child"),
        Some(&Outcome::Skipped {
            reason: SkipReason::ParentFailed
        })
    );
    assert_eq!(
        report.path_outcomes.get("/content/site/b/child"),
        Some(&Outcome::Success)
    );
    assert!(repo.node("/content/site/a").unwrap().is_none());
    assert!(repo.node("/content/site/b/child").unwrap().is_some());
}

#[test]
fn test_strict_failure_discards_earlier_changes() {
    let repo = MemoryRepository::new();
    let before = repo.fingerprint().unwrap();
    let mut session = FlakySession {
        inner: repo.login("admin").unwrap(),
        broken: "/content/site/b".to_string(),
    };

    let report = Importer::new(&mut session, ImportOptions::new(ImportBehaviorMode::Strict))
        .import(&sibling_package())
        .unwrap();

    assert_eq!(report.status, ImportState::RolledBack);
    assert!(!session.has_pending_changes());
    assert!(session.get_node("/content/site").unwrap().is_none());
    assert_eq!(repo.fingerprint().unwrap(), before);
}

#[test]
fn test_dry_run_predicts_without_writing() {
    let repo = MemoryRepository::new();
    seed(
        &repo,
        &[
            ("/content", NodeType::Folder),
            ("/content/site", NodeType::Folder),
            ("/content/site/en", NodeType::Unstructured),
            ("/content/site/en/child", NodeType::Folder),
        ],
    );
    let before = repo.fingerprint().unwrap();

    let reader = package(
        "site",
        vec![site_rule()],
        vec![
            PackageEntry::node("/content/site/en", NodeType::Folder),
            PackageEntry::node("/content/site/en/child", NodeType::Folder),
            PackageEntry::node("/content/site/fr/home", NodeType::Folder),
        ],
    );

    let mut session = repo.login("admin").unwrap();
    let report = import(
        &mut session,
        ImportOptions::new(ImportBehaviorMode::BestEffort).with_dry_run(true),
        &reader,
    );

    assert!(report.dry_run);
    assert_eq!(report.status, ImportState::Committed);
    let actions: Vec<(&str, Action)> = report
        .events
        .iter()
        .map(|e| (e.path.as_str(), e.action))
        .collect();
    assert_eq!(
        actions,
        vec![
            ("/content/site/en", Action::Replace),
            ("/content/site/en/child", Action::Add),
            ("/content/site/fr/home", Action::Add),
        ]
    );
    assert!(!session.has_pending_changes());
    assert!(session.get_node("/content/site/fr").unwrap().is_none());
    assert_eq!(repo.fingerprint().unwrap(), before);
}

/// Raises the cancellation flag once `after` events were seen.
struct CancellingSink {
    flag: Arc<AtomicBool>,
    after: usize,
    seen: usize,
}

impl ProgressSink for CancellingSink {
    fn on_event(&mut self, _event: &ProgressEvent) -> anyhow::Result<()> {
        self.seen += 1;
        if self.seen >= self.after {
            self.flag.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[test]
fn test_cancellation_before_any_save_rolls_back() {
    let repo = MemoryRepository::new();
    let before = repo.fingerprint().unwrap();
    let options = ImportOptions::new(ImportBehaviorMode::BestEffort);
    let sink = CancellingSink {
        flag: options.cancellation_flag(),
        after: 1,
        seen: 0,
    };

    let mut session = repo.login("admin").unwrap();
    let report = Importer::new(&mut session, options)
        .with_sink(sink)
        .import(&sibling_package())
        .unwrap();

    assert_eq!(report.status, ImportState::RolledBack);
    let cancelled = report
        .path_outcomes
        .values()
        .filter(|o| {
            **o == Outcome::Skipped {
                reason: SkipReason::Cancelled,
            }
        })
        .count();
    assert_eq!(cancelled, 4);
    assert!(!session.has_pending_changes());
    assert_eq!(repo.fingerprint().unwrap(), before);
}

#[test]
fn test_cancellation_after_auto_save_is_partial() {
    let repo = MemoryRepository::new();
    let options = ImportOptions::new(ImportBehaviorMode::BestEffort).with_auto_save(1);
    let sink = CancellingSink {
        flag: options.cancellation_flag(),
        after: 2,
        seen: 0,
    };

    let mut session = repo.login("admin").unwrap();
    let report = Importer::new(&mut session, options)
        .with_sink(sink)
        .import(&sibling_package())
        .unwrap();

    assert_eq!(report.status, ImportState::PartiallyFailed);
    assert!(repo.node("/content/site/a").unwrap().is_some());
    assert!(repo.node("/content/site/a/child").unwrap().is_none());
    assert_eq!(
        report.path_outcomes.get("/content/site/b"),
        Some(&Outcome::Skipped {
            reason: SkipReason::Cancelled
        })
    );
}

#[test]
fn test_auto_save_failure_is_returned() {
    let repo = MemoryRepository::new();
    repo.set_read_only(true).unwrap();

    let mut session = repo.login("admin").unwrap();
    let mut importer = Importer::new(
        &mut session,
        ImportOptions::new(ImportBehaviorMode::BestEffort).with_auto_save(1),
    );
    let err = importer.import(&sibling_package()).unwrap_err();

    assert!(matches!(err, Error::PersistenceFailure(_)));
    assert_eq!(importer.state(), ImportState::RolledBack);
}

#[test]
fn test_root_remap() {
    let repo = MemoryRepository::new();
    let options = ImportOptions::new(ImportBehaviorMode::BestEffort)
        .with_remap(RootRemap::new("/content/site", "/content/copy").unwrap());

    let mut session = repo.login("admin").unwrap();
    let report = import(&mut session, options, &site_package());
    session.save().unwrap();

    assert_eq!(report.status, ImportState::Committed);
    assert_eq!(report.events[0].path, "/content/copy/en");
    assert!(repo.node("/content/copy/en").unwrap().is_some());
    assert!(repo.node("/content/site").unwrap().is_none());
}

#[test]
fn test_tombstone_deletes_existing_node() {
    let repo = MemoryRepository::new();
    seed(
        &repo,
        &[
            ("/content", NodeType::Folder),
            ("/content/site", NodeType::Folder),
            ("/content/site/old", NodeType::Folder),
            ("/content/site/old/page", NodeType::Folder),
        ],
    );

    let reader = package(
        "site",
        vec![site_rule()],
        vec![
            PackageEntry::tombstone("/content/site/old"),
            PackageEntry::tombstone("/content/site/gone"),
        ],
    );
    let mut session = repo.login("admin").unwrap();
    let report = import(
        &mut session,
        ImportOptions::new(ImportBehaviorMode::BestEffort),
        &reader,
    );
    session.save().unwrap();

    assert_eq!(events_for(&report, "/content/site/old")[0].action, Action::Delete);
    assert_eq!(events_for(&report, "/content/site/gone")[0].action, Action::Noop);
    assert!(repo.node("/content/site/old/page").unwrap().is_none());
    assert_eq!(
        repo.node("/content/site").unwrap().unwrap().children,
        Vec::<String>::new()
    );
}

#[test]
fn test_record_installation() {
    let repo = MemoryRepository::new();
    let options = ImportOptions::new(ImportBehaviorMode::BestEffort).with_record_installation(true);

    let mut session = repo.login("admin").unwrap();
    import(&mut session, options, &site_package());
    session.save().unwrap();

    let installed = list_installed(&session).unwrap();
    assert_eq!(installed.len(), 1);
    assert_eq!(installed[0].name, "site");
    assert_eq!(installed[0].status, "committed");
}

struct FailingSink;

impl ProgressSink for FailingSink {
    fn on_event(&mut self, _event: &ProgressEvent) -> anyhow::Result<()> {
        anyhow::bail!("listener gone")
    }
}

#[test]
fn test_sink_failure_does_not_affect_run() {
    let repo = MemoryRepository::new();
    let collecting = CollectingSink::new();

    let mut session = repo.login("admin").unwrap();
    let report = Importer::new(&mut session, ImportOptions::default())
        .with_sink(FailingSink)
        .with_sink(collecting.clone())
        .import(&site_package())
        .unwrap();

    assert_eq!(report.status, ImportState::Committed);
    assert_eq!(collecting.events(), report.events);
}

#[test]
fn test_corrupt_entry_aborts_before_any_change() {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let manifest = serde_json::to_vec(&PackageManifest::new("site", "1.0").with_filter(site_rule())).unwrap();
    let resources: [(&str, &[u8]); 3] = [
        (MANIFEST_PATH, &manifest),
        ("jcr_root/content/site/a/.content.json", br#"{"primaryType": "nt:folder"}"#),
        ("jcr_root/content/site/b/.content.json", b"{ broken"),
    ];
    let mut archive = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, content) in resources {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        archive.append_data(&mut header, name, content).unwrap();
    }
    let bytes = archive.into_inner().unwrap().finish().unwrap();
    let reader = PackageReader::from_bytes(&bytes).unwrap();

    let repo = MemoryRepository::new();
    let mut session = repo.login("admin").unwrap();
    let mut importer = Importer::new(&mut session, ImportOptions::default());
    let err = importer.import(&reader).unwrap_err();

    assert!(matches!(err, Error::CorruptEntry { .. }));
    assert!(err.is_reading_time());
    assert_eq!(importer.state(), ImportState::RolledBack);
    assert!(!session.has_pending_changes());
}
