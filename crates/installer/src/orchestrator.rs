//! Import orchestrator.
//!
//! Drives one import run: reads and resequences the package, scopes entries
//! by filter, applies structural decisions parent-first, reconciles access
//! control, and rolls every path up into the run report.

use crate::archive::PackageReader;
use crate::config::ImportOptions;
use crate::progress::{ProgressReporter, ProgressSink};
use crate::registry;
use crate::session::{AccessControlProvider, RepositorySession};
use chrono::Utc;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use vaultpack_common::{path, Error, ImportBehaviorMode, Result};
use vaultpack_merge::{reconcile, remap_rules, resequence, ConflictResolver, FilterEngine};
use vaultpack_package_schema::{
    AclChangeSet, AclEntry, AclOp, Action, ExistingNodeState, ImportReport, ImportState,
    MergeDecision, NodeType, Outcome, PackageEntry, Phase, ProgressEvent, PropertyValue,
    RunFailure, SkipReason,
};
use vaultpack_protection::patterns::is_protected_property;
use vaultpack_protection::{acl_target, ProtectedItemPolicy};

/// Whether the run goes on after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Abort,
}

/// State of one run.
struct Run {
    engine: FilterEngine,
    report: ImportReport,
    /// Dry run: predicted state of touched paths; `None` means removed.
    overlay: BTreeMap<String, Option<ExistingNodeState>>,
    /// Dry run: subtrees removed by the run.
    cleared: Vec<String>,
    /// Subtrees given up on, with the reason their descendants report.
    abandoned: Vec<(String, SkipReason)>,
    /// Incoming access control per target path.
    pending_acl: BTreeMap<String, Vec<AclEntry>>,
    /// Structural events waiting on the access control of their target.
    held: BTreeMap<String, ProgressEvent>,
    pending_order: Vec<(String, Vec<String>)>,
    unsaved: usize,
    saved: bool,
    degraded: bool,
}

impl Run {
    fn new(engine: FilterEngine, report: ImportReport) -> Self {
        Self {
            engine,
            report,
            overlay: BTreeMap::new(),
            cleared: Vec::new(),
            abandoned: Vec::new(),
            pending_acl: BTreeMap::new(),
            held: BTreeMap::new(),
            pending_order: Vec::new(),
            unsaved: 0,
            saved: false,
            degraded: false,
        }
    }

    fn abandoned_reason(&self, p: &str) -> Option<SkipReason> {
        self.abandoned
            .iter()
            .find(|(root, _)| path::is_same_or_descendant(root, p))
            .map(|(_, reason)| *reason)
    }

    fn abandon(&mut self, p: &str, reason: SkipReason) {
        self.abandoned.push((p.to_string(), reason));
    }

    fn queue_acl(&mut self, target: &str, acl: Vec<AclEntry>) {
        let queued = self.pending_acl.entry(target.to_string()).or_default();
        for entry in acl {
            if !queued.contains(&entry) {
                queued.push(entry);
            }
        }
    }

    fn clear_subtree(&mut self, p: &str) {
        self.overlay.retain(|k, _| !path::is_descendant(p, k));
        self.cleared.push(p.to_string());
    }
}

/// Imports packages into one repository session.
///
/// The session is borrowed for the importer's lifetime; the importer never
/// saves it at the end of a run, only at auto-save boundaries.
pub struct Importer<'a, S> {
    session: &'a mut S,
    options: ImportOptions,
    policy: ProtectedItemPolicy,
    reporter: ProgressReporter,
    state: ImportState,
}

impl<'a, S> Importer<'a, S>
where
    S: RepositorySession + AccessControlProvider,
{
    pub fn new(session: &'a mut S, options: ImportOptions) -> Self {
        let policy = ProtectedItemPolicy::new(options.mode);
        Self {
            session,
            options,
            policy,
            reporter: ProgressReporter::new(),
            state: ImportState::Idle,
        }
    }

    /// Add a progress sink.
    pub fn with_sink(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.reporter.add_sink(Box::new(sink));
        self
    }

    /// Current state of the run.
    pub fn state(&self) -> ImportState {
        self.state
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    fn transition(&mut self, next: ImportState) {
        debug!("Import state {} -> {}", self.state, next);
        self.state = next;
    }

    /// Import a package.
    ///
    /// Reading-time errors and persistence failures are returned as `Err`;
    /// apply-time failures end up in the report. Pending changes are left on
    /// the session for the caller to save.
    pub fn import(&mut self, reader: &PackageReader) -> Result<ImportReport> {
        self.reporter.reset();
        let manifest = reader.manifest();
        let package = manifest.package.id();
        let mode = self.options.mode;
        let dry_run = self.options.dry_run;

        info!(
            "Importing {} ({} mode{})",
            package,
            mode,
            if dry_run { ", dry run" } else { "" }
        );
        let report = ImportReport::new(package.clone(), reader.digest(), mode, dry_run);

        self.transition(ImportState::Reading);
        let (engine, entries) = match self.read(reader) {
            Ok(read) => read,
            Err(e) => {
                warn!("Cannot read package {}: {}", package, e);
                self.transition(ImportState::RolledBack);
                return Err(e);
            }
        };
        let mut run = Run::new(engine, report);

        self.transition(ImportState::Resolving);
        let in_scope = self.scope(&run, entries);
        info!("{} entries in scope", in_scope.len());

        self.transition(ImportState::Applying);
        let auto_save = if dry_run {
            None
        } else {
            self.options.effective_auto_save()
        };

        for (i, entry) in in_scope.iter().enumerate() {
            if self.options.is_cancelled() {
                return Ok(self.cancel(run, &in_scope[i..]));
            }
            if self.apply_entry(&mut run, entry) == Flow::Abort {
                return Ok(self.finish(run, ImportState::RolledBack));
            }
            if let Some(threshold) = auto_save {
                if run.unsaved >= threshold {
                    self.auto_save(&mut run)?;
                }
            }
        }
        self.apply_child_order(&mut run);

        self.transition(ImportState::Reconciling);
        if self.reconcile_acls(&mut run) == Flow::Abort {
            return Ok(self.finish(run, ImportState::RolledBack));
        }

        let status = if run.degraded {
            ImportState::PartiallyFailed
        } else {
            ImportState::Committed
        };

        if self.options.record_installation && !dry_run {
            if let Err(e) = registry::record_installation(&mut *self.session, manifest, status) {
                warn!("Cannot record installation of {}: {}", package, e);
                run.report
                    .warnings
                    .push(format!("Installation not recorded: {}", e));
            }
        }

        Ok(self.finish(run, status))
    }

    /// Compile filters, decode entries, remap and resequence them.
    fn read(&self, reader: &PackageReader) -> Result<(FilterEngine, Vec<PackageEntry>)> {
        let manifest = reader.manifest();
        let rules = match &self.options.root_remap {
            Some(remap) => remap_rules(&manifest.filters, &remap.from, &remap.to),
            None => manifest.filters.clone(),
        };
        let engine = FilterEngine::new(&rules)?;

        let mut entries = Vec::with_capacity(reader.len());
        for entry in reader.entries() {
            let mut entry = entry?;
            if let Some(remap) = &self.options.root_remap {
                entry.path = remap.apply(&entry.path);
            }
            entries.push(entry);
        }

        Ok((engine, resequence(entries)))
    }

    /// Drop out-of-scope entries, reporting each.
    fn scope(&mut self, run: &Run, entries: Vec<PackageEntry>) -> Vec<PackageEntry> {
        let mut in_scope = Vec::with_capacity(entries.len());
        for entry in entries {
            if run.engine.is_in_scope(&entry.path) {
                in_scope.push(entry);
            } else {
                debug!("Out of scope: {}", entry.path);
                self.reporter.emit(ProgressEvent::skipped(
                    Phase::Filter,
                    entry.path,
                    SkipReason::Filtered,
                ));
            }
        }
        in_scope
    }

    /// Current state of `p`, seen through the dry-run overlay.
    fn existing(&self, run: &Run, p: &str) -> Result<Option<ExistingNodeState>> {
        if self.options.dry_run {
            if let Some(predicted) = run.overlay.get(p) {
                return Ok(predicted.clone());
            }
            if run.cleared.iter().any(|c| path::is_same_or_descendant(c, p)) {
                return Ok(None);
            }
        }
        Ok(self.session.get_node(p)?.filter(|state| state.exists))
    }

    fn existing_acl(&self, run: &Run, p: &str) -> Result<Vec<AclEntry>> {
        match self.existing(run, p)? {
            None => Ok(Vec::new()),
            Some(state) if self.options.dry_run && run.overlay.contains_key(p) => {
                Ok(state.protected_acl_entries)
            }
            Some(_) => self.session.get_entries(p),
        }
    }

    fn apply_entry(&mut self, run: &mut Run, entry: &PackageEntry) -> Flow {
        let p = entry.path.as_str();
        if let Some(reason) = run.abandoned_reason(p) {
            debug!("Skipping {} ({})", p, reason);
            self.reporter
                .emit(ProgressEvent::skipped(Phase::Structure, p, reason));
            return Flow::Continue;
        }

        let existing = match self.existing(run, p) {
            Ok(existing) => existing,
            Err(e) => return self.fail(run, p, Phase::Structure, Action::Skip, e),
        };
        let target = acl_target(entry);
        let existing_acl = match self.existing_acl(run, target) {
            Ok(acl) => acl,
            Err(e) => return self.fail(run, p, Phase::Structure, Action::Skip, e),
        };

        let plan = self.policy.plan(entry, existing.as_ref(), &existing_acl);
        plan.record(&mut run.report.protection, p);
        if self.options.mode == ImportBehaviorMode::BestEffort {
            for item in &plan.skipped {
                run.report
                    .warnings
                    .push(format!("Skipped protected item {} at {}", item, p));
            }
        }
        if let Some(reason) = plan.failure.clone() {
            return self.fail(run, p, Phase::Structure, Action::Skip, reason.into_error(p));
        }

        if plan.skip_node {
            if target != p {
                // policy node: its list belongs to the parent
                let event = ProgressEvent::success(Phase::Structure, Action::Noop, p);
                self.conclude(run, &plan.acl_target, plan.acl, event);
            } else {
                let event = ProgressEvent::skipped(Phase::Structure, p, SkipReason::ProtectedItem);
                if existing.is_none() {
                    run.abandon(p, SkipReason::ProtectedItem);
                    self.reporter.emit(event);
                } else {
                    self.conclude(run, &plan.acl_target, plan.acl, event);
                }
            }
            return Flow::Continue;
        }

        let structural = PackageEntry {
            properties: plan.normal_properties.clone(),
            ..entry.clone()
        };
        let decision = ConflictResolver::for_rule(run.engine.covering_rule(p)).decide(
            existing.as_ref(),
            &structural,
            self.options.mode,
        );
        if let MergeDecision::Fail { reason } = &decision {
            let error = reason.clone().into_error(p);
            return self.fail(run, p, Phase::Structure, decision.action(), error);
        }
        if matches!(
            decision,
            MergeDecision::Delete | MergeDecision::DeleteAndRecreate
        ) {
            let error = match self.excluded_descendant(run, p) {
                Ok(None) => None,
                Ok(Some(descendant)) => Some(Error::ExcludedDescendant {
                    path: p.to_string(),
                    descendant,
                }),
                Err(e) => Some(e),
            };
            if let Some(error) = error {
                return self.fail(run, p, Phase::Structure, decision.action(), error);
            }
        }

        if let Err(e) = self.write(run, &structural, existing.as_ref(), &decision) {
            return self.fail(run, p, Phase::Structure, decision.action(), e);
        }

        let removed = decision == MergeDecision::Delete;
        if decision.changes_structure() {
            if !removed
                && structural.node_type.allows_child_ordering()
                && !structural.child_order.is_empty()
            {
                run.pending_order
                    .push((p.to_string(), structural.child_order.clone()));
            }
            run.unsaved += 1;
        }

        let event = ProgressEvent::success(Phase::Structure, decision.action(), p);
        let acl = if removed { None } else { plan.acl };
        self.conclude(run, &plan.acl_target, acl, event);
        Flow::Continue
    }

    /// Report the structural outcome of a path. When the entry carries
    /// access control, the event is held until its target is reconciled so
    /// the path still gets a single terminal event.
    fn conclude(
        &mut self,
        run: &mut Run,
        target: &str,
        acl: Option<Vec<AclEntry>>,
        event: ProgressEvent,
    ) {
        if let Some(acl) = acl {
            run.queue_acl(target, acl);
            if let Entry::Vacant(slot) = run.held.entry(target.to_string()) {
                slot.insert(event);
                return;
            }
        }
        self.reporter.emit(event);
    }

    /// First existing descendant of `p` the filters leave out.
    fn excluded_descendant(&self, run: &Run, p: &str) -> Result<Option<String>> {
        let mut pending = vec![p.to_string()];
        while let Some(current) = pending.pop() {
            let Some(state) = self.existing(run, &current)? else {
                continue;
            };
            for name in &state.child_names {
                let child = path::join(&current, name);
                if !run.engine.is_in_scope(&child) {
                    return Ok(Some(child));
                }
                pending.push(child);
            }
        }
        Ok(None)
    }

    /// Create missing ancestors of `p` as folders.
    fn ensure_ancestors(&mut self, run: &mut Run, p: &str) -> Result<()> {
        for ancestor in path::ancestors(p).into_iter().skip(1) {
            if self.existing(run, ancestor)?.is_some() {
                continue;
            }
            debug!("Creating intermediate folder {}", ancestor);
            if self.options.dry_run {
                run.overlay.insert(
                    ancestor.to_string(),
                    Some(ExistingNodeState::present(NodeType::Folder)),
                );
            } else {
                self.session.add_node(ancestor, &NodeType::Folder)?;
            }
        }
        Ok(())
    }

    fn write(
        &mut self,
        run: &mut Run,
        entry: &PackageEntry,
        existing: Option<&ExistingNodeState>,
        decision: &MergeDecision,
    ) -> Result<()> {
        let p = entry.path.as_str();
        if *decision == MergeDecision::Create {
            self.ensure_ancestors(run, p)?;
        }
        if self.options.dry_run {
            predict(run, entry, existing, decision);
            return Ok(());
        }

        match decision {
            MergeDecision::Create => {
                self.session.add_node(p, &entry.node_type)?;
                self.write_properties(p, &entry.properties, None)
            }
            MergeDecision::MergeProperties => {
                self.write_properties(p, &entry.properties, existing)
            }
            MergeDecision::ReplaceProperties => {
                if let Some(current) = existing {
                    for name in current.properties.keys() {
                        if !is_protected_property(name) && !entry.properties.contains_key(name) {
                            self.session.remove_property(p, name)?;
                        }
                    }
                }
                self.write_properties(p, &entry.properties, existing)
            }
            MergeDecision::Delete => self.session.remove_node(p),
            MergeDecision::DeleteAndRecreate => {
                self.session.remove_node(p)?;
                self.session.add_node(p, &entry.node_type)?;
                self.write_properties(p, &entry.properties, None)
            }
            MergeDecision::SkipExisting | MergeDecision::Fail { .. } => Ok(()),
        }
    }

    /// Set the properties that differ from `current`.
    fn write_properties(
        &mut self,
        p: &str,
        properties: &BTreeMap<String, PropertyValue>,
        current: Option<&ExistingNodeState>,
    ) -> Result<()> {
        for (name, value) in properties {
            if current.and_then(|c| c.properties.get(name)) != Some(value) {
                self.session.set_property(p, name, value)?;
            }
        }
        Ok(())
    }

    fn apply_child_order(&mut self, run: &mut Run) {
        let pending = std::mem::take(&mut run.pending_order);
        if self.options.dry_run {
            return;
        }
        for (p, hint) in pending {
            if run.abandoned_reason(&p).is_some() {
                continue;
            }
            if let Err(e) = self.session.order_children(&p, &hint) {
                warn!("Cannot order children of {}: {}", p, e);
                run.report
                    .warnings
                    .push(format!("Child order not applied at {}: {}", p, e));
            }
        }
    }

    /// Reconcile queued access control, parent paths first.
    fn reconcile_acls(&mut self, run: &mut Run) -> Flow {
        let pending = std::mem::take(&mut run.pending_acl);
        for (target, incoming) in pending {
            let held = run.held.remove(&target);
            let reported = held
                .as_ref()
                .map_or_else(|| target.clone(), |event| event.path.clone());

            if let Some(reason) = run.abandoned_reason(&target) {
                self.reporter
                    .emit(ProgressEvent::skipped(Phase::AccessControl, &reported, reason));
                continue;
            }
            match self.reconcile_path(run, &target, &incoming) {
                Ok(Some(set)) => {
                    let action = match &held {
                        Some(event) if changed_structure(event) => event.action,
                        _ => Action::AclModify,
                    };
                    self.reporter
                        .emit(ProgressEvent::success(Phase::AccessControl, action, &reported));
                    run.report.acl_change_sets.push(set);
                }
                Ok(None) => {
                    if let Some(event) = held {
                        self.reporter.emit(event);
                    }
                }
                Err(e) => {
                    let flow = self.fail_at(
                        run,
                        &reported,
                        &target,
                        Phase::AccessControl,
                        Action::AclModify,
                        e,
                    );
                    if flow == Flow::Abort {
                        return Flow::Abort;
                    }
                }
            }
        }
        Flow::Continue
    }

    /// Apply one change set. An unknown principal fails the whole set before
    /// anything is written.
    fn reconcile_path(
        &mut self,
        run: &mut Run,
        target: &str,
        incoming: &[AclEntry],
    ) -> Result<Option<AclChangeSet>> {
        if self.existing(run, target)?.is_none() {
            return Err(Error::Repository(format!(
                "No node at {} to hold access control",
                target
            )));
        }
        let existing = self.existing_acl(run, target)?;
        let set = reconcile(target, incoming, &existing, self.options.mode);
        if set.is_empty() {
            return Ok(None);
        }

        for entry in set.additions() {
            if !self.session.principal_exists(&entry.principal)? {
                return Err(Error::PrincipalResolutionFailure {
                    path: target.to_string(),
                    principal: entry.principal.clone(),
                });
            }
        }

        if !self.options.dry_run {
            for change in &set.changes {
                match change.op {
                    AclOp::Remove => self.session.remove_entry(target, &change.entry)?,
                    AclOp::Add => self.session.add_entry(target, &change.entry)?,
                }
            }
            run.unsaved += 1;
        }
        Ok(Some(set))
    }

    /// Report a failure at `p`. Strict runs roll back; others give up the
    /// subtree and carry on.
    fn fail(&mut self, run: &mut Run, p: &str, phase: Phase, action: Action, error: Error) -> Flow {
        self.fail_at(run, p, p, phase, action, error)
    }

    /// Report a failure at `reported` and give up the subtree at `p`.
    fn fail_at(
        &mut self,
        run: &mut Run,
        reported: &str,
        p: &str,
        phase: Phase,
        action: Action,
        error: Error,
    ) -> Flow {
        warn!("Failed to import {}: {}", reported, error);
        self.reporter
            .emit(ProgressEvent::error(phase, action, reported, error.to_string()));
        run.report.failures.push(RunFailure {
            path: reported.to_string(),
            error: error.to_string(),
        });

        if self.options.mode.is_strict() {
            self.rollback(run);
            return Flow::Abort;
        }
        run.degraded = true;
        run.abandon(p, SkipReason::ParentFailed);
        Flow::Continue
    }

    fn rollback(&mut self, run: &mut Run) {
        if !self.options.dry_run {
            if let Err(e) = self.session.discard() {
                warn!("Cannot discard pending changes: {}", e);
                run.report
                    .warnings
                    .push(format!("Discard failed: {}", e));
            }
        }
        info!("Rolled back {}", run.report.package);
        self.reporter.emit(ProgressEvent::success(
            Phase::Rollback,
            Action::Rollback,
            path::ROOT,
        ));
    }

    fn auto_save(&mut self, run: &mut Run) -> Result<()> {
        debug!("Auto-saving after {} changes", run.unsaved);
        if let Err(e) = self.session.save() {
            let error = if matches!(e, Error::PersistenceFailure(_)) {
                e
            } else {
                Error::PersistenceFailure(e.to_string())
            };
            warn!("Auto-save failed for {}: {}", run.report.package, error);
            if let Err(e) = self.session.discard() {
                warn!("Cannot discard pending changes: {}", e);
            }
            self.transition(if run.saved {
                ImportState::PartiallyFailed
            } else {
                ImportState::RolledBack
            });
            return Err(error);
        }
        run.saved = true;
        run.unsaved = 0;
        Ok(())
    }

    /// Stop between entries. Changes since the last save are discarded.
    fn cancel(&mut self, mut run: Run, remaining: &[PackageEntry]) -> ImportReport {
        info!(
            "Import of {} cancelled with {} entries left",
            run.report.package,
            remaining.len()
        );
        for entry in remaining {
            self.reporter.emit(ProgressEvent::skipped(
                Phase::Structure,
                entry.path.as_str(),
                SkipReason::Cancelled,
            ));
        }
        // queued access control is never reconciled
        for (_, event) in std::mem::take(&mut run.held) {
            self.reporter.emit(ProgressEvent::skipped(
                Phase::AccessControl,
                event.path,
                SkipReason::Cancelled,
            ));
        }

        if run.saved {
            if let Err(e) = self.session.discard() {
                warn!("Cannot discard pending changes: {}", e);
            }
            run.report
                .warnings
                .push("Cancelled after changes were saved".to_string());
            self.finish(run, ImportState::PartiallyFailed)
        } else {
            self.rollback(&mut run);
            self.finish(run, ImportState::RolledBack)
        }
    }

    fn finish(&mut self, mut run: Run, status: ImportState) -> ImportReport {
        for (_, event) in std::mem::take(&mut run.held) {
            self.reporter.emit(ProgressEvent::skipped(
                event.phase,
                event.path,
                SkipReason::RolledBack,
            ));
        }

        let mut report = run.report;
        report.status = status;
        report.completed_at = Some(Utc::now());
        report.events = self.reporter.log().events().to_vec();
        report.path_outcomes = self.reporter.log().rollup();
        if status == ImportState::RolledBack {
            // nothing the run applied survives
            for outcome in report.path_outcomes.values_mut() {
                if *outcome == Outcome::Success {
                    *outcome = Outcome::Skipped {
                        reason: SkipReason::RolledBack,
                    };
                }
            }
        }
        self.transition(status);

        info!(
            "Import of {} {}: {} paths, {} failures",
            report.package,
            status,
            report.path_outcomes.len(),
            report.failures.len()
        );
        report
    }
}

/// Whether a held structural event changed the tree.
fn changed_structure(event: &ProgressEvent) -> bool {
    event.outcome == Outcome::Success
        && matches!(
            event.action,
            Action::Add | Action::Update | Action::Replace | Action::Delete
        )
}

/// Record the effect of `decision` in the dry-run overlay.
fn predict(
    run: &mut Run,
    entry: &PackageEntry,
    existing: Option<&ExistingNodeState>,
    decision: &MergeDecision,
) {
    let p = entry.path.as_str();
    let created = || {
        let mut state = ExistingNodeState::present(entry.node_type.clone());
        state.properties = entry.properties.clone();
        state
    };

    match decision {
        MergeDecision::Create => {
            run.overlay.insert(p.to_string(), Some(created()));
        }
        MergeDecision::MergeProperties | MergeDecision::ReplaceProperties => {
            let mut state = existing
                .cloned()
                .unwrap_or_else(|| ExistingNodeState::present(entry.node_type.clone()));
            if *decision == MergeDecision::ReplaceProperties {
                state
                    .properties
                    .retain(|name, _| is_protected_property(name) || entry.properties.contains_key(name));
            }
            state.properties.extend(entry.properties.clone());
            run.overlay.insert(p.to_string(), Some(state));
        }
        MergeDecision::Delete => {
            run.clear_subtree(p);
            run.overlay.insert(p.to_string(), None);
        }
        MergeDecision::DeleteAndRecreate => {
            run.clear_subtree(p);
            run.overlay.insert(p.to_string(), Some(created()));
        }
        MergeDecision::SkipExisting | MergeDecision::Fail { .. } => {}
    }
}
