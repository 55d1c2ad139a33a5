//! vaultpack installer - Import content packages into a repository session.
//!
//! Reads a package container, scopes its entries with the manifest filters,
//! merges them into the session and reports every touched path.

pub mod archive;
pub mod config;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod session;

#[cfg(test)]
mod scenarios;

pub use archive::{write_package, write_package_bytes, PackageReader};
pub use config::{ImportOptions, RootRemap};
pub use orchestrator::Importer;
pub use progress::{CollectingSink, JsonlSink, LogSink, MultiSink, ProgressSink};
pub use registry::{list_installed, record_installation, InstalledPackage};
pub use session::{AccessControlProvider, MemoryRepository, MemorySession, RepositorySession};

use tracing::info;
use vaultpack_common::Result;
use vaultpack_package_schema::{ImportReport, ImportState};

/// Import a package with progress rendered to the log.
///
/// On `Committed` or `PartiallyFailed` the session is saved; a rolled-back
/// run leaves it untouched.
pub fn install<S>(session: &mut S, reader: &PackageReader, options: ImportOptions) -> Result<ImportReport>
where
    S: RepositorySession + AccessControlProvider,
{
    let dry_run = options.dry_run;
    let report = Importer::new(&mut *session, options)
        .with_sink(LogSink)
        .import(reader)?;

    if !dry_run && report.status != ImportState::RolledBack {
        session.save()?;
        info!("Saved {} ({})", report.package, report.status);
    }
    Ok(report)
}
