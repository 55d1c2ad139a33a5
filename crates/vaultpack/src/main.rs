//! vaultpack - Build, inspect and install content packages.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vaultpack_common::path;
use vaultpack_installer::{
    list_installed, write_package, ImportOptions, Importer, JsonlSink, LogSink, MemoryRepository,
    PackageReader, RepositorySession,
};
use vaultpack_merge::{resequence, FilterEngine};
use vaultpack_package_schema::{validate_package, ImportState, PackageEntry, PackageSource};

#[derive(Parser)]
#[command(name = "vaultpack")]
#[command(
    author,
    version,
    about = "Build content packages and install them into a repository"
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty file-backed repository
    Init {
        /// Repository file path
        #[arg(long)]
        repo: PathBuf,

        /// Grant everyone read access at the root
        #[arg(long)]
        default_acl: bool,
    },

    /// Write a package from a JSON package source
    Build {
        /// Package source (manifest plus entries) as JSON
        #[arg(long)]
        source: PathBuf,

        /// Output package file path
        #[arg(long, short)]
        out: PathBuf,
    },

    /// Print the manifest and the resequenced entry list
    Inspect {
        /// Package file path
        #[arg(long)]
        package: PathBuf,
    },

    /// Validate the manifest, the filters and every entry
    Validate {
        /// Package file path
        #[arg(long)]
        package: PathBuf,
    },

    /// Install a package into a repository
    Install {
        /// Package file path
        #[arg(long)]
        package: PathBuf,

        /// Repository file path
        #[arg(long)]
        repo: PathBuf,

        /// Import mode (strict, best-effort, clear)
        #[arg(long)]
        mode: Option<String>,

        /// Remap paths, FROM=TO
        #[arg(long)]
        remap: Option<String>,

        /// Compute decisions without writing
        #[arg(long)]
        dry_run: bool,

        /// Import options file (YAML or JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Save after every N applied entries
        #[arg(long)]
        auto_save: Option<usize>,

        /// Record the package under /etc/packages
        #[arg(long)]
        record: bool,

        /// Write progress events as JSONL
        #[arg(long)]
        progress_log: Option<PathBuf>,
    },

    /// List installed packages
    List {
        /// Repository file path
        #[arg(long)]
        repo: PathBuf,
    },

    /// Print a repository subtree
    Tree {
        /// Repository file path
        #[arg(long)]
        repo: PathBuf,

        /// Subtree root
        #[arg(long, default_value = "/")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let json = cli.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with((!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr)))
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with(filter)
        .init();

    match cli.command {
        Commands::Init { repo, default_acl } => {
            if repo.exists() {
                anyhow::bail!("Repository {} already exists", repo.display());
            }
            let mut repository = MemoryRepository::open(&repo)?;
            if default_acl {
                repository = repository.with_default_acl();
            }
            repository.flush()?;
            info!("Repository created at {:?}", repo);
        }

        Commands::Build { source, out } => {
            let content = std::fs::read_to_string(&source)
                .with_context(|| format!("Failed to read {}", source.display()))?;
            let package: PackageSource = serde_json::from_str(&content)
                .with_context(|| format!("Invalid package source {}", source.display()))?;
            write_package(&package, &out)?;
        }

        Commands::Inspect { package } => {
            let reader = read_package(package).await?;
            println!("{}", serde_json::to_string_pretty(reader.manifest())?);

            let entries = reader.entries().collect::<Result<Vec<PackageEntry>, _>>()?;
            for entry in resequence(entries) {
                if entry.is_tombstone() {
                    println!("D {}", entry.path);
                } else {
                    println!("  {} [{}]", entry.path, entry.node_type);
                }
            }
        }

        Commands::Validate { package } => {
            let reader = read_package(package).await?;
            let manifest = reader.manifest();

            let result = validate_package(manifest, reader.entry_paths());
            for warning in &result.warnings {
                warn!("{}", warning);
            }
            if !result.valid {
                anyhow::bail!("Invalid package: {}", result.error_summary());
            }

            FilterEngine::new(&manifest.filters)?;
            let mut count = 0;
            for entry in reader.entries() {
                entry?;
                count += 1;
            }
            info!("Package {} is valid ({} entries)", manifest.package.id(), count);
        }

        Commands::Install {
            package,
            repo,
            mode,
            remap,
            dry_run,
            config,
            auto_save,
            record,
            progress_log,
        } => {
            let mut options = match config {
                Some(file) => ImportOptions::from_file(&file)?,
                None => ImportOptions::default(),
            };
            if let Some(mode) = mode {
                options = options.with_mode(mode.parse()?);
            }
            if let Some(remap) = remap {
                options = options.with_remap(remap.parse()?);
            }
            if let Some(threshold) = auto_save {
                options = options.with_auto_save(threshold);
            }
            let dry_run = options.dry_run || dry_run;
            let record = options.record_installation || record;
            options = options
                .with_dry_run(dry_run)
                .with_record_installation(record);

            let reader = read_package(package).await?;
            let repository = MemoryRepository::open(&repo)?;
            let mut session = repository.login("admin")?;

            let mut importer = Importer::new(&mut session, options).with_sink(LogSink);
            if let Some(file) = progress_log {
                let sink = JsonlSink::new(
                    File::create(&file)
                        .with_context(|| format!("Failed to create {}", file.display()))?,
                );
                importer = importer.with_sink(sink);
            }
            let report = importer.import(&reader)?;

            if !report.dry_run && report.status != ImportState::RolledBack {
                session.save()?;
                info!("Saved changes to {:?}", repo);
            }
            repository.logout(session);

            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.status != ImportState::Committed {
                anyhow::bail!("Import of {} ended {}", report.package, report.status);
            }
        }

        Commands::List { repo } => {
            let repository = MemoryRepository::open(&repo)?;
            let session = repository.login("admin")?;
            for package in list_installed(&session)? {
                println!(
                    "{}{} {} [{}]",
                    package
                        .group
                        .as_deref()
                        .map(|g| format!("{}:", g))
                        .unwrap_or_default(),
                    package.name,
                    package.version,
                    package.status
                );
            }
            repository.logout(session);
        }

        Commands::Tree { repo, path: root } => {
            let repository = MemoryRepository::open(&repo)?;
            let root = path::normalize(&root)?;
            let nodes = repository.snapshot()?;
            if !nodes.contains_key(&root) {
                anyhow::bail!("No node at {}", root);
            }
            print_tree(&nodes, &root, 0);
        }
    }

    Ok(())
}

/// Read a package off the async runtime.
async fn read_package(file: PathBuf) -> anyhow::Result<PackageReader> {
    let reader = tokio::task::spawn_blocking(move || PackageReader::open(&file)).await??;
    Ok(reader)
}

fn print_tree(
    nodes: &std::collections::BTreeMap<String, vaultpack_installer::session::StoredNode>,
    p: &str,
    depth: usize,
) {
    let Some(node) = nodes.get(p) else {
        return;
    };
    let name = if p == path::ROOT { p } else { path::name(p) };
    let acl = if node.acl.is_empty() {
        String::new()
    } else {
        format!(" ({} acl)", node.acl.len())
    };
    println!("{}{} [{}]{}", "  ".repeat(depth), name, node.node_type, acl);
    for child in &node.children {
        print_tree(nodes, &path::join(p, child), depth + 1);
    }
}
