//! Import options.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;
use vaultpack_common::{path, Error, ImportBehaviorMode, Result};

/// Rewrites paths under `from` to live under `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRemap {
    pub from: String,
    pub to: String,
}

impl RootRemap {
    pub fn new(from: &str, to: &str) -> Result<Self> {
        Ok(Self {
            from: path::normalize(from)?,
            to: path::normalize(to)?,
        })
    }

    /// Remapped path, or `path` itself when it is not under `from`.
    pub fn apply(&self, p: &str) -> String {
        path::remap(p, &self.from, &self.to).unwrap_or_else(|| p.to_string())
    }
}

impl FromStr for RootRemap {
    type Err = Error;

    /// Parse `FROM=TO`.
    fn from_str(s: &str) -> Result<Self> {
        let (from, to) = s
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("Invalid remap {}: expected FROM=TO", s)))?;
        Self::new(from.trim(), to.trim())
    }
}

impl fmt::Display for RootRemap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.from, self.to)
    }
}

/// Options for one import run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImportOptions {
    pub mode: ImportBehaviorMode,
    pub root_remap: Option<RootRemap>,
    /// Compute decisions and events without writing anything.
    pub dry_run: bool,
    /// Save after every `n` applied entries (ignored under `Strict`).
    pub auto_save_threshold: Option<usize>,
    /// Record the package under `/etc/packages` after the run.
    pub record_installation: bool,
    #[serde(skip)]
    cancel: Arc<AtomicBool>,
}

impl ImportOptions {
    pub fn new(mode: ImportBehaviorMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Load options from a YAML or JSON file, chosen by extension.
    pub fn from_file(file: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(file)?;
        let options: ImportOptions = match file.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", file.display(), e)))?,
            _ => serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", file.display(), e)))?,
        };
        if let Some(remap) = &options.root_remap {
            RootRemap::new(&remap.from, &remap.to)?;
        }
        Ok(options)
    }

    pub fn with_mode(mut self, mode: ImportBehaviorMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_remap(mut self, remap: RootRemap) -> Self {
        self.root_remap = Some(remap);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_auto_save(mut self, threshold: usize) -> Self {
        self.auto_save_threshold = Some(threshold);
        self
    }

    pub fn with_record_installation(mut self, record: bool) -> Self {
        self.record_installation = record;
        self
    }

    /// Effective auto-save threshold.
    ///
    /// `Strict` runs have a single durability boundary, so the threshold is
    /// dropped with a warning.
    pub fn effective_auto_save(&self) -> Option<usize> {
        match self.auto_save_threshold {
            Some(_) if self.mode.is_strict() => {
                warn!("Auto-save is not available in strict mode; ignoring threshold");
                None
            }
            Some(0) => None,
            threshold => threshold,
        }
    }

    /// Flag shared with whoever may cancel the run.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}
