//! Package container reading and writing.
//!
//! A package is a gzip-compressed tar archive holding
//! `META-INF/vault/manifest.json` plus one resource per repository path under
//! `jcr_root/`: `.content.json` for content, `.deleted` for tombstones.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use tar::{Archive, Builder};
use tracing::{debug, info};
use vaultpack_common::{hash, path, Error, Result};
use vaultpack_package_schema::{
    validate_descriptor, validate_manifest, EntryKind, NodeDescriptor, PackageEntry, PackageManifest, PackageSource,
};

/// Archive name of the manifest resource.
pub const MANIFEST_PATH: &str = "META-INF/vault/manifest.json";
/// Archive directory holding entry resources.
pub const CONTENT_ROOT: &str = "jcr_root";
const DESCRIPTOR_FILE: &str = ".content.json";
const TOMBSTONE_FILE: &str = ".deleted";

/// An entry resource as stored in the container, not yet decoded.
#[derive(Debug, Clone)]
struct RawEntry {
    path: String,
    kind: EntryKind,
    payload: Vec<u8>,
}

impl RawEntry {
    fn decode(&self) -> Result<PackageEntry> {
        match self.kind {
            EntryKind::Tombstone => Ok(PackageEntry::tombstone(self.path.clone())),
            EntryKind::Content => {
                let corrupt = |reason: String| Error::CorruptEntry {
                    path: self.path.clone(),
                    reason,
                };
                let text = std::str::from_utf8(&self.payload).map_err(|e| corrupt(e.to_string()))?;
                let value: serde_json::Value =
                    serde_json::from_str(text).map_err(|e| corrupt(e.to_string()))?;

                let result = validate_descriptor(&value).map_err(|e| corrupt(e.to_string()))?;
                if !result.valid {
                    return Err(corrupt(result.error_summary()));
                }

                let descriptor: NodeDescriptor =
                    serde_json::from_value(value).map_err(|e| corrupt(e.to_string()))?;
                Ok(PackageEntry::from_descriptor(self.path.clone(), descriptor))
            }
        }
    }
}

/// Map an archive resource name to `(repository path, kind)`.
///
/// Returns `Ok(None)` for resources that are not entries.
fn classify_resource(name: &str) -> Result<Option<(String, EntryKind)>> {
    let Some(rest) = name
        .strip_prefix(CONTENT_ROOT)
        .and_then(|r| r.strip_prefix('/'))
    else {
        return Ok(None);
    };
    let (dir, file) = match rest.rsplit_once('/') {
        Some((dir, file)) => (dir, file),
        None => ("", rest),
    };

    let kind = match file {
        DESCRIPTOR_FILE => EntryKind::Content,
        TOMBSTONE_FILE => EntryKind::Tombstone,
        _ => return Ok(None),
    };

    let repo_path = path::normalize(&format!("/{}", dir)).map_err(|e| Error::CorruptEntry {
        path: name.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Some((repo_path, kind)))
}

/// Archive resource name for an entry.
fn resource_name(entry: &PackageEntry) -> String {
    let file = if entry.is_tombstone() {
        TOMBSTONE_FILE
    } else {
        DESCRIPTOR_FILE
    };
    if entry.path == path::ROOT {
        format!("{}/{}", CONTENT_ROOT, file)
    } else {
        format!("{}{}/{}", CONTENT_ROOT, entry.path, file)
    }
}

fn parse_manifest(bytes: &[u8]) -> Result<PackageManifest> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| Error::MalformedPackage(format!("Unparsable manifest: {}", e)))?;

    let result =
        validate_manifest(&value).map_err(|e| Error::MalformedPackage(e.to_string()))?;
    if !result.valid {
        return Err(Error::MalformedPackage(format!(
            "Invalid manifest: {}",
            result.error_summary()
        )));
    }

    serde_json::from_value(value)
        .map_err(|e| Error::MalformedPackage(format!("Unparsable manifest: {}", e)))
}

/// An opened package.
///
/// Entry payloads are held as raw bytes and decoded on demand, so a corrupt
/// entry surfaces when it is read, not when the package is opened.
#[derive(Debug)]
pub struct PackageReader {
    manifest: PackageManifest,
    raw: Vec<RawEntry>,
    index: HashMap<String, usize>,
    digest: String,
    closed: bool,
}

impl PackageReader {
    /// Open a package file.
    pub fn open(file: &Path) -> Result<Self> {
        let bytes = fs::read(file)?;
        let reader = Self::from_bytes(&bytes)?;
        info!(
            "Opened package {} ({} entries)",
            reader.manifest.package.id(),
            reader.raw.len()
        );
        Ok(reader)
    }

    /// Open a package held in memory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let malformed = |e: std::io::Error| Error::MalformedPackage(e.to_string());

        let mut archive = Archive::new(GzDecoder::new(bytes));
        let mut manifest_bytes: Option<Vec<u8>> = None;
        let mut raw = Vec::new();
        let mut index = HashMap::new();

        for resource in archive.entries().map_err(malformed)? {
            let mut resource = resource.map_err(malformed)?;
            let name = resource
                .path()
                .map_err(malformed)?
                .to_string_lossy()
                .trim_start_matches("./")
                .to_string();

            let mut payload = Vec::new();
            resource.read_to_end(&mut payload).map_err(malformed)?;

            if name == MANIFEST_PATH {
                manifest_bytes = Some(payload);
                continue;
            }

            match classify_resource(&name)? {
                Some((repo_path, kind)) => {
                    if index.contains_key(&repo_path) {
                        return Err(Error::MalformedPackage(format!(
                            "Duplicate entry for {}",
                            repo_path
                        )));
                    }
                    index.insert(repo_path.clone(), raw.len());
                    raw.push(RawEntry {
                        path: repo_path,
                        kind,
                        payload,
                    });
                }
                None => debug!("Ignoring resource {}", name),
            }
        }

        let manifest_bytes = manifest_bytes
            .ok_or_else(|| Error::MalformedPackage(format!("Missing {}", MANIFEST_PATH)))?;
        let manifest = parse_manifest(&manifest_bytes)?;

        Ok(Self {
            manifest,
            raw,
            index,
            digest: hash::sha256_bytes(bytes),
            closed: false,
        })
    }

    /// The package manifest.
    pub fn manifest(&self) -> &PackageManifest {
        &self.manifest
    }

    /// Entries in archive order, decoded lazily.
    ///
    /// Each call starts over from the first entry.
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            raw: &self.raw,
            next: 0,
        }
    }

    /// Decode the entry stored for `path`.
    pub fn entry(&self, path: &str) -> Option<Result<PackageEntry>> {
        self.index.get(path).map(|&i| self.raw[i].decode())
    }

    /// Entry paths in archive order.
    pub fn entry_paths(&self) -> Vec<&str> {
        self.raw.iter().map(|r| r.path.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// SHA-256 of the container bytes.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Release buffered payloads. The manifest stays readable.
    pub fn close(&mut self) {
        self.raw.clear();
        self.raw.shrink_to_fit();
        self.index.clear();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Lazy entry iterator returned by [`PackageReader::entries`].
pub struct Entries<'a> {
    raw: &'a [RawEntry],
    next: usize,
}

impl Iterator for Entries<'_> {
    type Item = Result<PackageEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.raw.get(self.next)?;
        self.next += 1;
        Some(raw.decode())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.raw.len() - self.next;
        (remaining, Some(remaining))
    }
}

fn append_resource<W: Write>(archive: &mut Builder<W>, name: &str, content: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    archive.append_data(&mut header, name, content)?;
    Ok(())
}

/// Write a package container into memory.
pub fn write_package_bytes(source: &PackageSource) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut archive = Builder::new(encoder);

    let manifest_json = serde_json::to_vec_pretty(&source.manifest)?;
    append_resource(&mut archive, MANIFEST_PATH, &manifest_json)?;

    for entry in &source.entries {
        let payload = if entry.is_tombstone() {
            Vec::new()
        } else {
            serde_json::to_vec_pretty(&entry.to_descriptor())?
        };
        append_resource(&mut archive, &resource_name(entry), &payload)?;
    }

    let encoder = archive.into_inner()?;
    Ok(encoder.finish()?)
}

/// Write a package container to a file.
pub fn write_package(source: &PackageSource, file: &Path) -> Result<()> {
    let bytes = write_package_bytes(source)?;
    fs::write(file, bytes)?;
    info!(
        "Package {} written to {}",
        source.manifest.package.id(),
        file.display()
    );
    Ok(())
}
