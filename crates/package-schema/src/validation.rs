//! Package validation utilities.

use crate::schema;
use crate::PackageManifest;
use jsonschema::JSONSchema;
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use vaultpack_common::path;

/// Validation error type.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Schema validation failed: {0}")]
    SchemaError(String),

    #[error("Invalid filter root: {0}")]
    InvalidRoot(String),

    #[error("Duplicate filter root: {0}")]
    DuplicateRoot(String),

    #[error("Invalid entry path: {0}")]
    InvalidEntryPath(String),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result of package validation.
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    /// Fold another result into this one.
    pub fn absorb(&mut self, other: ValidationResult) {
        for error in other.errors {
            self.add_error(error);
        }
        self.warnings.extend(other.warnings);
    }

    /// Error messages joined with `; `.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_against(schema_value: &Value, instance: &Value) -> Result<ValidationResult, ValidationError> {
    let mut result = ValidationResult::new();

    let compiled = JSONSchema::compile(schema_value)
        .map_err(|e| ValidationError::SchemaError(e.to_string()))?;

    let validation = compiled.validate(instance);
    if let Err(errors) = validation {
        for error in errors {
            result.add_error(ValidationError::SchemaError(format!(
                "{} at {}",
                error, error.instance_path
            )));
        }
    }

    Ok(result)
}

/// Validate a manifest against the JSON schema.
pub fn validate_manifest(manifest: &Value) -> Result<ValidationResult, ValidationError> {
    validate_against(&schema::manifest_schema(), manifest)
}

/// Validate a node descriptor against the JSON schema.
pub fn validate_descriptor(descriptor: &Value) -> Result<ValidationResult, ValidationError> {
    validate_against(&schema::descriptor_schema(), descriptor)
}

/// Semantic checks the schema cannot express: normalized roots, unique
/// roots, entries outside every filter.
pub fn validate_package<'a, I>(manifest: &PackageManifest, entry_paths: I) -> ValidationResult
where
    I: IntoIterator<Item = &'a str>,
{
    let mut result = ValidationResult::new();

    if manifest.filters.is_empty() {
        result.add_warning("Package declares no filter rules; nothing will be imported".to_string());
    }

    let mut roots = HashSet::new();
    for filter in &manifest.filters {
        match path::normalize(&filter.root) {
            Ok(normalized) if normalized == filter.root => {}
            _ => result.add_error(ValidationError::InvalidRoot(filter.root.clone())),
        }
        if !roots.insert(filter.root.as_str()) {
            result.add_error(ValidationError::DuplicateRoot(filter.root.clone()));
        }
    }

    for entry_path in entry_paths {
        if path::normalize(entry_path).is_err() {
            result.add_error(ValidationError::InvalidEntryPath(entry_path.to_string()));
            continue;
        }
        let covered = manifest
            .filters
            .iter()
            .any(|f| path::is_same_or_descendant(&f.root, entry_path));
        if !covered {
            result.add_warning(format!(
                "Entry {} is outside every filter root and will be skipped",
                entry_path
            ));
        }
    }

    result
}
