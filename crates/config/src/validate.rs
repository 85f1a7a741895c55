//! Semantic checks on a loaded configuration.
//!
//! Parsing already rejects malformed files; this pass reports settings that
//! parse but would make the installer misbehave.

use std::{fmt, path::Path};

use crate::schema::PlinthConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "bundles.max_upload_size"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.to_string(),
            message: message.into(),
        });
    }
}

/// Validate `config` as it would be resolved against `data_dir`.
#[must_use]
pub fn validate(config: &PlinthConfig, data_dir: &Path) -> ValidationResult {
    let mut result = ValidationResult::default();
    let bundles = &config.bundles;

    if bundles.max_upload_size == 0 {
        result.push(
            Severity::Error,
            "bundles.max_upload_size",
            "must be greater than zero; every upload would be rejected",
        );
    }
    if bundles.max_extracted_size < bundles.max_upload_size {
        result.push(
            Severity::Warning,
            "bundles.max_extracted_size",
            "is smaller than max_upload_size; compressed archives near the upload limit will fail to extract",
        );
    }

    let manifest = bundles.manifest_file.trim();
    if manifest.is_empty() || manifest.contains('/') || manifest.contains('\\') {
        result.push(
            Severity::Error,
            "bundles.manifest_file",
            "must be a bare file name",
        );
    }

    let paths = config.resolve_paths(data_dir);
    let roots = [
        ("bundles.module_root", &paths.module_root),
        ("bundles.asset_root", &paths.asset_root),
        ("bundles.scratch_root", &paths.scratch_root),
    ];
    for (i, (name, root)) in roots.iter().enumerate() {
        for (other_name, other) in roots.iter().skip(i + 1) {
            if root.starts_with(other) || other.starts_with(root) {
                result.push(
                    Severity::Error,
                    name,
                    format!(
                        "{} overlaps {other_name} ({}); bundle directories would collide",
                        root.display(),
                        other.display()
                    ),
                );
            }
        }
    }

    if let Some(program) = config.migrations.command.first() {
        if program.trim().is_empty() {
            result.push(
                Severity::Error,
                "migrations.command",
                "first element must name a program",
            );
        }
    } else {
        result.push(
            Severity::Info,
            "migrations.command",
            "not set; plugin activation will not run migrations",
        );
    }

    result
}
