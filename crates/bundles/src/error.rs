use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The upload was rejected before anything touched the filesystem.
    #[error("{message}")]
    Validation { message: String },

    #[error("could not extract archive: {reason}")]
    Extraction { reason: String },

    #[error("bundle manifest ({file}) not found in {}", .dir.display())]
    ManifestMissing { file: String, dir: PathBuf },

    #[error("invalid bundle manifest {}: {source}", .path.display())]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid bundle manifest: field `{field}` {reason}")]
    ManifestInvalid { field: &'static str, reason: String },

    #[error("a bundle with slug '{slug}' already exists")]
    DuplicateSlug { slug: String },

    #[error("a module named '{module_name}' already exists")]
    DuplicateModule { module_name: String },

    #[error("failed to materialize bundle at {}: {source}", .path.display())]
    Materialization {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bundle '{slug}' is not installed")]
    BundleNotFound { slug: String },

    #[error("module '{module_name}' not found at {}", .path.display())]
    ModuleNotFound { module_name: String, path: PathBuf },

    #[error("cannot activate '{slug}': required bundle '{dependency}' is not installed and active")]
    MissingDependency { slug: String, dependency: String },

    /// Reported through logs only; activation does not fail on it.
    #[error("migrations for module '{module_name}' failed: {message}")]
    Migration {
        module_name: String,
        message: String,
    },

    #[error("failed to publish assets to {}: {source}", .path.display())]
    AssetPublish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("module host: {message}")]
    Host { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn extraction(reason: impl ToString) -> Self {
        Self::Extraction {
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn manifest_invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::ManifestInvalid {
            field,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn duplicate_slug(slug: impl Into<String>) -> Self {
        Self::DuplicateSlug { slug: slug.into() }
    }

    #[must_use]
    pub fn duplicate_module(module_name: impl Into<String>) -> Self {
        Self::DuplicateModule {
            module_name: module_name.into(),
        }
    }

    #[must_use]
    pub fn materialization(path: &Path, source: std::io::Error) -> Self {
        Self::Materialization {
            path: path.to_path_buf(),
            source,
        }
    }

    #[must_use]
    pub fn bundle_not_found(slug: impl Into<String>) -> Self {
        Self::BundleNotFound { slug: slug.into() }
    }

    #[must_use]
    pub fn missing_dependency(slug: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::MissingDependency {
            slug: slug.into(),
            dependency: dependency.into(),
        }
    }

    #[must_use]
    pub fn migration(module_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Migration {
            module_name: module_name.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn asset_publish(path: &Path, source: std::io::Error) -> Self {
        Self::AssetPublish {
            path: path.to_path_buf(),
            source,
        }
    }

    #[must_use]
    pub fn host(message: impl Into<String>) -> Self {
        Self::Host {
            message: message.into(),
        }
    }

    /// Short stable label for metrics and structured logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Extraction { .. } => "extraction",
            Self::ManifestMissing { .. } => "manifest_missing",
            Self::ManifestParse { .. } => "manifest_parse",
            Self::ManifestInvalid { .. } => "manifest_invalid",
            Self::DuplicateSlug { .. } => "duplicate_slug",
            Self::DuplicateModule { .. } => "duplicate_module",
            Self::Materialization { .. } => "materialization",
            Self::BundleNotFound { .. } => "bundle_not_found",
            Self::ModuleNotFound { .. } => "module_not_found",
            Self::MissingDependency { .. } => "missing_dependency",
            Self::Migration { .. } => "migration",
            Self::AssetPublish { .. } => "asset_publish",
            Self::Host { .. } => "host",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Sqlx(_) => "database",
            Self::Migrate(_) => "schema_migration",
            Self::Join(_) => "join",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_human_readable() {
        let err = Error::missing_dependency("gallery", "media-core");
        assert_eq!(
            err.to_string(),
            "cannot activate 'gallery': required bundle 'media-core' is not installed and active"
        );

        let err = Error::manifest_invalid("slug", "is required");
        assert_eq!(
            err.to_string(),
            "invalid bundle manifest: field `slug` is required"
        );
    }

    #[test]
    fn kind_labels_are_stable() {
        assert_eq!(Error::duplicate_slug("x").kind(), "duplicate_slug");
        assert_eq!(Error::validation("x").kind(), "validation");
    }
}
