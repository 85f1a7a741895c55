//! Config schema types (database, bundle storage, plugin and migration options).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default upload limit: 10 240 KiB, matching the admin upload form.
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 10_240 * 1024;

/// Default ceiling for the uncompressed size of one archive.
pub const DEFAULT_MAX_EXTRACTED_SIZE: u64 = 100 * 1024 * 1024;

/// Name of the manifest file expected at the root of every bundle.
pub const DEFAULT_MANIFEST_FILE: &str = "module.json";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlinthConfig {
    pub database: DatabaseConfig,
    pub bundles: BundlesConfig,
    pub plugins: PluginsConfig,
    pub migrations: MigrationsConfig,
}

/// Registry database settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL. Defaults to `sqlite:<data_dir>/plinth.db?mode=rwc`.
    pub url: Option<String>,
}

/// Upload limits and filesystem locations for bundles.
///
/// Relative paths are resolved against the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundlesConfig {
    /// Largest accepted upload, in bytes.
    pub max_upload_size: u64,
    /// Largest total uncompressed size of an archive, in bytes.
    pub max_extracted_size: u64,
    /// Where materialized bundles live, one directory per module name.
    pub module_root: Option<PathBuf>,
    /// Where theme assets are published for static serving.
    pub asset_root: Option<PathBuf>,
    /// Where uploads are extracted before validation.
    pub scratch_root: Option<PathBuf>,
    pub manifest_file: String,
}

impl Default for BundlesConfig {
    fn default() -> Self {
        Self {
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            max_extracted_size: DEFAULT_MAX_EXTRACTED_SIZE,
            module_root: None,
            asset_root: None,
            scratch_root: None,
            manifest_file: DEFAULT_MANIFEST_FILE.into(),
        }
    }
}

/// Plugin-specific behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Honour `auto_activate: true` in plugin manifests right after install.
    /// Themes are always activated manually.
    pub auto_activate: bool,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            auto_activate: true,
        }
    }
}

/// External migration runner invoked when a plugin is activated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Program and arguments; `{module}` and `{path}` are substituted.
    /// Empty disables migrations.
    pub command: Vec<String>,
    /// Working directory for the command. Defaults to the data directory.
    pub working_dir: Option<PathBuf>,
}

/// Absolute locations derived from [`BundlesConfig`] and a data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub module_root: PathBuf,
    pub asset_root: PathBuf,
    pub scratch_root: PathBuf,
    /// Module host state file (module name → enabled).
    pub host_state: PathBuf,
}

impl PlinthConfig {
    /// Resolve every bundle location against `data_dir`.
    #[must_use]
    pub fn resolve_paths(&self, data_dir: &Path) -> ResolvedPaths {
        let resolve = |configured: &Option<PathBuf>, fallback: &str| match configured {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => data_dir.join(path),
            None => data_dir.join(fallback),
        };
        ResolvedPaths {
            module_root: resolve(&self.bundles.module_root, "Modules"),
            asset_root: resolve(&self.bundles.asset_root, "public/modules"),
            scratch_root: resolve(&self.bundles.scratch_root, "storage/app/modules"),
            host_state: data_dir.join("module-statuses.json"),
        }
    }

    /// The registry connection URL, defaulting to a database in `data_dir`.
    #[must_use]
    pub fn database_url(&self, data_dir: &Path) -> String {
        match &self.database.url {
            Some(url) => url.clone(),
            None => format!("sqlite:{}?mode=rwc", data_dir.join("plinth.db").display()),
        }
    }
}
