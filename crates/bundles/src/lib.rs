//! Plugin and theme bundle installer.
//!
//! Uploaded zip archives are extracted into a scratch directory, validated
//! against their `module.json` manifest, moved into the module root and
//! recorded in the SQLite registry. [`BundleManager`] then drives the
//! install → activate → deactivate → uninstall lifecycle, keeping the
//! module directories, published theme assets, the module host and the
//! registry consistent with each other.

pub mod archive;
pub mod assets;
pub mod error;
pub mod host;
mod install;
mod lifecycle;
pub mod manager;
pub mod manifest;
pub mod materialize;
pub mod migration;
pub mod registry;
pub mod types;

pub use {
    archive::{ExtractedBundle, ExtractionLimits},
    error::{Error, Result},
    host::{FsModuleHost, ModuleHost, ModuleStatus},
    manager::{AuditReport, BundleLayout, BundleManager},
    manifest::{BundleManifest, studly_case},
    migration::{CommandMigrationRunner, MigrationRunner, NoopMigrationRunner},
    registry::{BundleRegistry, PendingBundle, SqliteBundleRegistry},
    types::{
        BundleFilter, BundleKind, BundleRecord, BundleType, NewBundle, ThemeTarget, UploadedArchive,
    },
};

/// Run database migrations for the bundles crate.
///
/// Creates the `bundles` table and its indexes. Call at startup before using
/// [`SqliteBundleRegistry`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
