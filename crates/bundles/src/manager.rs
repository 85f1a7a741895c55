//! [`BundleManager`]: the entry point for installing and managing bundles.

use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::{debug, info, warn};

use plinth_config::{PlinthConfig, ResolvedPaths};

use crate::{
    archive::ExtractionLimits,
    error::{Error, Result},
    host::{FsModuleHost, ModuleHost, ModuleStatus},
    migration::{MigrationRunner, NoopMigrationRunner, runner_from_config},
    registry::{BundleRegistry, SqliteBundleRegistry},
    types::{BundleFilter, BundleRecord, ThemeTarget},
};

/// Filesystem locations the manager works in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleLayout {
    pub module_root: PathBuf,
    pub asset_root: PathBuf,
    pub scratch_root: PathBuf,
    pub manifest_file: String,
}

impl BundleLayout {
    /// Lay out every directory under `root` with the default names.
    #[must_use]
    pub fn under(root: &Path) -> Self {
        let paths = PlinthConfig::default().resolve_paths(root);
        Self::from_paths(&paths, plinth_config::schema::DEFAULT_MANIFEST_FILE)
    }

    #[must_use]
    pub fn from_paths(paths: &ResolvedPaths, manifest_file: &str) -> Self {
        Self {
            module_root: paths.module_root.clone(),
            asset_root: paths.asset_root.clone(),
            scratch_root: paths.scratch_root.clone(),
            manifest_file: manifest_file.to_string(),
        }
    }

    #[must_use]
    pub fn module_dir(&self, module_name: &str) -> PathBuf {
        self.module_root.join(module_name)
    }

    #[must_use]
    pub fn asset_dir(&self, module_name: &str) -> PathBuf {
        self.asset_root.join(module_name)
    }
}

/// Result of comparing the module root, the host and the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    /// Module directories with no registry record.
    pub orphan_dirs: Vec<PathBuf>,
    /// Slugs whose module directory is gone.
    pub missing_dirs: Vec<String>,
    /// Host entries with no registry record.
    pub orphan_host_modules: Vec<String>,
    /// Orphans removed by a pruning audit.
    pub pruned: Vec<PathBuf>,
}

impl AuditReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.orphan_dirs.is_empty()
            && self.missing_dirs.is_empty()
            && self.orphan_host_modules.is_empty()
    }
}

/// Installs bundles and drives their lifecycle.
///
/// Plugins and themes share one pipeline; kind-specific steps (theme
/// exclusivity and asset publication, plugin migrations) branch on the
/// record's kind. The manager is `Send + Sync` and meant to be shared
/// behind an `Arc`.
pub struct BundleManager {
    pub(crate) registry: Arc<dyn BundleRegistry>,
    pub(crate) host: Arc<dyn ModuleHost>,
    pub(crate) migrations: Arc<dyn MigrationRunner>,
    pub(crate) layout: BundleLayout,
    pub(crate) limits: ExtractionLimits,
    pub(crate) auto_activate_plugins: bool,
    reservations: Mutex<HashSet<String>>,
}

impl BundleManager {
    pub fn new(
        registry: Arc<dyn BundleRegistry>,
        host: Arc<dyn ModuleHost>,
        layout: BundleLayout,
    ) -> Self {
        Self {
            registry,
            host,
            migrations: Arc::new(NoopMigrationRunner),
            layout,
            limits: ExtractionLimits::default(),
            auto_activate_plugins: true,
            reservations: Mutex::new(HashSet::new()),
        }
    }

    /// Wire up the SQLite registry, the file-backed host and the configured
    /// migration runner. The pool must already be migrated.
    pub fn from_config(config: &PlinthConfig, data_dir: &Path, pool: sqlx::SqlitePool) -> Self {
        let paths = config.resolve_paths(data_dir);
        let host = Arc::new(FsModuleHost::new(paths.host_state.clone()));
        let layout = BundleLayout::from_paths(&paths, &config.bundles.manifest_file);
        Self::new(Arc::new(SqliteBundleRegistry::new(pool)), host, layout)
            .with_migration_runner(runner_from_config(&config.migrations, data_dir))
            .with_limits(ExtractionLimits {
                max_upload_size: config.bundles.max_upload_size,
                max_extracted_size: config.bundles.max_extracted_size,
            })
            .with_auto_activate(config.plugins.auto_activate)
    }

    #[must_use]
    pub fn with_migration_runner(mut self, runner: Arc<dyn MigrationRunner>) -> Self {
        self.migrations = runner;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: ExtractionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Whether plugins declaring `auto_activate` are activated after install.
    #[must_use]
    pub fn with_auto_activate(mut self, enabled: bool) -> Self {
        self.auto_activate_plugins = enabled;
        self
    }

    #[must_use]
    pub fn layout(&self) -> &BundleLayout {
        &self.layout
    }

    #[must_use]
    pub fn limits(&self) -> &ExtractionLimits {
        &self.limits
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// The record for `slug`, or [`Error::BundleNotFound`].
    pub async fn get(&self, slug: &str) -> Result<BundleRecord> {
        self.registry
            .find_by_slug(slug)
            .await?
            .ok_or_else(|| Error::bundle_not_found(slug))
    }

    pub async fn find(&self, slug: &str) -> Result<Option<BundleRecord>> {
        self.registry.find_by_slug(slug).await
    }

    pub async fn list(&self, filter: BundleFilter) -> Result<Vec<BundleRecord>> {
        self.registry.list(filter).await
    }

    /// The active theme for `target`, if any.
    pub async fn active_theme(&self, target: ThemeTarget) -> Result<Option<BundleRecord>> {
        Ok(self
            .registry
            .list(BundleFilter::default().target(target).active())
            .await?
            .into_iter()
            .next())
    }

    // ── Install reservations ─────────────────────────────────────────

    fn reservation_set(&self) -> MutexGuard<'_, HashSet<String>> {
        self.reservations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `slug` and `module_name` for the duration of one install.
    pub(crate) fn reserve(&self, slug: &str, module_name: &str) -> Result<Reservation<'_>> {
        let slug_key = format!("slug:{slug}");
        let module_key = format!("module:{module_name}");
        let mut set = self.reservation_set();
        if set.contains(&slug_key) {
            return Err(Error::duplicate_slug(slug));
        }
        if set.contains(&module_key) {
            return Err(Error::duplicate_module(module_name));
        }
        set.insert(slug_key.clone());
        set.insert(module_key.clone());
        Ok(Reservation {
            manager: self,
            keys: [slug_key, module_key],
        })
    }

    /// Fail if `slug` or `module_name` is already taken in persisted state.
    pub(crate) async fn check_unique(&self, slug: &str, module_name: &str) -> Result<()> {
        if self.registry.find_by_slug(slug).await?.is_some() {
            return Err(Error::duplicate_slug(slug));
        }
        if self.registry.find_by_module_name(module_name).await?.is_some()
            || self.host.exists(module_name).await?
        {
            return Err(Error::duplicate_module(module_name));
        }
        Ok(())
    }

    // ── Consistency audit ────────────────────────────────────────────

    /// Compare module directories and host entries with the registry.
    ///
    /// With `prune`, orphan directories are deleted and orphan host entries
    /// are unregistered. Records are never touched.
    pub async fn audit(&self, prune: bool) -> Result<AuditReport> {
        let records = self.registry.list(BundleFilter::default()).await?;
        let known: HashSet<&str> = records.iter().map(|r| r.module_name.as_str()).collect();
        let mut report = AuditReport::default();

        for record in &records {
            let dir = self.layout.module_dir(&record.module_name);
            if !tokio::fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
                report.missing_dirs.push(record.slug.clone());
            }
        }

        match tokio::fs::read_dir(&self.layout.module_root).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if name.starts_with('.') || !entry.file_type().await?.is_dir() {
                        continue;
                    }
                    if !known.contains(name.as_str()) {
                        report.orphan_dirs.push(entry.path());
                    }
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(e.into()),
        }
        report.orphan_dirs.sort();

        let host_modules: BTreeMap<String, ModuleStatus> = self.host.modules().await?;
        report.orphan_host_modules = host_modules
            .into_keys()
            .filter(|name| !known.contains(name.as_str()))
            .collect();

        if prune {
            for dir in &report.orphan_dirs {
                match tokio::fs::remove_dir_all(dir).await {
                    Ok(()) => report.pruned.push(dir.clone()),
                    Err(e) => warn!(path = %dir.display(), error = %e, "failed to prune orphan module"),
                }
            }
            for name in &report.orphan_host_modules {
                self.host.unregister(name).await?;
            }
            if !report.pruned.is_empty() || !report.orphan_host_modules.is_empty() {
                info!(
                    dirs = report.pruned.len(),
                    host_entries = report.orphan_host_modules.len(),
                    "pruned orphan modules"
                );
            }
        }

        debug!(
            orphan_dirs = report.orphan_dirs.len(),
            missing_dirs = report.missing_dirs.len(),
            "bundle audit complete"
        );
        Ok(report)
    }
}

/// Releases an install's slug and module-name claim when dropped.
pub(crate) struct Reservation<'a> {
    manager: &'a BundleManager,
    keys: [String; 2],
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let mut set = self.manager.reservation_set();
        for key in &self.keys {
            set.remove(key);
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;

    async fn manager(root: &Path) -> BundleManager {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::run_migrations(&pool).await.unwrap();
        BundleManager::new(
            Arc::new(SqliteBundleRegistry::new(pool)),
            Arc::new(FsModuleHost::new(root.join("module-statuses.json"))),
            BundleLayout::under(root),
        )
    }

    #[tokio::test]
    async fn reservations_block_concurrent_claims() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path()).await;

        let first = mgr.reserve("blog", "Blog").unwrap();
        assert!(matches!(
            mgr.reserve("blog", "Other"),
            Err(Error::DuplicateSlug { .. })
        ));
        assert!(matches!(
            mgr.reserve("blog-2", "Blog"),
            Err(Error::DuplicateModule { .. })
        ));

        drop(first);
        assert!(mgr.reserve("blog", "Blog").is_ok());
    }

    #[tokio::test]
    async fn host_registration_counts_as_duplicate_module() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path()).await;
        mgr.host
            .register("Blog", &tmp.path().join("Modules/Blog"))
            .await
            .unwrap();

        let err = mgr.check_unique("blog", "Blog").await.unwrap_err();
        assert!(matches!(err, Error::DuplicateModule { .. }));
        mgr.check_unique("shop", "Shop").await.unwrap();
    }

    #[tokio::test]
    async fn audit_reports_and_prunes_orphans() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path()).await;
        let orphan = mgr.layout().module_dir("Leftover");
        std::fs::create_dir_all(&orphan).unwrap();
        mgr.host.register("Ghost", &orphan).await.unwrap();

        let report = mgr.audit(false).await.unwrap();
        assert_eq!(report.orphan_dirs, vec![orphan.clone()]);
        assert_eq!(report.orphan_host_modules, vec!["Ghost".to_string()]);
        assert!(!report.is_clean());
        assert!(orphan.exists());

        let report = mgr.audit(true).await.unwrap();
        assert_eq!(report.pruned, vec![orphan.clone()]);
        assert!(!orphan.exists());
        assert!(mgr.audit(false).await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn get_unknown_slug_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager(tmp.path()).await;
        let err = mgr.get("nope").await.unwrap_err();
        assert!(matches!(err, Error::BundleNotFound { .. }));
        assert!(mgr.active_theme(ThemeTarget::Admin).await.unwrap().is_none());
    }
}
