//! Activate, deactivate and uninstall.

use std::path::Path;

use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use plinth_metrics::{bundles as bundle_metrics, counter, labels};

use crate::{
    assets,
    error::{Error, Result},
    manager::BundleManager,
    types::{BundleRecord, ThemeTarget},
};

impl BundleManager {
    /// Activate the bundle with `slug`.
    ///
    /// The module directory must exist and every direct dependency must be
    /// installed and active. Themes publish their assets before the switch and
    /// replace the active theme of their target in one transaction. Plugins
    /// run their migrations afterwards; a migration failure is logged and does
    /// not undo the activation. Activating an active bundle does nothing.
    pub async fn activate(&self, slug: &str) -> Result<BundleRecord> {
        match self.activate_bundle(slug).await {
            Ok(record) => Ok(record),
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(bundle_metrics::ACTIVATION_ERRORS_TOTAL, labels::ERROR => e.kind())
                    .increment(1);
                Err(e)
            },
        }
    }

    async fn activate_bundle(&self, slug: &str) -> Result<BundleRecord> {
        let record = self.get(slug).await?;
        if record.is_active {
            debug!(slug, "bundle already active");
            return Ok(record);
        }

        let module_dir = self.layout.module_dir(&record.module_name);
        if !tokio::fs::metadata(&module_dir)
            .await
            .is_ok_and(|m| m.is_dir())
        {
            return Err(Error::ModuleNotFound {
                module_name: record.module_name.clone(),
                path: module_dir,
            });
        }
        self.check_dependencies(&record).await?;

        match record.theme_target {
            Some(target) => self.switch_theme(&record, target, &module_dir).await?,
            None => self.enable_plugin(&record, &module_dir).await?,
        }

        #[cfg(feature = "metrics")]
        counter!(bundle_metrics::ACTIVATIONS_TOTAL, labels::KIND => record.kind.as_str())
            .increment(1);

        info!(slug, module = %record.module_name, kind = %record.kind, "activated bundle");
        self.get(slug).await
    }

    /// Every direct dependency, in declared order, must be active.
    async fn check_dependencies(&self, record: &BundleRecord) -> Result<()> {
        for dependency in &record.dependencies {
            match self.registry.find_by_slug(dependency).await? {
                Some(dep) if dep.is_active => {},
                _ => return Err(Error::missing_dependency(&record.slug, dependency)),
            }
        }
        Ok(())
    }

    async fn switch_theme(
        &self,
        record: &BundleRecord,
        target: ThemeTarget,
        module_dir: &Path,
    ) -> Result<()> {
        let module_name = &record.module_name;
        assets::publish(module_dir, &self.layout.asset_root, module_name).await?;

        if let Err(e) = self.host.enable(module_name).await {
            self.unpublish_quietly(module_name).await;
            return Err(e);
        }

        let displaced = match self.registry.activate_theme(&record.slug, target).await {
            Ok(displaced) => displaced,
            Err(e) => {
                self.disable_quietly(module_name).await;
                self.unpublish_quietly(module_name).await;
                return Err(e);
            },
        };

        for previous in displaced {
            self.disable_quietly(&previous.module_name).await;
            info!(
                slug = %previous.slug,
                replaced_by = %record.slug,
                target = %target,
                "deactivated theme"
            );
        }
        Ok(())
    }

    async fn enable_plugin(&self, record: &BundleRecord, module_dir: &Path) -> Result<()> {
        let module_name = &record.module_name;
        self.host.enable(module_name).await?;

        let flipped = match self.registry.set_active(&record.slug, true).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::bundle_not_found(&record.slug)),
            Err(e) => Err(e),
        };
        if let Err(e) = flipped {
            self.disable_quietly(module_name).await;
            return Err(e);
        }

        if let Err(e) = self.migrations.run(module_name, module_dir).await {
            #[cfg(feature = "metrics")]
            counter!(bundle_metrics::MIGRATION_FAILURES_TOTAL).increment(1);
            warn!(slug = %record.slug, error = %e, "plugin migrations failed; plugin stays active");
        }
        Ok(())
    }

    /// Deactivate the bundle with `slug`.
    ///
    /// Bundles that depend on it stay active; they are only logged. Published
    /// theme assets stay in place until uninstall. Deactivating an inactive
    /// bundle does nothing.
    pub async fn deactivate(&self, slug: &str) -> Result<BundleRecord> {
        let record = self.get(slug).await?;
        if !record.is_active {
            debug!(slug, "bundle already inactive");
            return Ok(record);
        }

        let dependents = self.registry.active_dependents(slug).await?;
        if !dependents.is_empty() {
            let names: Vec<&str> = dependents.iter().map(|d| d.slug.as_str()).collect();
            warn!(slug, dependents = ?names, "deactivating a bundle that active bundles depend on");
        }

        // Record and host must still agree if either step fails.
        self.host.disable(&record.module_name).await?;
        match self.registry.set_active(slug, false).await {
            Ok(true) => {},
            Ok(false) => {
                self.enable_quietly(&record.module_name).await;
                return Err(Error::bundle_not_found(slug));
            },
            Err(e) => {
                self.enable_quietly(&record.module_name).await;
                return Err(e);
            },
        }

        #[cfg(feature = "metrics")]
        counter!(bundle_metrics::DEACTIVATIONS_TOTAL, labels::KIND => record.kind.as_str())
            .increment(1);

        info!(slug, module = %record.module_name, "deactivated bundle");
        self.get(slug).await
    }

    /// Remove the bundle with `slug` entirely.
    ///
    /// Order: deactivate, remove published assets, remove the module
    /// directory, unregister from the host, delete the record. The record goes
    /// last so a failure part-way leaves it behind as evidence.
    pub async fn uninstall(&self, slug: &str) -> Result<()> {
        let record = self.get(slug).await?;
        if record.is_active {
            self.deactivate(slug).await?;
        }

        if record.is_theme() {
            assets::unpublish(&self.layout.asset_root, &record.module_name).await?;
        }

        let module_dir = self.layout.module_dir(&record.module_name);
        match tokio::fs::remove_dir_all(&module_dir).await {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %module_dir.display(), "module directory already gone");
            },
            Err(e) => return Err(e.into()),
        }

        self.host.unregister(&record.module_name).await?;
        self.registry.delete(slug).await?;

        #[cfg(feature = "metrics")]
        counter!(bundle_metrics::UNINSTALLS_TOTAL, labels::KIND => record.kind.as_str())
            .increment(1);

        info!(slug, module = %record.module_name, "uninstalled bundle");
        Ok(())
    }

    async fn enable_quietly(&self, module_name: &str) {
        if let Err(e) = self.host.enable(module_name).await {
            warn!(module = module_name, error = %e, "failed to re-enable module");
        }
    }

    async fn disable_quietly(&self, module_name: &str) {
        if let Err(e) = self.host.disable(module_name).await {
            warn!(module = module_name, error = %e, "failed to disable module");
        }
    }

    async fn unpublish_quietly(&self, module_name: &str) {
        if let Err(e) = assets::unpublish(&self.layout.asset_root, module_name).await {
            warn!(module = module_name, error = %e, "failed to remove published assets");
        }
    }
}
