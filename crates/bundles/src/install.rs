//! The install pipeline: upload → extract → manifest → materialize → record.

use std::path::Path;

use {
    serde_json::json,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use plinth_metrics::{bundles as bundle_metrics, counter, histogram, labels};

use crate::{
    archive,
    assets::ASSET_SOURCE_DIR,
    error::{Error, Result},
    manager::BundleManager,
    manifest::{self, BundleManifest},
    materialize::materialize,
    registry::PendingBundle,
    types::{BundleKind, BundleRecord, BundleType, UploadedArchive},
};

impl BundleManager {
    /// Install an uploaded bundle archive.
    ///
    /// `expected` is the kind the caller is installing (plugin or theme
    /// upload form); a manifest declaring the other kind is rejected. On any
    /// failure no record is left behind and the scratch directory is gone.
    ///
    /// Plugins whose manifest sets `auto_activate` are activated afterwards
    /// when enabled; a failed auto-activation is logged and the install
    /// still succeeds with the bundle inactive.
    pub async fn install(
        &self,
        upload: &UploadedArchive,
        expected: Option<BundleKind>,
    ) -> Result<BundleRecord> {
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        #[cfg(feature = "metrics")]
        counter!(
            bundle_metrics::INSTALL_ATTEMPTS_TOTAL,
            labels::KIND => expected.map_or("any", BundleKind::as_str)
        )
        .increment(1);

        let record = match self.install_upload(upload, expected).await {
            Ok(record) => record,
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(bundle_metrics::INSTALL_ERRORS_TOTAL, labels::ERROR => e.kind())
                    .increment(1);
                warn!(upload = %upload.original_name, error = %e, "bundle install failed");
                return Err(e);
            },
        };

        #[cfg(feature = "metrics")]
        histogram!(bundle_metrics::INSTALL_DURATION_SECONDS).record(start.elapsed().as_secs_f64());

        info!(
            slug = %record.slug,
            module = %record.module_name,
            kind = %record.kind,
            version = %record.version,
            "installed bundle"
        );

        if record.kind == BundleKind::Plugin && record.auto_activate && self.auto_activate_plugins {
            match self.activate(&record.slug).await {
                Ok(activated) => return Ok(activated),
                Err(e) => {
                    warn!(slug = %record.slug, error = %e, "auto-activation failed, bundle left inactive");
                },
            }
        }
        Ok(record)
    }

    async fn install_upload(
        &self,
        upload: &UploadedArchive,
        expected: Option<BundleKind>,
    ) -> Result<BundleRecord> {
        let manifest_file = &self.layout.manifest_file;
        let extracted = archive::extract(
            upload,
            &self.layout.scratch_root,
            &self.limits,
            manifest_file,
        )
        .await?;

        let manifest = manifest::load_manifest(extracted.root(), manifest_file).await?;
        if let Some(kind) = expected {
            manifest.ensure_kind(kind)?;
        }

        let _reservation = self.reserve(&manifest.slug, &manifest.module_name)?;
        self.check_unique(&manifest.slug, &manifest.module_name)
            .await?;
        // Another process may be installing the same bundle into the same
        // module root; the pending insert decides who owns the path.
        let pending = self.registry.begin_create(manifest.to_new_bundle()).await?;

        let module_dir = match materialize(
            extracted.root(),
            &self.layout.module_root,
            &manifest.module_name,
        )
        .await
        {
            Ok(module_dir) => module_dir,
            Err(e) => {
                abandon(pending).await;
                return Err(e);
            },
        };
        // The scratch directory is no longer needed once the bundle moved out.
        drop(extracted);

        self.register_and_commit(pending, &manifest, &module_dir)
            .await
    }

    /// Register a materialized module with the host and commit its pending
    /// record, removing the module directory again if either step fails.
    async fn register_and_commit(
        &self,
        pending: Box<dyn PendingBundle>,
        manifest: &BundleManifest,
        module_dir: &Path,
    ) -> Result<BundleRecord> {
        if let Err(e) = self.host.register(&manifest.module_name, module_dir).await {
            self.discard_module_dir(module_dir).await;
            abandon(pending).await;
            return Err(e);
        }
        match pending.commit().await {
            Ok(record) => Ok(record),
            Err(e) => {
                if let Err(unregister) = self.host.unregister(&manifest.module_name).await {
                    warn!(module = %manifest.module_name, error = %unregister, "failed to unregister module after install error");
                }
                self.discard_module_dir(module_dir).await;
                Err(e)
            },
        }
    }

    async fn discard_module_dir(&self, module_dir: &Path) {
        match tokio::fs::remove_dir_all(module_dir).await {
            Ok(()) => debug!(path = %module_dir.display(), "removed module directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => {
                warn!(path = %module_dir.display(), error = %e, "failed to remove module directory");
            },
        }
    }

    /// Create an empty bundle from a display name, as a developer starting a
    /// new plugin or theme would.
    ///
    /// Writes a generated manifest into a fresh module directory (themes also
    /// get an empty `Resources/assets`), registers it with the host and
    /// records it, inactive.
    pub async fn scaffold(&self, name: &str, bundle_type: BundleType) -> Result<BundleRecord> {
        let kind_label = match bundle_type.kind() {
            BundleKind::Plugin => "plugin",
            BundleKind::Theme => "theme",
        };
        let value = json!({
            "name": name.trim(),
            "slug": manifest::slugify(name),
            "version": "1.0.0",
            "type": bundle_type.as_str(),
            "description": format!("A {kind_label} module for {}", name.trim()),
            "dependencies": [],
        });
        let contents = serde_json::to_string_pretty(&value)?;
        let manifest_path = Path::new(&self.layout.manifest_file);
        let manifest = manifest::parse_manifest(&contents, manifest_path)?;

        let _reservation = self.reserve(&manifest.slug, &manifest.module_name)?;
        self.check_unique(&manifest.slug, &manifest.module_name)
            .await?;
        let pending = self.registry.begin_create(manifest.to_new_bundle()).await?;

        let module_dir = self.layout.module_dir(&manifest.module_name);
        match tokio::fs::try_exists(&module_dir).await {
            Ok(false) => {},
            Ok(true) => {
                abandon(pending).await;
                return Err(Error::duplicate_module(&manifest.module_name));
            },
            Err(e) => {
                abandon(pending).await;
                return Err(e.into());
            },
        }
        let written = async {
            tokio::fs::create_dir_all(&module_dir).await?;
            tokio::fs::write(module_dir.join(&self.layout.manifest_file), &contents).await?;
            if manifest.kind() == BundleKind::Theme {
                tokio::fs::create_dir_all(module_dir.join(ASSET_SOURCE_DIR)).await?;
            }
            Ok::<(), std::io::Error>(())
        }
        .await;
        if let Err(e) = written {
            self.discard_module_dir(&module_dir).await;
            abandon(pending).await;
            return Err(Error::materialization(&module_dir, e));
        }

        let record = self
            .register_and_commit(pending, &manifest, &module_dir)
            .await?;
        info!(slug = %record.slug, module = %record.module_name, "scaffolded bundle");
        Ok(record)
    }
}

/// Roll back a pending record after a failed install step.
async fn abandon(pending: Box<dyn PendingBundle>) {
    let slug = pending.record().slug.clone();
    if let Err(e) = pending.rollback().await {
        warn!(%slug, error = %e, "failed to roll back pending bundle record");
    }
}
