//! Activation, deactivation and uninstall across plugins and themes.
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::{
    collections::BTreeMap,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    async_trait::async_trait,
    plinth_bundles::{
        BundleFilter, BundleKind, BundleRecord, Error, FsModuleHost, ModuleHost, ModuleStatus,
        ThemeTarget,
    },
};

use common::{
    Harness, RecordingMigrations, bundle_zip, harness, harness_with, harness_with_host,
    plugin_manifest, theme_manifest,
};

async fn install_plugin(h: &Harness, name: &str, slug: &str, deps: &[&str]) -> BundleRecord {
    let upload = bundle_zip(
        &h.uploads(),
        &format!("{slug}.zip"),
        &plugin_manifest(name, slug, deps),
        &[],
    );
    h.manager.install(&upload, Some(BundleKind::Plugin)).await.unwrap()
}

async fn install_theme(h: &Harness, name: &str, slug: &str, target: &str, css: &str) -> BundleRecord {
    let upload = bundle_zip(
        &h.uploads(),
        &format!("{slug}.zip"),
        &theme_manifest(name, slug, target),
        &[("Resources/assets/css/theme.css", css)],
    );
    h.manager.install(&upload, Some(BundleKind::Theme)).await.unwrap()
}

async fn is_active(h: &Harness, slug: &str) -> bool {
    h.manager.get(slug).await.unwrap().is_active
}

#[tokio::test]
async fn gallery_requires_active_media_core() {
    let h = harness().await;
    install_plugin(&h, "Gallery", "gallery", &["media-core"]).await;

    let err = h.manager.activate("gallery").await.unwrap_err();
    match err {
        Error::MissingDependency { slug, dependency } => {
            assert_eq!(slug, "gallery");
            assert_eq!(dependency, "media-core");
        },
        other => panic!("unexpected error: {other}"),
    }
    assert!(!is_active(&h, "gallery").await);

    // installed but inactive is still unmet
    install_plugin(&h, "media core", "media-core", &[]).await;
    let err = h.manager.activate("gallery").await.unwrap_err();
    assert!(matches!(err, Error::MissingDependency { .. }));

    h.manager.activate("media-core").await.unwrap();
    let gallery = h.manager.activate("gallery").await.unwrap();
    assert!(gallery.is_active);
    assert!(h.host.modules().await.unwrap()["Gallery"].enabled);
}

#[tokio::test]
async fn first_unmet_dependency_is_named() {
    let h = harness().await;
    install_plugin(&h, "Alpha", "alpha", &[]).await;
    install_plugin(&h, "Report", "report", &["alpha", "beta", "gamma"]).await;
    h.manager.activate("alpha").await.unwrap();

    let err = h.manager.activate("report").await.unwrap_err();
    assert!(matches!(err, Error::MissingDependency { ref dependency, .. } if dependency == "beta"));
}

#[tokio::test]
async fn light_and_dark_are_never_both_active() {
    let h = harness().await;
    install_theme(&h, "Light", "light", "frontend", "body{background:#fff}").await;
    install_theme(&h, "Dark", "dark", "frontend", "body{background:#000}").await;

    h.manager.activate("light").await.unwrap();
    assert!(is_active(&h, "light").await);
    assert!(h.asset_dir("Light").join("css/theme.css").is_file());

    let dark = h.manager.activate("dark").await.unwrap();
    assert!(dark.is_active);
    assert!(!is_active(&h, "light").await);

    let modules = h.host.modules().await.unwrap();
    assert!(modules["Dark"].enabled);
    assert!(!modules["Light"].enabled);

    let active = h
        .manager
        .active_theme(ThemeTarget::Frontend)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.slug, "dark");
    assert_eq!(
        std::fs::read_to_string(h.asset_dir("Dark").join("css/theme.css")).unwrap(),
        "body{background:#000}"
    );
}

#[tokio::test]
async fn theme_targets_are_independent() {
    let h = harness().await;
    install_theme(&h, "Light", "light", "frontend", "a{}").await;
    install_theme(&h, "Console", "console", "admin", "b{}").await;

    h.manager.activate("light").await.unwrap();
    h.manager.activate("console").await.unwrap();
    assert!(is_active(&h, "light").await);
    assert!(is_active(&h, "console").await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_theme_switches_keep_one_active() {
    let h = harness().await;
    for name in ["One", "Two", "Three", "Four"] {
        install_theme(&h, name, &name.to_lowercase(), "frontend", "x{}").await;
    }

    let tasks: Vec<_> = ["one", "two", "three", "four"]
        .into_iter()
        .map(|slug| {
            let manager = Arc::clone(&h.manager);
            tokio::spawn(async move { manager.activate(slug).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let active = h
        .manager
        .list(BundleFilter::default().target(ThemeTarget::Frontend).active())
        .await
        .unwrap();
    assert_eq!(active.len(), 1, "{active:?}");
}

#[tokio::test]
async fn missing_module_directory_blocks_activation() {
    let h = harness().await;
    install_plugin(&h, "Blog", "blog", &[]).await;
    std::fs::remove_dir_all(h.module_dir("Blog")).unwrap();

    let err = h.manager.activate("blog").await.unwrap_err();
    assert!(matches!(err, Error::ModuleNotFound { ref module_name, .. } if module_name == "Blog"));
    assert!(!is_active(&h, "blog").await);
}

#[tokio::test]
async fn unknown_slug_is_not_found() {
    let h = harness().await;
    for result in [
        h.manager.activate("ghost").await.map(|_| ()),
        h.manager.deactivate("ghost").await.map(|_| ()),
        h.manager.uninstall("ghost").await,
    ] {
        assert!(matches!(result, Err(Error::BundleNotFound { .. })));
    }
}

#[tokio::test]
async fn migration_failure_does_not_block_activation() {
    let migrations = Arc::new(RecordingMigrations::failing());
    let runner = Arc::clone(&migrations);
    let h = harness_with(move |m| m.with_migration_runner(runner)).await;
    install_plugin(&h, "Forum", "forum", &[]).await;

    let record = h.manager.activate("forum").await.unwrap();
    assert!(record.is_active);
    assert_eq!(migrations.calls(), vec!["Forum".to_string()]);
}

#[tokio::test]
async fn migrations_run_for_plugins_only() {
    let migrations = Arc::new(RecordingMigrations::default());
    let runner = Arc::clone(&migrations);
    let h = harness_with(move |m| m.with_migration_runner(runner)).await;
    install_plugin(&h, "Forum", "forum", &[]).await;
    install_theme(&h, "Light", "light", "frontend", "a{}").await;

    h.manager.activate("forum").await.unwrap();
    h.manager.activate("light").await.unwrap();
    // re-activating an active bundle is a no-op
    h.manager.activate("forum").await.unwrap();
    assert_eq!(migrations.calls(), vec!["Forum".to_string()]);
}

#[tokio::test]
async fn deactivation_does_not_cascade() {
    let h = harness().await;
    install_plugin(&h, "media core", "media-core", &[]).await;
    install_plugin(&h, "Gallery", "gallery", &["media-core"]).await;
    h.manager.activate("media-core").await.unwrap();
    h.manager.activate("gallery").await.unwrap();

    let media = h.manager.deactivate("media-core").await.unwrap();
    assert!(!media.is_active);
    assert!(is_active(&h, "gallery").await);
    assert!(!h.host.modules().await.unwrap()["MediaCore"].enabled);

    // deactivating again is a no-op
    assert!(!h.manager.deactivate("media-core").await.unwrap().is_active);
}

/// Host whose `disable` fails while `fail_disable` is set.
struct FlakyHost {
    inner: Arc<FsModuleHost>,
    fail_disable: Arc<AtomicBool>,
}

#[async_trait]
impl ModuleHost for FlakyHost {
    async fn register(&self, module_name: &str, path: &Path) -> plinth_bundles::Result<()> {
        self.inner.register(module_name, path).await
    }

    async fn enable(&self, module_name: &str) -> plinth_bundles::Result<()> {
        self.inner.enable(module_name).await
    }

    async fn disable(&self, module_name: &str) -> plinth_bundles::Result<()> {
        if self.fail_disable.load(Ordering::SeqCst) {
            return Err(Error::host(format!("cannot disable {module_name}")));
        }
        self.inner.disable(module_name).await
    }

    async fn exists(&self, module_name: &str) -> plinth_bundles::Result<bool> {
        self.inner.exists(module_name).await
    }

    async fn unregister(&self, module_name: &str) -> plinth_bundles::Result<()> {
        self.inner.unregister(module_name).await
    }

    async fn modules(&self) -> plinth_bundles::Result<BTreeMap<String, ModuleStatus>> {
        self.inner.modules().await
    }
}

#[tokio::test]
async fn failed_host_disable_keeps_bundle_active() {
    let fail_disable = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fail_disable);
    let h = harness_with_host(move |inner| {
        Arc::new(FlakyHost {
            inner,
            fail_disable: flag,
        })
    })
    .await;
    install_plugin(&h, "Blog", "blog", &[]).await;
    h.manager.activate("blog").await.unwrap();

    fail_disable.store(true, Ordering::SeqCst);
    let err = h.manager.deactivate("blog").await.unwrap_err();
    assert!(matches!(err, Error::Host { .. }));
    assert!(is_active(&h, "blog").await);
    assert!(h.host.modules().await.unwrap()["Blog"].enabled);

    // uninstall stops at the same step and leaves everything in place
    assert!(h.manager.uninstall("blog").await.is_err());
    assert!(is_active(&h, "blog").await);
    assert!(h.module_dir("Blog").is_dir());
    assert!(h.host.modules().await.unwrap()["Blog"].enabled);

    fail_disable.store(false, Ordering::SeqCst);
    assert!(!h.manager.deactivate("blog").await.unwrap().is_active);
    assert!(!h.host.modules().await.unwrap()["Blog"].enabled);
}

#[tokio::test]
async fn round_trip_leaves_nothing_behind() {
    let h = harness().await;
    install_plugin(&h, "Bystander", "bystander", &[]).await;
    h.manager.activate("bystander").await.unwrap();
    install_theme(&h, "Admin Blue", "admin-blue", "admin", "c{}").await;
    h.manager.activate("admin-blue").await.unwrap();

    install_theme(&h, "Light", "light", "frontend", "a{}").await;
    h.manager.activate("light").await.unwrap();
    assert!(h.asset_dir("Light").is_dir());

    h.manager.uninstall("light").await.unwrap();
    assert!(h.manager.find("light").await.unwrap().is_none());
    assert!(!h.module_dir("Light").exists());
    assert!(!h.asset_dir("Light").exists());
    assert!(!h.host.exists("Light").await.unwrap());

    // other bundles keep their state
    assert!(is_active(&h, "bystander").await);
    assert!(is_active(&h, "admin-blue").await);
    assert!(h.asset_dir("AdminBlue").is_dir());
    assert!(h.manager.audit(false).await.unwrap().is_clean());
}

#[tokio::test]
async fn uninstall_inactive_plugin() {
    let h = harness().await;
    install_plugin(&h, "Blog", "blog", &[]).await;

    h.manager.uninstall("blog").await.unwrap();
    assert!(h.manager.find("blog").await.unwrap().is_none());
    assert!(!h.module_dir("Blog").exists());

    // the slug can be reused afterwards
    install_plugin(&h, "Blog", "blog", &[]).await;
}

#[tokio::test]
async fn list_filters_by_kind_and_state() {
    let h = harness().await;
    install_plugin(&h, "One", "one", &[]).await;
    install_plugin(&h, "Two", "two", &[]).await;
    install_theme(&h, "Light", "light", "frontend", "a{}").await;
    h.manager.activate("two").await.unwrap();

    assert_eq!(h.manager.list(BundleFilter::default()).await.unwrap().len(), 3);
    assert_eq!(h.manager.list(BundleFilter::plugins()).await.unwrap().len(), 2);
    let active: Vec<String> = h
        .manager
        .list(BundleFilter::plugins().active())
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.slug)
        .collect();
    assert_eq!(active, vec!["two".to_string()]);
    assert_eq!(h.manager.list(BundleFilter::themes()).await.unwrap().len(), 1);
}
