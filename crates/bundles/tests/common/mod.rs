//! Shared fixtures: a manager rooted in a temp dir and zip bundle builders.
#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use {
    async_trait::async_trait,
    plinth_bundles::{
        BundleLayout, BundleManager, FsModuleHost, MigrationRunner, ModuleHost,
        SqliteBundleRegistry, UploadedArchive,
    },
    serde_json::{Value, json},
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    },
    tempfile::TempDir,
    zip::{ZipWriter, write::SimpleFileOptions},
};

pub struct Harness {
    pub tmp: TempDir,
    pub manager: Arc<BundleManager>,
    pub host: Arc<FsModuleHost>,
}

impl Harness {
    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    /// Directory uploads are written to before installing.
    pub fn uploads(&self) -> PathBuf {
        let dir = self.tmp.path().join("uploads");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn module_dir(&self, module_name: &str) -> PathBuf {
        self.manager.layout().module_dir(module_name)
    }

    pub fn asset_dir(&self, module_name: &str) -> PathBuf {
        self.manager.layout().asset_dir(module_name)
    }

    /// Number of scratch directories still on disk.
    pub fn scratch_dirs(&self) -> usize {
        match std::fs::read_dir(&self.manager.layout().scratch_root) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

pub async fn harness() -> Harness {
    harness_with(|manager| manager).await
}

/// Build a harness backed by an on-disk SQLite database, so concurrent
/// requests use separate connections.
pub async fn harness_with(configure: impl FnOnce(BundleManager) -> BundleManager) -> Harness {
    build(|host| host as Arc<dyn ModuleHost>, configure).await
}

/// Build a harness whose manager talks to the file-backed host through
/// `wrap`. [`Harness::host`] stays the unwrapped host.
pub async fn harness_with_host(
    wrap: impl FnOnce(Arc<FsModuleHost>) -> Arc<dyn ModuleHost>,
) -> Harness {
    build(wrap, |manager| manager).await
}

async fn build(
    wrap: impl FnOnce(Arc<FsModuleHost>) -> Arc<dyn ModuleHost>,
    configure: impl FnOnce(BundleManager) -> BundleManager,
) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let pool = file_pool(tmp.path()).await;
    let host = Arc::new(FsModuleHost::new(tmp.path().join("module-statuses.json")));
    let manager = BundleManager::new(
        Arc::new(SqliteBundleRegistry::new(pool)),
        wrap(host.clone()),
        BundleLayout::under(tmp.path()),
    );
    Harness {
        manager: Arc::new(configure(manager)),
        host,
        tmp,
    }
}

/// Open and migrate `plinth.db` under `dir`.
pub async fn file_pool(dir: &Path) -> SqlitePool {
    let options = SqliteConnectOptions::new()
        .filename(dir.join("plinth.db"))
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .unwrap();
    plinth_bundles::run_migrations(&pool).await.unwrap();
    pool
}

pub fn plugin_manifest(name: &str, slug: &str, dependencies: &[&str]) -> Value {
    json!({
        "name": name,
        "slug": slug,
        "version": "1.0.0",
        "type": "plugin",
        "description": format!("{name} plugin"),
        "author": "Plinth Team",
        "dependencies": dependencies,
    })
}

pub fn theme_manifest(name: &str, slug: &str, target: &str) -> Value {
    json!({
        "name": name,
        "slug": slug,
        "version": "1.0.0",
        "type": target,
        "screenshot": "screenshot.png",
        "customization_options": { "accent": "#336699" },
    })
}

/// Write a zip holding `module.json` plus `files` and describe it as an upload.
pub fn bundle_zip(dir: &Path, file_name: &str, manifest: &Value, files: &[(&str, &str)]) -> UploadedArchive {
    let mut entries = vec![("module.json".to_string(), manifest.to_string())];
    entries.extend(files.iter().map(|(name, body)| (name.to_string(), body.to_string())));
    raw_zip(dir, file_name, &entries)
}

/// Write a zip with exactly `entries`.
pub fn raw_zip(dir: &Path, file_name: &str, entries: &[(String, String)]) -> UploadedArchive {
    let path = dir.join(file_name);
    let mut zip = ZipWriter::new(File::create(&path).unwrap());
    for (name, body) in entries {
        zip.start_file(name.as_str(), SimpleFileOptions::default())
            .unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
    UploadedArchive::from_path(&path).unwrap()
}

/// Migration runner that records calls and optionally fails.
#[derive(Default)]
pub struct RecordingMigrations {
    pub fail: bool,
    pub calls: Mutex<Vec<String>>,
}

impl RecordingMigrations {
    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl MigrationRunner for RecordingMigrations {
    async fn run(&self, module_name: &str, _module_path: &Path) -> plinth_bundles::Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(module_name.to_string());
        if self.fail {
            return Err(plinth_bundles::Error::migration(module_name, "table already exists"));
        }
        Ok(())
    }
}
