//! The module host: the runtime side that loads materialized modules.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::sync::Mutex,
    tracing::debug,
};

use crate::error::{Error, Result};

/// Host-side state of one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStatus {
    pub path: PathBuf,
    pub enabled: bool,
}

/// Registers modules with the runtime and toggles whether they load.
#[async_trait]
pub trait ModuleHost: Send + Sync {
    /// Make a materialized module known to the host, disabled.
    async fn register(&self, module_name: &str, path: &Path) -> Result<()>;
    async fn enable(&self, module_name: &str) -> Result<()>;
    /// Disabling an unknown module is a no-op.
    async fn disable(&self, module_name: &str) -> Result<()>;
    async fn exists(&self, module_name: &str) -> Result<bool>;
    /// Forgetting an unknown module is a no-op.
    async fn unregister(&self, module_name: &str) -> Result<()>;
    async fn modules(&self) -> Result<BTreeMap<String, ModuleStatus>>;
}

// ── JSON status file ─────────────────────────────────────────────────

/// Module host backed by a `module-statuses.json` file.
pub struct FsModuleHost {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FsModuleHost {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, ModuleStatus>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Save atomically via temp file + rename.
    fn save(&self, modules: &BTreeMap<String, ModuleStatus>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(modules)?;
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    async fn update<F>(&self, module_name: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, ModuleStatus>) -> Result<bool> + Send,
    {
        let _guard = self.lock.lock().await;
        let mut modules = self.load()?;
        if f(&mut modules)? {
            self.save(&modules)?;
            debug!(module = module_name, path = %self.path.display(), "updated module statuses");
        }
        Ok(())
    }
}

#[async_trait]
impl ModuleHost for FsModuleHost {
    async fn register(&self, module_name: &str, path: &Path) -> Result<()> {
        let status = ModuleStatus {
            path: path.to_path_buf(),
            enabled: false,
        };
        self.update(module_name, |modules| {
            modules.insert(module_name.to_string(), status);
            Ok(true)
        })
        .await
    }

    async fn enable(&self, module_name: &str) -> Result<()> {
        self.update(module_name, |modules| match modules.get_mut(module_name) {
            Some(status) if status.enabled => Ok(false),
            Some(status) => {
                status.enabled = true;
                Ok(true)
            },
            None => Err(Error::host(format!(
                "module '{module_name}' is not registered"
            ))),
        })
        .await
    }

    async fn disable(&self, module_name: &str) -> Result<()> {
        self.update(module_name, |modules| match modules.get_mut(module_name) {
            Some(status) if status.enabled => {
                status.enabled = false;
                Ok(true)
            },
            _ => Ok(false),
        })
        .await
    }

    async fn exists(&self, module_name: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        Ok(self.load()?.contains_key(module_name))
    }

    async fn unregister(&self, module_name: &str) -> Result<()> {
        self.update(module_name, |modules| {
            Ok(modules.remove(module_name).is_some())
        })
        .await
    }

    async fn modules(&self) -> Result<BTreeMap<String, ModuleStatus>> {
        let _guard = self.lock.lock().await;
        self.load()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_enable_disable_unregister() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FsModuleHost::new(tmp.path().join("module-statuses.json"));

        assert!(!host.exists("Blog").await.unwrap());
        host.register("Blog", Path::new("/srv/Modules/Blog"))
            .await
            .unwrap();
        assert!(host.exists("Blog").await.unwrap());
        assert!(!host.modules().await.unwrap()["Blog"].enabled);

        host.enable("Blog").await.unwrap();
        assert!(host.modules().await.unwrap()["Blog"].enabled);

        host.disable("Blog").await.unwrap();
        assert!(!host.modules().await.unwrap()["Blog"].enabled);

        host.unregister("Blog").await.unwrap();
        assert!(!host.exists("Blog").await.unwrap());
        assert!(!tmp.path().join("module-statuses.json.tmp").exists());
    }

    #[tokio::test]
    async fn enabling_unknown_module_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let host = FsModuleHost::new(tmp.path().join("module-statuses.json"));
        let err = host.enable("Ghost").await.unwrap_err();
        assert!(matches!(err, Error::Host { .. }));

        host.disable("Ghost").await.unwrap();
        host.unregister("Ghost").await.unwrap();
    }

    #[tokio::test]
    async fn state_survives_new_instance() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state/module-statuses.json");
        {
            let host = FsModuleHost::new(path.clone());
            host.register("Blog", Path::new("/m/Blog")).await.unwrap();
            host.enable("Blog").await.unwrap();
        }
        let host = FsModuleHost::new(path);
        let modules = host.modules().await.unwrap();
        assert_eq!(modules["Blog"], ModuleStatus {
            path: PathBuf::from("/m/Blog"),
            enabled: true,
        });
    }
}
