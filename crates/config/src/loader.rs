use std::{
    path::{Path, PathBuf},
    sync::RwLock,
};

use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    schema::PlinthConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["plinth.toml", "plinth.yaml", "plinth.yml", "plinth.json"];

static CONFIG_DIR_OVERRIDE: RwLock<Option<PathBuf>> = RwLock::new(None);
static DATA_DIR_OVERRIDE: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Use `dir` instead of `~/.config/plinth/` for the rest of the process.
pub fn set_config_dir(dir: PathBuf) {
    if let Ok(mut slot) = CONFIG_DIR_OVERRIDE.write() {
        *slot = Some(dir);
    }
}

pub fn clear_config_dir() {
    if let Ok(mut slot) = CONFIG_DIR_OVERRIDE.write() {
        *slot = None;
    }
}

/// Use `dir` instead of the platform data directory for the rest of the process.
pub fn set_data_dir(dir: PathBuf) {
    if let Ok(mut slot) = DATA_DIR_OVERRIDE.write() {
        *slot = Some(dir);
    }
}

pub fn clear_data_dir() {
    if let Ok(mut slot) = DATA_DIR_OVERRIDE.write() {
        *slot = None;
    }
}

fn read_override(slot: &RwLock<Option<PathBuf>>) -> Option<PathBuf> {
    slot.read().ok().and_then(|guard| guard.clone())
}

/// Returns the user-global config directory (`~/.config/plinth/`).
pub fn config_dir() -> Option<PathBuf> {
    read_override(&CONFIG_DIR_OVERRIDE).or_else(|| {
        directories::ProjectDirs::from("", "", "plinth").map(|d| d.config_dir().to_path_buf())
    })
}

/// Returns the data directory holding the database, modules and assets.
///
/// Falls back to `./.plinth` when the platform has no home directory.
pub fn data_dir() -> PathBuf {
    read_override(&DATA_DIR_OVERRIDE)
        .or_else(|| {
            directories::ProjectDirs::from("", "", "plinth").map(|d| d.data_dir().to_path_buf())
        })
        .unwrap_or_else(|| PathBuf::from(".plinth"))
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<PlinthConfig> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply environment
/// overrides.
///
/// Search order:
/// 1. `./plinth.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/plinth/plinth.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `PlinthConfig::default()` if no file is found or the file
/// does not parse.
pub fn discover_and_load() -> PlinthConfig {
    let config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                PlinthConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            PlinthConfig::default()
        },
    };
    apply_env_overrides(config)
}

/// Apply `PLINTH_*` environment variables on top of a loaded config.
///
/// `PLINTH_UPLOADS_MAX_SIZE` is given in KiB, like the upload form setting it
/// mirrors.
pub fn apply_env_overrides(config: PlinthConfig) -> PlinthConfig {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

fn apply_env_overrides_with(
    mut config: PlinthConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> PlinthConfig {
    if let Some(raw) = lookup("PLINTH_UPLOADS_MAX_SIZE") {
        match raw.trim().parse::<u64>() {
            Ok(kib) => config.bundles.max_upload_size = kib.saturating_mul(1024),
            Err(e) => warn!(value = %raw, error = %e, "ignoring invalid PLINTH_UPLOADS_MAX_SIZE"),
        }
    }
    if let Some(root) = lookup("PLINTH_MODULE_ROOT").filter(|v| !v.is_empty()) {
        config.bundles.module_root = Some(PathBuf::from(root));
    }
    if let Some(root) = lookup("PLINTH_ASSET_ROOT").filter(|v| !v.is_empty()) {
        config.bundles.asset_root = Some(PathBuf::from(root));
    }
    if let Some(url) = lookup("PLINTH_DATABASE_URL").filter(|v| !v.is_empty()) {
        config.database.url = Some(url);
    }
    config
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the path of an existing config file, or the default TOML path.
pub fn find_or_default_config_path() -> PathBuf {
    if let Some(path) = find_config_file() {
        return path;
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("plinth.toml")
}

/// Serialize `config` to TOML and write it to the config path.
///
/// Creates parent directories if needed. Returns the path written to.
pub fn save_config(config: &PlinthConfig) -> Result<PathBuf> {
    let path = find_or_default_config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(config)?;
    std::fs::write(&path, toml_str)?;
    debug!(path = %path.display(), "saved config");
    Ok(path)
}

fn parse_config(raw: &str, path: &Path) -> Result<PlinthConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}
