//! Publishing theme assets into the public asset root.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

#[cfg(feature = "metrics")]
use plinth_metrics::{bundles as bundle_metrics, histogram};

use crate::{
    error::{Error, Result},
    materialize::copy_tree,
};

/// Where a theme keeps its static assets, relative to its module directory.
pub const ASSET_SOURCE_DIR: &str = "Resources/assets";

/// Copy `<module_dir>/Resources/assets` to `<asset_root>/<module_name>`.
///
/// The new copy is fully staged before the previous one is swapped out, so
/// readers see either the old or the new assets. Returns `None` when the
/// module ships no assets; any stale published copy is then removed.
pub async fn publish(
    module_dir: &Path,
    asset_root: &Path,
    module_name: &str,
) -> Result<Option<PathBuf>> {
    #[cfg(feature = "metrics")]
    let start = std::time::Instant::now();

    let source = module_dir.join(ASSET_SOURCE_DIR);
    let asset_root = asset_root.to_path_buf();
    let target = asset_root.join(module_name);

    let published = tokio::task::spawn_blocking(move || -> Result<Option<PathBuf>> {
        if !source.is_dir() {
            remove_dir_if_exists(&target).map_err(|e| Error::asset_publish(&target, e))?;
            return Ok(None);
        }
        fs::create_dir_all(&asset_root).map_err(|e| Error::asset_publish(&asset_root, e))?;

        let staging = asset_root.join(format!(".staging-{}", uuid::Uuid::new_v4()));
        if let Err(e) = copy_tree(&source, &staging) {
            let _ = fs::remove_dir_all(&staging);
            return Err(Error::asset_publish(&staging, e));
        }
        swap_in(&staging, &target).map_err(|e| {
            let _ = fs::remove_dir_all(&staging);
            Error::asset_publish(&target, e)
        })?;
        Ok(Some(target))
    })
    .await??;

    #[cfg(feature = "metrics")]
    histogram!(bundle_metrics::ASSET_PUBLISH_DURATION_SECONDS)
        .record(start.elapsed().as_secs_f64());

    if let Some(path) = &published {
        debug!(module = module_name, path = %path.display(), "published theme assets");
    }
    Ok(published)
}

/// Remove `<asset_root>/<module_name>` if present.
pub async fn unpublish(asset_root: &Path, module_name: &str) -> Result<()> {
    let target = asset_root.join(module_name);
    tokio::task::spawn_blocking(move || {
        remove_dir_if_exists(&target).map_err(|e| Error::asset_publish(&target, e))
    })
    .await?
}

/// Replace `target` with `staging`, keeping the old copy until the swap lands.
fn swap_in(staging: &Path, target: &Path) -> io::Result<()> {
    if !target.exists() {
        return fs::rename(staging, target);
    }

    let retired = target.with_file_name(format!(".retired-{}", uuid::Uuid::new_v4()));
    fs::rename(target, &retired)?;
    if let Err(e) = fs::rename(staging, target) {
        if let Err(restore) = fs::rename(&retired, target) {
            warn!(
                path = %target.display(),
                error = %restore,
                "failed to restore previous assets"
            );
        }
        return Err(e);
    }
    if let Err(e) = fs::remove_dir_all(&retired) {
        warn!(path = %retired.display(), error = %e, "failed to remove retired assets");
    }
    Ok(())
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
