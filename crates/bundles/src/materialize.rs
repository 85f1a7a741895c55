//! Moving an extracted bundle into the module root.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use {
    tracing::{debug, warn},
    walkdir::WalkDir,
};

use crate::error::{Error, Result};

/// File count and byte total of a directory tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TreeStats {
    pub files: u64,
    pub bytes: u64,
}

/// Move `source` to `<module_root>/<module_name>` and return the new path.
///
/// A directory already at the target is removed first. Moves across
/// filesystems fall back to a verified copy followed by removal of `source`.
pub async fn materialize(source: &Path, module_root: &Path, module_name: &str) -> Result<PathBuf> {
    let source = source.to_path_buf();
    let target = module_root.join(module_name);
    let module_root = module_root.to_path_buf();

    tokio::task::spawn_blocking(move || {
        fs::create_dir_all(&module_root).map_err(|e| Error::materialization(&module_root, e))?;
        remove_existing(&target).map_err(|e| Error::materialization(&target, e))?;
        move_dir(&source, &target, |from, to| fs::rename(from, to))
            .map_err(|e| Error::materialization(&target, e))?;
        debug!(target = %target.display(), "materialized bundle");
        Ok(target)
    })
    .await?
}

fn remove_existing(target: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(target) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    warn!(path = %target.display(), "replacing stale module directory");
    if meta.is_dir() {
        fs::remove_dir_all(target)
    } else {
        fs::remove_file(target)
    }
}

fn move_dir(
    source: &Path,
    target: &Path,
    rename: impl Fn(&Path, &Path) -> io::Result<()>,
) -> io::Result<()> {
    match rename(source, target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!(
                source = %source.display(),
                target = %target.display(),
                "rename crosses filesystems, copying instead"
            );
            if let Err(e) = copy_verified(source, target) {
                let _ = fs::remove_dir_all(target);
                return Err(e);
            }
            fs::remove_dir_all(source)
        },
        Err(e) => Err(e),
    }
}

fn copy_verified(source: &Path, target: &Path) -> io::Result<()> {
    let copied = copy_tree(source, target)?;
    let expected = tree_stats(source)?;
    let actual = tree_stats(target)?;
    if copied != expected || actual != expected {
        return Err(io::Error::other(format!(
            "copy incomplete: expected {} files / {} bytes, found {} files / {} bytes",
            expected.files, expected.bytes, actual.files, actual.bytes
        )));
    }
    Ok(())
}

/// Recursively copy regular files and directories; symlinks are not followed
/// and not copied.
pub(crate) fn copy_tree(source: &Path, target: &Path) -> io::Result<TreeStats> {
    let mut stats = TreeStats::default();
    fs::create_dir_all(target)?;
    for entry in WalkDir::new(source).follow_links(false).min_depth(1) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let dest = target.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if file_type.is_file() {
            stats.bytes += fs::copy(entry.path(), &dest)?;
            stats.files += 1;
        }
    }
    Ok(stats)
}

pub(crate) fn tree_stats(root: &Path) -> io::Result<TreeStats> {
    let mut stats = TreeStats::default();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() {
            stats.files += 1;
            stats.bytes += entry.metadata()?.len();
        }
    }
    Ok(stats)
}
