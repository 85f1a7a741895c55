//! Upload validation and zip extraction into a scratch directory.

use std::{
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
};

use {tempfile::TempDir, tracing::debug};

#[cfg(feature = "metrics")]
use plinth_metrics::{bundles as bundle_metrics, counter};

use crate::{
    error::{Error, Result},
    types::UploadedArchive,
};

/// Sub-directory of the scratch dir that receives archive entries.
const CONTENT_DIR: &str = "content";

/// Directory some archivers add next to the real content.
const RESOURCE_FORK_DIR: &str = "__MACOSX";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionLimits {
    /// Largest accepted upload, in bytes.
    pub max_upload_size: u64,
    /// Largest total uncompressed size, in bytes.
    pub max_extracted_size: u64,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            max_upload_size: plinth_config::schema::DEFAULT_MAX_UPLOAD_SIZE,
            max_extracted_size: plinth_config::schema::DEFAULT_MAX_EXTRACTED_SIZE,
        }
    }
}

/// An extracted archive living in its own scratch directory.
///
/// Dropping the value deletes the scratch directory and everything still in
/// it, so every exit path of an install cleans up after itself.
#[derive(Debug)]
pub struct ExtractedBundle {
    scratch: TempDir,
    root: PathBuf,
    extracted_bytes: u64,
}

impl ExtractedBundle {
    /// Directory holding the manifest.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    #[must_use]
    pub fn extracted_bytes(&self) -> u64 {
        self.extracted_bytes
    }
}

/// Reject uploads with the wrong extension or size before touching the disk.
pub fn validate_upload(upload: &UploadedArchive, limits: &ExtractionLimits) -> Result<()> {
    if upload.extension().as_deref() != Some("zip") {
        return Err(Error::validation(format!(
            "only .zip archives are accepted (got '{}')",
            upload.original_name
        )));
    }
    if upload.size > limits.max_upload_size {
        return Err(Error::validation(format!(
            "archive is {} bytes; the upload limit is {} bytes",
            upload.size, limits.max_upload_size
        )));
    }
    Ok(())
}

/// Validate `upload` and unpack it into a fresh directory under `scratch_root`.
///
/// Entries that would land outside the scratch directory and symlink entries
/// are skipped. The bundle root is the extraction directory when it holds
/// `manifest_file`, or the single top-level directory that does.
pub async fn extract(
    upload: &UploadedArchive,
    scratch_root: &Path,
    limits: &ExtractionLimits,
    manifest_file: &str,
) -> Result<ExtractedBundle> {
    validate_upload(upload, limits)?;

    let archive_path = upload.path.clone();
    let scratch_root = scratch_root.to_path_buf();
    let manifest_file = manifest_file.to_string();
    let max_extracted = limits.max_extracted_size;

    let bundle = tokio::task::spawn_blocking(move || -> Result<ExtractedBundle> {
        fs::create_dir_all(&scratch_root)?;
        let scratch = tempfile::Builder::new()
            .prefix("bundle-")
            .tempdir_in(&scratch_root)?;
        let content = scratch.path().join(CONTENT_DIR);
        fs::create_dir(&content)?;

        let extracted_bytes = unpack(&archive_path, &content, max_extracted)?;
        let root = locate_root(&content, &manifest_file)?;
        Ok(ExtractedBundle {
            scratch,
            root,
            extracted_bytes,
        })
    })
    .await??;

    #[cfg(feature = "metrics")]
    counter!(bundle_metrics::EXTRACTED_BYTES_TOTAL).increment(bundle.extracted_bytes);

    debug!(
        upload = %upload.original_name,
        scratch = %bundle.scratch_dir().display(),
        bytes = bundle.extracted_bytes,
        "extracted bundle archive"
    );
    Ok(bundle)
}

fn unpack(archive_path: &Path, dest: &Path, max_extracted: u64) -> Result<u64> {
    let file = File::open(archive_path).map_err(Error::extraction)?;
    let mut archive = zip::ZipArchive::new(file).map_err(Error::extraction)?;
    let dest = dest.canonicalize()?;
    let mut total: u64 = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(Error::extraction)?;
        let Some(rel_path) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            debug!(entry = entry.name(), "skipping archive entry outside the bundle root");
            continue;
        };
        if let Some(mode) = entry.unix_mode()
            && (mode & 0o170000) == 0o120000
        {
            debug!(entry = entry.name(), "skipping symlink archive entry");
            continue;
        }

        let out_path = dest.join(&rel_path);
        if !out_path.starts_with(&dest) {
            continue;
        }

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let remaining = max_extracted.saturating_sub(total);
        let mut out_file = File::create(&out_path)?;
        let written = io::copy(&mut (&mut entry).take(remaining.saturating_add(1)), &mut out_file)
            .map_err(Error::extraction)?;
        total += written;
        if total > max_extracted {
            return Err(Error::extraction(format!(
                "archive expands beyond the {max_extracted} byte limit"
            )));
        }
    }

    Ok(total)
}

fn locate_root(content: &Path, manifest_file: &str) -> Result<PathBuf> {
    if content.join(manifest_file).is_file() {
        return Ok(content.to_path_buf());
    }

    let mut dirs = Vec::new();
    let mut has_files = false;
    for entry in fs::read_dir(content)? {
        let entry = entry?;
        if entry.file_name() == RESOURCE_FORK_DIR {
            continue;
        }
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        } else {
            has_files = true;
        }
    }

    match dirs.as_slice() {
        [only] if !has_files && only.join(manifest_file).is_file() => Ok(only.clone()),
        _ => Err(Error::ManifestMissing {
            file: manifest_file.to_string(),
            dir: content.to_path_buf(),
        }),
    }
}
