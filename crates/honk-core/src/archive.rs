//! Archive extraction and tree copying.
//!
//! Everything here is synchronous; async callers go through [`blocking`].

use crate::error::{InstallError, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Run filesystem-heavy work off the async executor.
pub async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(std::io::Error::other)?
}

/// Unpack a `.tar.gz` into `dest`, preserving permissions.
pub fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    unpack_tar(GzDecoder::new(BufReader::new(file)), dest)
}

/// Unpack any tar stream into `dest`.
pub fn unpack_tar<R: std::io::Read>(reader: R, dest: &Path) -> Result<()> {
    crate::io::ensure_dir(dest)?;
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    archive.unpack(dest).map_err(|e| {
        InstallError::Validation(format!(
            "failed to extract archive into {}: {e}",
            dest.display()
        ))
    })
}

/// Recursively copy `src` into `dest`, merging with existing content.
/// Symlinks are followed so the result is self-contained.
pub fn copy_dir_all(src: &Path, dest: &Path) -> Result<u64> {
    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|e| InstallError::Io(std::io::Error::other(e)))?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// First regular file named `name` anywhere under `root`, shallowest first.
pub fn find_file(root: &Path, name: &str) -> Option<PathBuf> {
    let mut matches: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == name)
        .map(|e| e.into_path())
        .collect();
    matches.sort_by_key(|p| p.components().count());
    matches.into_iter().next()
}

/// Every directory named `name` under `root`.
pub fn find_dirs(root: &Path, name: &str) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.file_name() == name)
        .map(|e| e.into_path())
        .collect()
}
