//! Watched-folder scanning and the processed marker.
//!
//! The folder is walked in full on every tick. Order is depth-first pre-order
//! with the entries of each directory sorted by file name, so the same tree
//! always yields the same candidate. Symlinks and special files are ignored.

use std::ffi::OsString;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// First unprocessed regular file under `folder`, or `None`.
///
/// Never fails: an unreadable folder or entry is logged and skipped.
pub async fn next_candidate(folder: &Path, marker: &str) -> Option<PathBuf> {
    let folder = folder.to_path_buf();
    let marker = marker.to_string();

    match tokio::task::spawn_blocking(move || first_candidate(&folder, &marker)).await {
        Ok(found) => found,
        Err(e) => {
            warn!(error = %e, "Folder scan task failed");
            None
        }
    }
}

fn first_candidate(dir: &Path, marker: &str) -> Option<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "Failed to read directory");
            return None;
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Skipping unreadable entry");
                None
            }
        })
        .collect();
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    for path in paths {
        // symlink_metadata so links are never followed
        let metadata = match path.symlink_metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        if metadata.is_dir() {
            if let Some(found) = first_candidate(&path, marker) {
                return Some(found);
            }
        } else if metadata.is_file() && !is_processed(&path, marker) {
            return Some(path);
        }
    }

    None
}

pub fn is_processed(path: &Path, marker: &str) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().ends_with(&format!(".{marker}")))
        .unwrap_or(false)
}

/// `a.txt` becomes `a.txt.<marker>`.
pub fn processed_path(path: &Path, marker: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(marker);
    PathBuf::from(name)
}

/// Rename `path` to its processed form and return the new path.
///
/// An existing file at the target is replaced. Marking a path that is already
/// marked, or whose source is gone but whose target exists, is a no-op.
pub fn mark_processed(path: &Path, marker: &str) -> io::Result<PathBuf> {
    if is_processed(path, marker) {
        return Ok(path.to_path_buf());
    }

    let target = processed_path(path, marker);

    if path.symlink_metadata().is_err() {
        if target.symlink_metadata().is_ok() {
            debug!(path = %path.display(), "Already marked processed");
            return Ok(target);
        }
        return Err(io::Error::new(
            ErrorKind::NotFound,
            format!("{} no longer exists", path.display()),
        ));
    }

    match fs::remove_file(&target) {
        Ok(()) => debug!(target = %target.display(), "Replaced previous processed file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    fs::rename(path, &target)?;
    Ok(target)
}
