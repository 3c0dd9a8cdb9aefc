use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::error::StorageError;

pub fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Writes `content` to `dest` through a sibling temp file and a rename, so a
/// reader never observes a partially written artifact.
pub fn write_atomic(dest: &Path, content: &[u8]) -> Result<(), StorageError> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    ensure_directory(dir)?;

    let write_err = |e: std::io::Error| StorageError::WriteFile {
        path: dest.to_path_buf(),
        source: e,
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(dir)
        .map_err(write_err)?;
    tmp.write_all(content).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(dest).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Removes `path` if present. Missing files are not an error.
pub fn remove_if_exists(path: &Path) -> Result<bool, StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::Remove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Removes a directory tree if present.
pub fn remove_tree(path: &Path) -> Result<bool, StorageError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::Remove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Copies every regular file directly inside `src_dir` into `dest_dir`,
/// leaving files that already exist at the destination untouched.
///
/// Returns the destination paths that were written.
pub fn copy_missing(src_dir: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let entries = std::fs::read_dir(src_dir).map_err(|e| StorageError::Read {
        path: src_dir.to_path_buf(),
        source: e,
    })?;

    let mut copied = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::Read {
            path: src_dir.to_path_buf(),
            source: e,
        })?;
        let from = entry.path();
        if !from.is_file() {
            continue;
        }
        let to = dest_dir.join(entry.file_name());
        if to.exists() {
            continue;
        }
        std::fs::copy(&from, &to).map_err(|e| StorageError::CopyFile {
            from: from.clone(),
            to: to.clone(),
            source: e,
        })?;
        copied.push(to);
    }
    copied.sort();
    Ok(copied)
}

/// Latest modification time of any regular file under `root`.
pub fn newest_mtime(root: &Path) -> Result<Option<SystemTime>, StorageError> {
    let mut newest: Option<SystemTime> = None;
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| StorageError::Scan {
            path: root.to_path_buf(),
            source: e,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok());
        if let Some(modified) = modified {
            newest = Some(newest.map_or(modified, |n| n.max(modified)));
        }
    }
    Ok(newest)
}
