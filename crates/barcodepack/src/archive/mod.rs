//! Packs an output tree into a single zip.
//!
//! Two strategies share one trait: an external multi-threaded `7z` process
//! when the binary answers a probe, and the built-in `zip` writer otherwise.
//! Both take the same entry list so the archive contents never depend on
//! which one ran.

pub mod external;
pub mod zip_writer;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use walkdir::WalkDir;

use crate::config::{ArchiveConfig, CompressionMode};
use crate::error::ArchiveError;

pub use external::SevenZipArchiver;
pub use zip_writer::ZipArchiver;

/// Extensions that are already compressed and go into the archive stored.
const STORED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "pdf", "eps"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveStats {
    pub file_count: u64,
    pub total_bytes: u64,
}

pub trait Archiver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Writes `dest` from every allowed file under `source_dir`, replacing
    /// any previous archive only once the new one is complete.
    fn build(&self, source_dir: &Path, dest: &Path) -> Result<ArchiveStats, ArchiveError>;
}

/// Which files go into an archive and how each is compressed.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivePolicy {
    allowed_extensions: Vec<String>,
    pub mode: CompressionMode,
    pub level: u8,
}

impl ArchivePolicy {
    pub fn from_config(config: &ArchiveConfig) -> Self {
        Self {
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            mode: config.compression,
            level: config.level,
        }
    }

    fn extension(path: &Path) -> Option<String> {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    pub fn is_allowed(&self, path: &Path) -> bool {
        Self::extension(path).is_some_and(|ext| self.allowed_extensions.contains(&ext))
    }

    /// Whether the entry is stored rather than deflated.
    pub fn is_stored(&self, path: &Path) -> bool {
        self.mode == CompressionMode::Store
            || Self::extension(path).is_some_and(|ext| STORED_EXTENSIONS.contains(&ext.as_str()))
    }
}

impl Default for ArchivePolicy {
    fn default() -> Self {
        Self::from_config(&ArchiveConfig::default())
    }
}

/// A file selected for the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    /// Path relative to the source directory with `/` separators.
    pub name: String,
    pub size: u64,
    pub stored: bool,
}

/// Lists the allowed files under `source_dir`, sorted by entry name.
pub fn collect_entries(
    source_dir: &Path,
    policy: &ArchivePolicy,
) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    if !source_dir.is_dir() {
        return Err(ArchiveError::SourceMissing(source_dir.to_path_buf()));
    }

    let mut entries = Vec::new();
    for entry in WalkDir::new(source_dir).follow_links(false) {
        let entry = entry.map_err(|e| ArchiveError::Scan {
            path: source_dir.to_path_buf(),
            source: e,
        })?;
        if !entry.file_type().is_file() || !policy.is_allowed(entry.path()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(source_dir) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let size = entry
            .metadata()
            .map_err(|e| ArchiveError::Scan {
                path: entry.path().to_path_buf(),
                source: e,
            })?
            .len();
        entries.push(ArchiveEntry {
            stored: policy.is_stored(entry.path()),
            path: entry.into_path(),
            name,
            size,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

pub(crate) fn stats_for(entries: &[ArchiveEntry]) -> ArchiveStats {
    ArchiveStats {
        file_count: entries.len() as u64,
        total_bytes: entries.iter().map(|e| e.size).sum(),
    }
}

/// Temporary sibling the archive is written to before it replaces `dest`.
pub(crate) fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive.zip".to_string());
    dest.with_file_name(format!(".partial-{}", name))
}

/// Picks the external archiver when preferred and available, else the
/// built-in writer.
pub fn select_archiver(config: &ArchiveConfig) -> Arc<dyn Archiver> {
    let policy = ArchivePolicy::from_config(config);
    if config.prefer_external {
        if let Some(external) = SevenZipArchiver::probe(&config.external_bin, policy.clone()) {
            log::info!("Using external archiver '{}'", config.external_bin);
            return Arc::new(external);
        }
        log::info!(
            "External archiver '{}' unavailable, using built-in zip writer",
            config.external_bin
        );
    }
    Arc::new(ZipArchiver::new(policy))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// A small output tree with artifacts, a list, and files that must be
    /// left out.
    pub(crate) fn sample_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("A100");
        for (rel, body) in [
            ("UPC-12/JPG/UPC-12-000000000017.jpg", &b"jpegdata"[..]),
            ("UPC-12/PDF/UPC-12-000000000017.pdf", b"%PDF-1.4"),
            ("EAN-13/EPS/EAN-13-0000000000017.eps", b"%!PS"),
            ("UPC-12/UPC-12 Number List - Order # A100.csv", b"000000000017\n"),
            ("README.txt", b"not allowed"),
            ("UPC-12/JPG/.partial-x.tmp", b"temp"),
        ] {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
        dir
    }

    #[test]
    fn test_collect_entries_filters_and_sorts() {
        let dir = sample_tree();
        let entries = collect_entries(&dir.path().join("A100"), &ArchivePolicy::default()).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "EAN-13/EPS/EAN-13-0000000000017.eps",
                "UPC-12/JPG/UPC-12-000000000017.jpg",
                "UPC-12/PDF/UPC-12-000000000017.pdf",
                "UPC-12/UPC-12 Number List - Order # A100.csv",
            ]
        );
        assert!(entries[0].stored);
        assert!(!entries[3].stored);
        assert_eq!(stats_for(&entries).total_bytes, 4 + 8 + 8 + 13);
    }

    #[test]
    fn test_store_mode_stores_everything() {
        let policy = ArchivePolicy {
            mode: CompressionMode::Store,
            ..ArchivePolicy::default()
        };
        assert!(policy.is_stored(Path::new("list.csv")));
        assert!(ArchivePolicy::default().is_stored(Path::new("a.JPG")));
        assert!(!ArchivePolicy::default().is_stored(Path::new("list.csv")));
    }

    #[test]
    fn test_missing_source() {
        let dir = TempDir::new().unwrap();
        let result = collect_entries(&dir.path().join("nope"), &ArchivePolicy::default());
        assert!(matches!(result, Err(ArchiveError::SourceMissing(_))));
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/out/A100.zip")),
            PathBuf::from("/out/.partial-A100.zip")
        );
    }

    #[test]
    fn test_select_falls_back_to_builtin() {
        let config = ArchiveConfig {
            external_bin: "barcodepack-no-such-7z".to_string(),
            ..ArchiveConfig::default()
        };
        assert_eq!(select_archiver(&config).name(), "zip");

        let config = ArchiveConfig {
            prefer_external: false,
            ..ArchiveConfig::default()
        };
        assert_eq!(select_archiver(&config).name(), "zip");
    }
}
