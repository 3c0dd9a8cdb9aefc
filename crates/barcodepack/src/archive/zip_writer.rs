use std::fs::File;
use std::io::Write;
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::archive::{
    collect_entries, stats_for, ArchiveEntry, ArchivePolicy, ArchiveStats, Archiver,
};
use crate::error::ArchiveError;

/// Built-in single-threaded zip writer.
pub struct ZipArchiver {
    policy: ArchivePolicy,
}

impl ZipArchiver {
    pub fn new(policy: ArchivePolicy) -> Self {
        Self { policy }
    }

    fn options(&self, stored: bool) -> SimpleFileOptions {
        if stored {
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored)
        } else {
            SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated)
                .compression_level(Some(self.policy.level as i64))
        }
    }
}

impl ZipArchiver {
    /// Writes `entries` to a temporary sibling of `dest` and moves it into
    /// place. The temporary file is removed if any step fails.
    fn write_entries(&self, entries: &[ArchiveEntry], dest: &Path) -> Result<(), ArchiveError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| ArchiveError::Io { path, source }
        };
        let zip_err = |source| ArchiveError::Zip {
            path: dest.to_path_buf(),
            source,
        };

        let dir = dest.parent().unwrap_or_else(|| Path::new("."));
        let partial = tempfile::Builder::new()
            .prefix(".partial-")
            .suffix(".zip")
            .tempfile_in(dir)
            .map_err(io_err(dest))?;
        let mut zip = ZipWriter::new(partial);

        for entry in entries {
            tracing::trace!(name = %entry.name, stored = entry.stored, "Adding archive entry");
            zip.start_file(entry.name.as_str(), self.options(entry.stored))
                .map_err(zip_err)?;
            let mut input = File::open(&entry.path).map_err(io_err(&entry.path))?;
            std::io::copy(&mut input, &mut zip).map_err(io_err(&entry.path))?;
        }

        let mut partial = zip.finish().map_err(zip_err)?;
        partial.flush().map_err(io_err(dest))?;
        partial.persist(dest).map_err(|e| io_err(dest)(e.error))?;
        Ok(())
    }
}

impl Archiver for ZipArchiver {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn build(&self, source_dir: &Path, dest: &Path) -> Result<ArchiveStats, ArchiveError> {
        let entries = collect_entries(source_dir, &self.policy)?;
        self.write_entries(&entries, dest)?;

        let stats = stats_for(&entries);
        tracing::debug!(
            path = %dest.display(),
            files = stats.file_count,
            bytes = stats.total_bytes,
            "Archive written"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::sample_tree;
    use crate::config::CompressionMode;

    fn leftovers(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with(".partial-")
            })
            .count()
    }

    fn read_back(path: &Path) -> Vec<(String, zip::CompressionMethod)> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| {
                let file = archive.by_index(i).unwrap();
                (file.name().to_string(), file.compression())
            })
            .collect()
    }

    #[test]
    fn test_build_archive() {
        let dir = sample_tree();
        let dest = dir.path().join("A100.zip");
        let stats = ZipArchiver::new(ArchivePolicy::default())
            .build(&dir.path().join("A100"), &dest)
            .unwrap();
        assert_eq!(stats.file_count, 4);

        let entries = read_back(&dest);
        assert_eq!(entries.len(), 4);
        for (name, method) in &entries {
            if name.ends_with(".csv") {
                assert_eq!(*method, zip::CompressionMethod::Deflated);
            } else {
                assert_eq!(*method, zip::CompressionMethod::Stored, "{}", name);
            }
        }
        assert_eq!(leftovers(dir.path()), 0);
    }

    #[test]
    fn test_store_mode() {
        let dir = sample_tree();
        let dest = dir.path().join("A100.zip");
        let policy = ArchivePolicy {
            mode: CompressionMode::Store,
            ..ArchivePolicy::default()
        };
        ZipArchiver::new(policy)
            .build(&dir.path().join("A100"), &dest)
            .unwrap();
        assert!(read_back(&dest)
            .iter()
            .all(|(_, m)| *m == zip::CompressionMethod::Stored));
    }

    #[test]
    fn test_rebuild_replaces_archive() {
        let dir = sample_tree();
        let root = dir.path().join("A100");
        let dest = dir.path().join("A100.zip");
        std::fs::write(&dest, b"stale").unwrap();

        let archiver = ZipArchiver::new(ArchivePolicy::default());
        archiver.build(&root, &dest).unwrap();
        std::fs::write(root.join("UPC-12/JPG/UPC-12-000000000024.jpg"), b"more").unwrap();
        let stats = archiver.build(&root, &dest).unwrap();

        assert_eq!(stats.file_count, 5);
        assert_eq!(read_back(&dest).len(), 5);
    }

    #[test]
    fn test_missing_source_leaves_no_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("gone.zip");
        let result = ZipArchiver::new(ArchivePolicy::default()).build(&dir.path().join("gone"), &dest);
        assert!(matches!(result, Err(ArchiveError::SourceMissing(_))));
        assert!(!dest.exists());
    }

    #[test]
    fn test_failed_write_leaves_no_partial() {
        let dir = sample_tree();
        let root = dir.path().join("A100");
        let dest = dir.path().join("A100.zip");
        std::fs::write(&dest, b"previous").unwrap();

        let archiver = ZipArchiver::new(ArchivePolicy::default());
        let mut entries = collect_entries(&root, &archiver.policy).unwrap();
        // A file that vanished between listing and writing.
        entries.push(ArchiveEntry {
            path: root.join("UPC-12/JPG/UPC-12-999999999993.jpg"),
            name: "UPC-12/JPG/UPC-12-999999999993.jpg".to_string(),
            size: 3,
            stored: true,
        });

        let result = archiver.write_entries(&entries, &dest);
        assert!(matches!(result, Err(ArchiveError::Io { .. })));
        assert_eq!(leftovers(dir.path()), 0);
        assert_eq!(std::fs::read(&dest).unwrap(), b"previous");
    }
}
