use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::archive::{
    collect_entries, partial_path, stats_for, ArchiveEntry, ArchivePolicy, ArchiveStats, Archiver,
};
use crate::error::ArchiveError;

/// Multi-threaded archiving through an external `7z` binary.
///
/// Stored and deflated entries are added in two passes over list files so
/// each pass can use its own compression level.
pub struct SevenZipArchiver {
    bin: String,
    policy: ArchivePolicy,
}

impl SevenZipArchiver {
    /// Returns an archiver if `bin` runs, `None` otherwise.
    pub fn probe(bin: &str, policy: ArchivePolicy) -> Option<Self> {
        let available = Command::new(bin)
            .arg("i")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        available.then(|| Self {
            bin: bin.to_string(),
            policy,
        })
    }

    fn add_pass(
        &self,
        source_dir: &Path,
        archive: &Path,
        entries: &[&ArchiveEntry],
        level: u8,
    ) -> Result<(), ArchiveError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut list = tempfile::NamedTempFile::new().map_err(|e| ArchiveError::Io {
            path: std::env::temp_dir(),
            source: e,
        })?;
        for entry in entries {
            writeln!(list, "{}", entry.name).map_err(|e| ArchiveError::Io {
                path: list.path().to_path_buf(),
                source: e,
            })?;
        }
        list.flush().map_err(|e| ArchiveError::Io {
            path: list.path().to_path_buf(),
            source: e,
        })?;

        let output = Command::new(&self.bin)
            .current_dir(source_dir)
            .arg("a")
            .arg("-tzip")
            .arg("-mmt=on")
            .arg(format!("-mx={}", level))
            .arg("-scsUTF-8")
            .arg("-bd")
            .arg("-y")
            .arg(archive)
            .arg(format!("@{}", list.path().display()))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ArchiveError::Io {
                path: source_dir.to_path_buf(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(ArchiveError::External {
                tool: self.bin.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl Archiver for SevenZipArchiver {
    fn name(&self) -> &'static str {
        "7z"
    }

    fn build(&self, source_dir: &Path, dest: &Path) -> Result<ArchiveStats, ArchiveError> {
        let entries = collect_entries(source_dir, &self.policy)?;
        // The tool runs inside the source dir, so it needs an absolute target.
        let dest = std::path::absolute(dest).map_err(|e| ArchiveError::Io {
            path: dest.to_path_buf(),
            source: e,
        })?;
        let partial = partial_path(&dest);
        match std::fs::remove_file(&partial) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ArchiveError::Io {
                    path: partial,
                    source: e,
                })
            }
        }

        let written = self.write_partial(source_dir, &partial, &entries);
        if written.is_err() {
            let _ = std::fs::remove_file(&partial);
        }
        written?;

        std::fs::rename(&partial, &dest).map_err(|e| ArchiveError::Io {
            path: dest.clone(),
            source: e,
        })?;
        Ok(stats_for(&entries))
    }
}

impl SevenZipArchiver {
    fn write_partial(
        &self,
        source_dir: &Path,
        partial: &Path,
        entries: &[ArchiveEntry],
    ) -> Result<(), ArchiveError> {
        let (stored, deflated): (Vec<&ArchiveEntry>, Vec<&ArchiveEntry>) =
            entries.iter().partition(|e| e.stored);
        self.add_pass(source_dir, partial, &stored, 0)?;
        self.add_pass(source_dir, partial, &deflated, self.policy.level)?;

        if entries.is_empty() {
            // 7z writes nothing for an empty list; an empty zip is still a
            // valid package.
            let file = std::fs::File::create(partial).map_err(|e| ArchiveError::Io {
                path: partial.to_path_buf(),
                source: e,
            })?;
            zip::ZipWriter::new(file)
                .finish()
                .map_err(|e| ArchiveError::Zip {
                    path: partial.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::sample_tree;

    #[test]
    fn test_probe_missing_binary() {
        assert!(SevenZipArchiver::probe("barcodepack-no-such-7z", ArchivePolicy::default()).is_none());
    }

    #[test]
    fn test_build_when_available() {
        let Some(archiver) = SevenZipArchiver::probe("7z", ArchivePolicy::default()) else {
            return;
        };
        let dir = sample_tree();
        let dest = dir.path().join("A100.zip");
        let stats = archiver.build(&dir.path().join("A100"), &dest).unwrap();
        assert_eq!(stats.file_count, 4);

        let mut archive = zip::ZipArchive::new(std::fs::File::open(&dest).unwrap()).unwrap();
        assert_eq!(archive.len(), 4);
        let jpg = archive.by_name("UPC-12/JPG/UPC-12-000000000017.jpg").unwrap();
        assert_eq!(jpg.compression(), zip::CompressionMethod::Stored);
    }
}
