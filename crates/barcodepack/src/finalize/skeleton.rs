use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::job::FormatSet;
use crate::render::format_dir;
use crate::storage::{copy_missing, ensure_directory};
use crate::symbology::Symbology;

/// Creates `<root>/<SYM>/<FMT>` for every symbology and rendered format, so
/// the package layout is complete even when a format produced no files.
pub fn ensure_skeleton(
    root: &Path,
    formats: &FormatSet,
    symbologies: &[Symbology],
) -> Result<(), StorageError> {
    for &symbology in symbologies {
        for format in formats.render_formats() {
            ensure_directory(&format_dir(root, symbology, format))?;
        }
    }
    Ok(())
}

/// Copies the shared front-matter documents into the package root.
///
/// A missing source directory is logged and treated as empty.
pub fn copy_front_matter(source: Option<&Path>, root: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let Some(source) = source else {
        return Ok(Vec::new());
    };
    if !source.is_dir() {
        log::warn!(
            "Front matter directory {} does not exist, skipping",
            source.display()
        );
        return Ok(Vec::new());
    }
    copy_missing(source, root)
}
