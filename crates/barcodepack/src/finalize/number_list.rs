//! Per-symbology lists of every code in a package.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{FinalizeError, StorageError, SymbologyError};
use crate::job::BaseCode;
use crate::render::{format_dir, OutputFormat};
use crate::sanitize::sanitize_component;
use crate::storage::ensure_directory;
use crate::symbology::{CodePair, Symbology};

/// `<root>/<SYM>/<SYM> Number List - Order # <order>.csv`
pub fn number_list_path(root: &Path, symbology: Symbology, order_id: &str) -> PathBuf {
    root.join(symbology.label()).join(format!(
        "{} Number List - Order # {}.csv",
        symbology.label(),
        sanitize_component(order_id)
    ))
}

/// Every code of `[start, end]` in ascending order, produced on demand.
pub fn codes_from_range(
    start: BaseCode,
    end: BaseCode,
    symbology: Symbology,
) -> impl Iterator<Item = Result<String, SymbologyError>> {
    let count = end.value().saturating_sub(start.value()) + 1;
    (0..count)
        .filter_map(move |i| start.offset(i))
        .map(move |base| {
            let pair = CodePair::from_base(&base.to_string())?;
            Ok(pair.code(symbology).to_string())
        })
}

/// Recovers the codes of a package from its raster file names, sorted.
pub fn codes_from_scan(root: &Path, symbology: Symbology) -> Result<Vec<String>, StorageError> {
    let dir = format_dir(root, symbology, OutputFormat::Jpg);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let pattern = format!(
        r"^{}-(\d{{{}}})\.jpg$",
        regex::escape(symbology.label()),
        symbology.code_len()
    );
    let re = Regex::new(&pattern).map_err(|e| StorageError::Read {
        path: dir.clone(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
    })?;

    let entries = std::fs::read_dir(&dir).map_err(|e| StorageError::Read {
        path: dir.clone(),
        source: e,
    })?;
    let mut codes = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::Read {
            path: dir.clone(),
            source: e,
        })?;
        let name = entry.file_name();
        if let Some(caps) = name.to_str().and_then(|n| re.captures(n)) {
            codes.push(caps[1].to_string());
        }
    }
    codes.sort();
    codes.dedup();
    Ok(codes)
}

/// Streams the list as a one-column CSV with a header row.
///
/// The codes go to a temporary sibling first. An identical existing list is
/// left untouched so its modification time does not invalidate a cached
/// archive. Returns whether the file changed.
pub fn write_number_list<I, E>(
    path: &Path,
    symbology: Symbology,
    codes: I,
) -> Result<bool, FinalizeError>
where
    I: IntoIterator<Item = Result<String, E>>,
    FinalizeError: From<E>,
{
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    ensure_directory(dir)?;

    let write_err = |e: std::io::Error| StorageError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    };
    let tmp = tempfile::Builder::new()
        .prefix(".partial-")
        .tempfile_in(dir)
        .map_err(write_err)?;
    let mut out = BufWriter::new(tmp);
    writeln!(out, "{}", symbology.label()).map_err(write_err)?;
    for code in codes {
        writeln!(out, "{}", code?).map_err(write_err)?;
    }
    let tmp = out.into_inner().map_err(|e| write_err(e.into_error()))?;

    if same_contents(tmp.path(), path).unwrap_or(false) {
        return Ok(false);
    }
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(true)
}

fn same_contents(a: &Path, b: &Path) -> std::io::Result<bool> {
    let (fa, fb) = (File::open(a)?, File::open(b)?);
    if fa.metadata()?.len() != fb.metadata()?.len() {
        return Ok(false);
    }
    let (mut ra, mut rb) = (BufReader::new(fa), BufReader::new(fb));
    let (mut ba, mut bb) = ([0u8; 8192], [0u8; 8192]);
    loop {
        let n = ra.read(&mut ba)?;
        if n == 0 {
            return Ok(true);
        }
        rb.read_exact(&mut bb[..n])?;
        if ba[..n] != bb[..n] {
            return Ok(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn base(v: u64) -> BaseCode {
        BaseCode::from_u64(v).unwrap()
    }

    #[test]
    fn test_list_path() {
        assert_eq!(
            number_list_path(Path::new("/out/A"), Symbology::UpcA, "A100"),
            PathBuf::from("/out/A/UPC-12/UPC-12 Number List - Order # A100.csv")
        );
        assert_eq!(
            number_list_path(Path::new("/out/A"), Symbology::Ean13, "x/y"),
            PathBuf::from("/out/A/EAN-13/EAN-13 Number List - Order # x_y.csv")
        );
    }

    #[test]
    fn test_codes_from_range() {
        let upc: Vec<String> = codes_from_range(base(1), base(3), Symbology::UpcA)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(upc, vec!["000000000017", "000000000024", "000000000031"]);
        let ean: Vec<String> = codes_from_range(base(1), base(1), Symbology::Ean13)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(ean, vec!["0000000000017"]);
    }

    #[test]
    fn test_codes_from_full_range_are_lazy() {
        let top = BaseCode::parse("99999999999").unwrap();
        let mut codes = codes_from_range(base(0), top, Symbology::UpcA);
        assert_eq!(codes.next().unwrap().unwrap(), "000000000000");
        assert_eq!(codes.next().unwrap().unwrap(), "000000000017");
    }

    #[test]
    fn test_codes_from_scan() {
        let dir = TempDir::new().unwrap();
        let jpg = dir.path().join("UPC-12").join("JPG");
        std::fs::create_dir_all(&jpg).unwrap();
        for name in [
            "UPC-12-000000000031.jpg",
            "UPC-12-000000000017.jpg",
            "UPC-12-12345.jpg",
            "EAN-13-0000000000017.jpg",
            "notes.txt",
        ] {
            std::fs::write(jpg.join(name), b"x").unwrap();
        }

        let codes = codes_from_scan(dir.path(), Symbology::UpcA).unwrap();
        assert_eq!(codes, vec!["000000000017", "000000000031"]);
        assert!(codes_from_scan(dir.path(), Symbology::Ean13).unwrap().is_empty());
    }

    #[test]
    fn test_write_number_list() {
        let dir = TempDir::new().unwrap();
        let path = number_list_path(dir.path(), Symbology::UpcA, "A100");
        let codes = || codes_from_range(base(1), base(2), Symbology::UpcA);
        assert!(write_number_list(&path, Symbology::UpcA, codes()).unwrap());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "UPC-12\n000000000017\n000000000024\n"
        );
        let written = std::fs::metadata(&path).unwrap().modified().unwrap();

        assert!(!write_number_list(&path, Symbology::UpcA, codes()).unwrap());
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), written);
        let leftovers = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with(".partial-")
            })
            .count();
        assert_eq!(leftovers, 0);

        let shorter = codes_from_range(base(1), base(1), Symbology::UpcA);
        assert!(write_number_list(&path, Symbology::UpcA, shorter).unwrap());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "UPC-12\n000000000017\n"
        );
    }
}
