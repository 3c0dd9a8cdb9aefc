//! Isolated environment for running the packaging pipeline.

#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use walkdir::WalkDir;

use barcodepack::archive::{ArchivePolicy, ZipArchiver};
use barcodepack::config::Config;
use barcodepack::lock::FileLeaseLock;
use barcodepack::progress::MemoryProgress;
use barcodepack::render::RendererSet;
use barcodepack::store::SqliteStatusStore;
use barcodepack::{PackageService, ServiceParts, StatusView};

/// Upper bound for any job in the integration suite.
pub const READY_TIMEOUT: Duration = Duration::from_secs(60);

pub struct TestHarness {
    temp_dir: TempDir,
    pub output_dir: PathBuf,
    pub db_path: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let output_dir = temp_dir.path().join("output");
        std::fs::create_dir_all(&output_dir).expect("Failed to create output dir");
        let db_path = temp_dir.path().join("status.db");
        Self {
            temp_dir,
            output_dir,
            db_path,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn output(&self) -> &str {
        self.output_dir.to_str().expect("temp path is not UTF-8")
    }

    /// Service backed by a SQLite file in the harness directory and the
    /// built-in zip writer.
    pub fn service(&self, config: Config) -> PackageService {
        let store =
            SqliteStatusStore::open(&self.db_path).expect("Failed to open status database");
        let lock = FileLeaseLock::new(self.output_dir.join(".locks")).expect("Failed to create lock dir");
        let parts = ServiceParts {
            store: Arc::new(store),
            aggregator: Arc::new(MemoryProgress::new()),
            lock: Arc::new(lock),
            archiver: Arc::new(ZipArchiver::new(ArchivePolicy::from_config(&config.archive))),
            renderers: RendererSet::from_config(&config).expect("Failed to build renderers"),
            notifier: None,
        };
        PackageService::new(config, parts)
    }

    pub fn wait_ready(&self, service: &PackageService, job_id: &str) -> StatusView {
        service
            .wait_until_ready(job_id, READY_TIMEOUT, &AtomicBool::new(false))
            .expect("Status lookup failed")
            .expect("Package did not become ready in time")
    }
}

/// Entry names of a zip archive, sorted.
pub fn zip_entries(path: &Path) -> Vec<String> {
    let file = File::open(path).expect("Failed to open archive");
    let mut archive = zip::ZipArchive::new(file).expect("Not a zip archive");
    let mut names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).expect("Bad zip entry").name().to_string())
        .collect();
    names.sort();
    names
}

/// Files under `root` with one of `extensions`, as sorted `/`-separated
/// relative paths.
pub fn files_under(root: &Path, extensions: &[&str]) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .is_some_and(|x| extensions.contains(&x.to_ascii_lowercase().as_str()))
        })
        .filter_map(|e| {
            e.path().strip_prefix(root).ok().map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
        })
        .collect();
    files.sort();
    files
}
