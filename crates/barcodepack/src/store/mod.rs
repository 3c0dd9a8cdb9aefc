//! Durable job status.
//!
//! Status only ever moves forward: chunk completions are counted once per
//! chunk index, and the archive path and finish time are written together.

pub mod sqlite;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;
use crate::job::{BaseCode, CallbackTarget, FormatSet, JobSpec};

pub use sqlite::SqliteStatusStore;

/// Durable record of one packaging job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub job_id: String,
    pub order_id: String,
    pub output_root: PathBuf,
    pub start: Option<BaseCode>,
    pub end: Option<BaseCode>,
    pub formats: FormatSet,
    #[serde(skip_serializing)]
    pub callback: Option<CallbackTarget>,
    pub total_chunks: u64,
    pub completed_chunks: u64,
    pub failed_chunks: u64,
    pub archive_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobStatus {
    /// A fresh status for an accepted job, with no chunks planned yet.
    pub fn new(job_id: impl Into<String>, spec: &JobSpec, output_root: impl Into<PathBuf>) -> Self {
        Self {
            job_id: job_id.into(),
            order_id: spec.order_id.clone(),
            output_root: output_root.into(),
            start: Some(spec.start),
            end: Some(spec.end),
            formats: spec.formats,
            callback: spec.callback.clone(),
            total_chunks: 0,
            completed_chunks: 0,
            failed_chunks: 0,
            archive_path: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some() && self.archive_path.is_some()
    }

    /// Where the archive for this job lives: `<output_root>.zip`.
    pub fn archive_destination(&self) -> PathBuf {
        archive_path_for(&self.output_root)
    }
}

/// `<root>.zip`, a sibling of the output root.
pub fn archive_path_for(output_root: &Path) -> PathBuf {
    let mut name = output_root
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".zip");
    output_root.with_file_name(name)
}

/// Persistent job status operations.
pub trait StatusStore: Send + Sync {
    /// Inserts a new job. Fails with `Duplicate` if the id is taken.
    fn create(&self, status: &JobStatus) -> Result<(), StoreError>;

    fn get(&self, job_id: &str) -> Result<Option<JobStatus>, StoreError>;

    fn set_total_chunks(&self, job_id: &str, total: u64) -> Result<(), StoreError>;

    /// Records completion of one chunk index and adds its failures.
    ///
    /// Returns `true` only on the first completion of that index.
    fn record_chunk(&self, job_id: &str, chunk_index: u64, failures: u64)
        -> Result<bool, StoreError>;

    /// Sets the archive path and finish time together.
    fn mark_finished(
        &self,
        job_id: &str,
        archive_path: &Path,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Jobs sharing an order id, oldest first.
    fn find_by_order(&self, order_id: &str) -> Result<Vec<JobStatus>, StoreError>;

    fn delete(&self, job_id: &str) -> Result<bool, StoreError>;
}

#[derive(Default)]
struct MemoryEntry {
    status: Option<JobStatus>,
    chunks: HashSet<u64>,
}

/// Status store kept in process memory.
#[derive(Default)]
pub struct MemoryStatusStore {
    jobs: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_jobs<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, MemoryEntry>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut jobs = self.jobs.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&mut jobs)
    }
}

impl StatusStore for MemoryStatusStore {
    fn create(&self, status: &JobStatus) -> Result<(), StoreError> {
        self.with_jobs(|jobs| {
            if jobs.contains_key(&status.job_id) {
                return Err(StoreError::Duplicate(status.job_id.clone()));
            }
            jobs.insert(
                status.job_id.clone(),
                MemoryEntry {
                    status: Some(status.clone()),
                    chunks: HashSet::new(),
                },
            );
            Ok(())
        })
    }

    fn get(&self, job_id: &str) -> Result<Option<JobStatus>, StoreError> {
        self.with_jobs(|jobs| Ok(jobs.get(job_id).and_then(|e| e.status.clone())))
    }

    fn set_total_chunks(&self, job_id: &str, total: u64) -> Result<(), StoreError> {
        self.with_jobs(|jobs| {
            let status = jobs
                .get_mut(job_id)
                .and_then(|e| e.status.as_mut())
                .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
            status.total_chunks = total;
            Ok(())
        })
    }

    fn record_chunk(
        &self,
        job_id: &str,
        chunk_index: u64,
        failures: u64,
    ) -> Result<bool, StoreError> {
        self.with_jobs(|jobs| {
            let entry = jobs
                .get_mut(job_id)
                .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
            if !entry.chunks.insert(chunk_index) {
                return Ok(false);
            }
            if let Some(status) = entry.status.as_mut() {
                status.completed_chunks += 1;
                status.failed_chunks += failures;
            }
            Ok(true)
        })
    }

    fn mark_finished(
        &self,
        job_id: &str,
        archive_path: &Path,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_jobs(|jobs| {
            let status = jobs
                .get_mut(job_id)
                .and_then(|e| e.status.as_mut())
                .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
            status.archive_path = Some(archive_path.to_path_buf());
            status.finished_at = Some(finished_at);
            Ok(())
        })
    }

    fn find_by_order(&self, order_id: &str) -> Result<Vec<JobStatus>, StoreError> {
        self.with_jobs(|jobs| {
            let mut found: Vec<JobStatus> = jobs
                .values()
                .filter_map(|e| e.status.as_ref())
                .filter(|s| s.order_id == order_id)
                .cloned()
                .collect();
            found.sort_by(|a, b| {
                a.started_at
                    .cmp(&b.started_at)
                    .then_with(|| a.job_id.cmp(&b.job_id))
            });
            Ok(found)
        })
    }

    fn delete(&self, job_id: &str) -> Result<bool, StoreError> {
        self.with_jobs(|jobs| Ok(jobs.remove(job_id).is_some()))
    }
}
