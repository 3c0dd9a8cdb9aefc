//! Single-flight packaging of a finished job.
//!
//! Any number of triggers (the last chunk, the watchdog, a manual command)
//! may call `finalize`; a lease lock lets one through at a time and the
//! steps are idempotent, so repeated runs converge on the same package.

pub mod number_list;
pub mod skeleton;
pub mod webhook;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::archive::{ArchiveStats, Archiver};
use crate::config::Config;
use crate::error::{FinalizeError, StorageError};
use crate::lock::{FinalizeLock, LeaseGuard};
use crate::progress::{NoopProgress, PackageEvent, ProgressAggregator, ProgressReporter};
use crate::storage::newest_mtime;
use crate::store::{JobStatus, StatusStore};
use crate::symbology::Symbology;

pub use number_list::{codes_from_range, codes_from_scan, number_list_path, write_number_list};
pub use skeleton::{copy_front_matter, ensure_skeleton};
pub use webhook::{sign, Notifier, ReadyPayload, WebhookNotifier, SIGNATURE_HEADER};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FinalizeOutcome {
    /// A fresh archive was built.
    Finalized { archive: PathBuf, stats: ArchiveStats },
    /// The existing archive was still current.
    Cached { archive: PathBuf },
    /// Another finalize holds the lock for this job.
    AlreadyRunning,
}

impl FinalizeOutcome {
    pub fn archive(&self) -> Option<&Path> {
        match self {
            FinalizeOutcome::Finalized { archive, .. } | FinalizeOutcome::Cached { archive } => {
                Some(archive)
            }
            FinalizeOutcome::AlreadyRunning => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeSettings {
    pub lock_ttl: Duration,
    pub front_matter_dir: Option<PathBuf>,
    pub download_url_base: Option<String>,
    /// Archives younger than this are reused; zero disables reuse.
    pub cache_days: u32,
    pub make_ean13: bool,
}

impl FinalizeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lock_ttl: Duration::from_secs(config.finalize.lock_ttl_secs),
            front_matter_dir: config.finalize.front_matter_dir.as_ref().map(PathBuf::from),
            download_url_base: config.finalize.download_url_base.clone(),
            cache_days: config.archive.cache_days,
            make_ean13: config.make_ean13,
        }
    }

    fn symbologies(&self) -> &'static [Symbology] {
        if self.make_ean13 {
            &Symbology::ALL
        } else {
            &[Symbology::UpcA]
        }
    }

    fn cache_horizon(&self) -> Duration {
        Duration::from_secs(u64::from(self.cache_days) * 24 * 60 * 60)
    }
}

impl Default for FinalizeSettings {
    fn default() -> Self {
        Self::from_config(&Config::with_output_directory("."))
    }
}

pub struct Finalizer {
    store: Arc<dyn StatusStore>,
    aggregator: Arc<dyn ProgressAggregator>,
    lock: Arc<dyn FinalizeLock>,
    archiver: Arc<dyn Archiver>,
    notifier: Option<Arc<dyn Notifier>>,
    reporter: Arc<dyn ProgressReporter>,
    settings: FinalizeSettings,
}

impl Finalizer {
    pub fn new(
        store: Arc<dyn StatusStore>,
        aggregator: Arc<dyn ProgressAggregator>,
        lock: Arc<dyn FinalizeLock>,
        archiver: Arc<dyn Archiver>,
        settings: FinalizeSettings,
    ) -> Self {
        Self {
            store,
            aggregator,
            lock,
            archiver,
            notifier: None,
            reporter: Arc::new(NoopProgress),
            settings,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Packages the job, or returns `AlreadyRunning` without waiting when
    /// another finalize holds the lock.
    pub fn finalize(&self, job_id: &str) -> Result<FinalizeOutcome, FinalizeError> {
        let span = tracing::info_span!("finalize", job_id = %job_id);
        let _enter = span.enter();

        let key = format!("finalize-{}", job_id);
        let Some(_guard) =
            LeaseGuard::try_acquire(Arc::clone(&self.lock), &key, self.settings.lock_ttl)?
        else {
            tracing::info!("Another finalizer is already running");
            self.reporter.report(PackageEvent::FinalizeSkipped {
                job_id: job_id.to_string(),
                reason: "already running".to_string(),
            });
            return Ok(FinalizeOutcome::AlreadyRunning);
        };

        let status = self
            .store
            .get(job_id)?
            .ok_or_else(|| FinalizeError::JobNotFound(job_id.to_string()))?;
        let root = status.output_root.as_path();
        if !root.is_dir() {
            return Err(FinalizeError::RootMissing(root.to_path_buf()));
        }

        let symbologies = self.settings.symbologies();
        ensure_skeleton(root, &status.formats, symbologies)?;
        let copied = copy_front_matter(self.settings.front_matter_dir.as_deref(), root)?;
        if !copied.is_empty() {
            tracing::debug!(count = copied.len(), "Copied front matter");
        }
        if status.formats.number_list {
            self.write_number_lists(&status, symbologies)?;
        }

        let dest = status.archive_destination();
        if self.is_cached(root, &dest)? {
            tracing::info!(path = %dest.display(), "Archive is current, reusing it");
            self.complete(&status, &dest, true)?;
            return Ok(FinalizeOutcome::Cached { archive: dest });
        }

        // The previous archive stays in place until the new one replaces it.
        let started = std::time::Instant::now();
        let stats = self.archiver.build(root, &dest)?;
        tracing::info!(
            path = %dest.display(),
            archiver = self.archiver.name(),
            files = stats.file_count,
            bytes = stats.total_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Archive written"
        );

        self.complete(&status, &dest, false)?;
        Ok(FinalizeOutcome::Finalized {
            archive: dest,
            stats,
        })
    }

    fn write_number_lists(
        &self,
        status: &JobStatus,
        symbologies: &[Symbology],
    ) -> Result<(), FinalizeError> {
        for &symbology in symbologies {
            let path = number_list_path(&status.output_root, symbology, &status.order_id);
            let changed = match (status.start, status.end) {
                (Some(start), Some(end)) => {
                    write_number_list(&path, symbology, codes_from_range(start, end, symbology))?
                }
                _ => {
                    let codes = codes_from_scan(&status.output_root, symbology)?;
                    write_number_list(&path, symbology, codes.into_iter().map(Ok::<_, StorageError>))?
                }
            };
            if changed {
                tracing::debug!(path = %path.display(), "Wrote number list");
            }
        }
        Ok(())
    }

    /// An archive is reusable while it is within the cache horizon and no
    /// file in the tree is newer than it.
    fn is_cached(&self, root: &Path, archive: &Path) -> Result<bool, StorageError> {
        if self.settings.cache_days == 0 {
            return Ok(false);
        }
        let Ok(archived_at) = std::fs::metadata(archive).and_then(|m| m.modified()) else {
            return Ok(false);
        };
        let age = SystemTime::now()
            .duration_since(archived_at)
            .unwrap_or_default();
        if age >= self.settings.cache_horizon() {
            return Ok(false);
        }
        Ok(newest_mtime(root)?.map_or(true, |newest| newest <= archived_at))
    }

    /// Records the package as ready and announces it.
    ///
    /// A cached archive of a job already marked finished was announced by an
    /// earlier run and is neither recorded nor announced again. The webhook
    /// only goes out once the finished state is durable.
    fn complete(
        &self,
        status: &JobStatus,
        archive: &Path,
        cached: bool,
    ) -> Result<(), FinalizeError> {
        let announce = !(cached && status.is_finished());
        let finished_at = if announce {
            Utc::now()
        } else {
            status.finished_at.unwrap_or_else(Utc::now)
        };

        if announce {
            self.store.mark_finished(&status.job_id, archive, finished_at)?;
        }
        self.aggregator.mark_complete(&status.job_id);

        self.reporter.report(PackageEvent::Finalized {
            job_id: status.job_id.clone(),
            archive_path: archive.to_path_buf(),
            cached,
            finished_at,
        });

        if announce {
            self.notify(status, archive, finished_at);
        }
        Ok(())
    }

    fn download_url(&self, archive: &Path) -> String {
        match &self.settings.download_url_base {
            Some(base) => {
                let name = archive
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("{}/{}", base.trim_end_matches('/'), name)
            }
            None => archive.display().to_string(),
        }
    }

    fn notify(&self, status: &JobStatus, archive: &Path, finished_at: DateTime<Utc>) {
        let (Some(notifier), Some(target)) = (&self.notifier, &status.callback) else {
            return;
        };
        let payload = ReadyPayload::new(
            status.job_id.clone(),
            status.order_id.clone(),
            self.download_url(archive),
            finished_at,
        );
        if let Err(e) = notifier.notify(target, &payload) {
            tracing::warn!(error = %e, "Ready webhook failed");
        }
    }
}
