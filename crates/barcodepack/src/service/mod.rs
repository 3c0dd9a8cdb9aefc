//! Job acceptance and lifecycle.
//!
//! `PackageService` wires the store, renderers, finalizer and worker pool
//! together, accepts job requests and answers status queries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::archive::{select_archiver, Archiver};
use crate::config::{Config, OrderPolicy};
use crate::db::default_database_path;
use crate::error::{Result, StorageError};
use crate::finalize::{FinalizeOutcome, FinalizeSettings, Finalizer, Notifier, WebhookNotifier};
use crate::job::{partition, ChunkWorkItem, ChunkWorker, JobRequest, JobSpec};
use crate::lock::{FileLeaseLock, FinalizeLock};
use crate::progress::{
    reconcile, BroadcastProgress, MemoryProgress, ProgressAggregator, ProgressReporter,
    ProgressSnapshot,
};
use crate::render::RendererSet;
use crate::sanitize::redact_url;
use crate::storage::{ensure_directory, remove_if_exists, remove_tree};
use crate::store::{JobStatus, MemoryStatusStore, SqliteStatusStore, StatusStore};
use crate::watchdog::{Watchdog, WatchdogHandle, WatchdogSettings};
use crate::worker::{RetryPolicy, WorkExecutor, WorkItem, WorkOutcome, WorkerPool};

/// `database_path` value that selects the in-memory store.
pub const IN_MEMORY_DATABASE: &str = ":memory:";

/// Swappable collaborators of the service.
pub struct ServiceParts {
    pub store: Arc<dyn StatusStore>,
    pub aggregator: Arc<dyn ProgressAggregator>,
    pub lock: Arc<dyn FinalizeLock>,
    pub archiver: Arc<dyn Archiver>,
    pub renderers: RendererSet,
    pub notifier: Option<Arc<dyn Notifier>>,
}

impl ServiceParts {
    /// Production wiring: SQLite status, file leases under
    /// `<output>/.locks`, probed archiver and an HTTP notifier.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn StatusStore> = match config.database_path.as_deref() {
            Some(IN_MEMORY_DATABASE) => Arc::new(MemoryStatusStore::new()),
            Some(path) => Arc::new(SqliteStatusStore::open(Path::new(path))?),
            None => match default_database_path() {
                Some(path) => Arc::new(SqliteStatusStore::open(&path)?),
                None => {
                    log::warn!("No home directory, job status will not survive a restart");
                    Arc::new(MemoryStatusStore::new())
                }
            },
        };

        let lock_dir = Path::new(&config.output_directory).join(".locks");
        let lock = Arc::new(FileLeaseLock::new(lock_dir)?);

        let timeout = Duration::from_secs(config.finalize.webhook_timeout_secs);
        let notifier: Option<Arc<dyn Notifier>> = match WebhookNotifier::new(timeout) {
            Ok(n) => Some(Arc::new(n)),
            Err(e) => {
                log::warn!("Webhooks disabled: {}", e);
                None
            }
        };

        Ok(Self {
            store,
            aggregator: Arc::new(MemoryProgress::new()),
            lock,
            archiver: select_archiver(&config.archive),
            renderers: RendererSet::from_config(config)?,
            notifier,
        })
    }
}

/// An accepted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub job_id: String,
    pub output_root: PathBuf,
    pub total_chunks: u64,
}

/// Reconciled progress of a job, as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub job_id: String,
    pub order_id: String,
    pub done: u64,
    pub total: u64,
    pub failed: u64,
    pub percentage: f64,
    pub ready: bool,
    pub archive_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

pub struct PackageService {
    config: Config,
    store: Arc<dyn StatusStore>,
    aggregator: Arc<dyn ProgressAggregator>,
    events: BroadcastProgress,
    executor: Arc<WorkExecutor>,
    pool: WorkerPool,
    watchdogs: Mutex<HashMap<String, WatchdogHandle>>,
    consumer_shutdown: Arc<AtomicBool>,
    consumer: Option<JoinHandle<()>>,
}

impl PackageService {
    pub fn from_config(config: Config) -> Result<Self> {
        let parts = ServiceParts::from_config(&config)?;
        Ok(Self::new(config, parts))
    }

    pub fn new(config: Config, parts: ServiceParts) -> Self {
        let events = BroadcastProgress::default();
        let reporter: Arc<dyn ProgressReporter> = Arc::new(events.clone());

        let chunks = ChunkWorker::new(
            parts.renderers,
            config.make_ean13,
            Arc::clone(&parts.store),
            Arc::clone(&parts.aggregator),
            Arc::clone(&reporter),
        );
        let mut finalizer = Finalizer::new(
            Arc::clone(&parts.store),
            Arc::clone(&parts.aggregator),
            parts.lock,
            parts.archiver,
            FinalizeSettings::from_config(&config),
        )
        .with_reporter(Arc::clone(&reporter));
        if let Some(notifier) = parts.notifier {
            finalizer = finalizer.with_notifier(notifier);
        }

        let executor = Arc::new(WorkExecutor::new(
            chunks,
            finalizer,
            reporter,
            RetryPolicy::from_config(&config.worker),
        ));
        let pool = WorkerPool::new(Arc::clone(&executor), config.worker_count.max(1));

        // Consume results so workers never block on a full result channel.
        let consumer_shutdown = Arc::new(AtomicBool::new(false));
        let results = pool.results();
        let shutdown = Arc::clone(&consumer_shutdown);
        let consumer = std::thread::spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                let Ok(result) = results.recv_timeout(Duration::from_millis(100)) else {
                    continue;
                };
                match &result.outcome {
                    WorkOutcome::Chunk { .. } | WorkOutcome::Finalized(_) => log::debug!(
                        "Work item done: job {} chunk {:?} after {} attempt(s)",
                        result.job_id,
                        result.chunk_index,
                        result.attempts
                    ),
                    WorkOutcome::Exhausted { error, .. } | WorkOutcome::Failed { error } => {
                        log::warn!(
                            "Work item failed: job {} chunk {:?}: {}",
                            result.job_id,
                            result.chunk_index,
                            error
                        )
                    }
                }
            }
            log::debug!("Result consumer shutting down");
        });

        Self {
            config,
            store: parts.store,
            aggregator: parts.aggregator,
            events,
            executor,
            pool,
            watchdogs: Mutex::new(HashMap::new()),
            consumer_shutdown,
            consumer: Some(consumer),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribes to lifecycle events of all jobs.
    pub fn events(&self) -> &BroadcastProgress {
        &self.events
    }

    /// Validates and accepts a job, then queues its chunks.
    pub fn submit(&self, request: &JobRequest) -> Result<Submission> {
        let spec = JobSpec::from_request(request, &self.config)?;

        if self.config.order_policy == OrderPolicy::Replace {
            self.replace_order(&spec.order_id);
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let output_root = Path::new(&self.config.output_directory).join(format!(
            "order-{}-{}",
            Utc::now().format("%Y%m%d-%H%M%S"),
            &job_id[..8]
        ));
        ensure_directory(&output_root)?;

        let ranges = partition(spec.start, spec.end, spec.chunk_size)?;
        let total = ranges.remaining();

        self.store
            .create(&JobStatus::new(job_id.clone(), &spec, output_root.clone()))?;
        self.store.set_total_chunks(&job_id, total)?;
        self.aggregator.set_total(&job_id, total);

        let span = tracing::info_span!("submit", job_id = %job_id);
        let _enter = span.enter();
        let callback = spec.callback.as_ref().map(|c| redact_url(&c.url));
        tracing::info!(
            order_id = %spec.order_id,
            start = %spec.start,
            end = %spec.end,
            chunks = total,
            path = %output_root.display(),
            callback = callback.as_deref(),
            "Job accepted"
        );

        if self.config.watchdog.enabled {
            self.start_watchdog(&job_id);
        }

        for range in ranges {
            self.pool.submit(WorkItem::Chunk(ChunkWorkItem {
                job_id: job_id.clone(),
                order_id: spec.order_id.clone(),
                output_root: output_root.clone(),
                chunk_index: range.index,
                start: range.start,
                end: range.end,
                formats: spec.formats,
            }))?;
        }

        Ok(Submission {
            job_id,
            output_root,
            total_chunks: total,
        })
    }

    /// Reconciled view of a job.
    ///
    /// Readiness follows the durable finished state. An archive found on
    /// disk for a job not yet marked finished is recorded first.
    pub fn status(&self, job_id: &str) -> Result<Option<StatusView>> {
        let Some(mut status) = self.store.get(job_id)? else {
            return Ok(None);
        };

        let archive = status.archive_destination();
        if !status.is_finished() && archive.is_file() {
            let finished_at = std::fs::metadata(&archive)
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            self.store.mark_finished(job_id, &archive, finished_at)?;
            self.aggregator.mark_complete(job_id);
            log::info!("Back-filled finished state of job {} from {}", job_id, archive.display());
            status.archive_path = Some(archive.clone());
            status.finished_at = Some(finished_at);
        }

        let mut progress = reconcile(
            self.aggregator.read(job_id),
            status.completed_chunks,
            status.total_chunks,
            status.failed_chunks,
        );
        let ready = status.is_finished();
        if ready {
            progress.done = progress.done.max(progress.total);
        }

        Ok(Some(view(&status, progress, ready)))
    }

    /// Runs finalize for a job on the calling thread.
    pub fn finalize_now(&self, job_id: &str) -> Result<FinalizeOutcome> {
        Ok(self.executor.finalizer().finalize(job_id)?)
    }

    /// Polls until the job's package is ready.
    ///
    /// Returns `None` on timeout, when `cancel` is raised, or when the job
    /// does not exist.
    pub fn wait_until_ready(
        &self,
        job_id: &str,
        timeout: Duration,
        cancel: &AtomicBool,
    ) -> Result<Option<StatusView>> {
        let deadline = Instant::now() + timeout;
        loop {
            let Some(view) = self.status(job_id)? else {
                return Ok(None);
            };
            if view.ready {
                return Ok(Some(view));
            }
            if cancel.load(Ordering::Relaxed) || Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    /// Stops watchdogs and workers. In-flight items finish first.
    pub fn shutdown(mut self) {
        let watchdogs: Vec<_> = match self.watchdogs.lock() {
            Ok(mut map) => map.drain().map(|(_, handle)| handle).collect(),
            Err(poisoned) => poisoned.into_inner().drain().map(|(_, h)| h).collect(),
        };
        for handle in watchdogs {
            handle.stop();
        }

        self.pool.shutdown();
        self.pool.wait();

        self.consumer_shutdown.store(true, Ordering::Relaxed);
        if let Some(consumer) = self.consumer.take() {
            if consumer.join().is_err() {
                log::error!("Result consumer panicked");
            }
        }
    }

    fn start_watchdog(&self, job_id: &str) {
        let watchdog = Watchdog::new(
            job_id,
            Arc::clone(&self.store),
            Arc::clone(&self.aggregator),
            Arc::new(self.pool.dispatcher()),
            WatchdogSettings::from_config(&self.config.watchdog),
        );
        match watchdog.spawn() {
            Ok(handle) => {
                let Ok(mut watchdogs) = self.watchdogs.lock() else {
                    log::error!("Watchdog registry poisoned, job {} unwatched", job_id);
                    return;
                };
                watchdogs.retain(|_, h| !h.is_finished());
                watchdogs.insert(job_id.to_string(), handle);
            }
            Err(e) => log::warn!("Failed to start watchdog for job {}: {}", job_id, e),
        }
    }

    fn stop_watchdog(&self, job_id: &str) {
        let handle = self
            .watchdogs
            .lock()
            .ok()
            .and_then(|mut watchdogs| watchdogs.remove(job_id));
        if let Some(handle) = handle {
            handle.stop();
        }
    }

    /// Removes earlier jobs of the same order along with their files.
    /// Failures are logged; the new job is accepted regardless.
    fn replace_order(&self, order_id: &str) {
        let old_jobs = match self.store.find_by_order(order_id) {
            Ok(jobs) => jobs,
            Err(e) => {
                log::warn!("Failed to look up earlier jobs of order {}: {}", order_id, e);
                return;
            }
        };
        for old in old_jobs {
            self.stop_watchdog(&old.job_id);
            if let Err(e) = self.remove_job_files(&old) {
                log::warn!("Failed to remove files of job {}: {}", old.job_id, e);
            }
            if let Err(e) = self.store.delete(&old.job_id) {
                log::warn!("Failed to delete job {}: {}", old.job_id, e);
            }
            self.aggregator.forget(&old.job_id);
            log::info!(
                "Replaced job {} of order {} with a new request",
                old.job_id,
                order_id
            );
        }
    }

    fn remove_job_files(&self, old: &JobStatus) -> std::result::Result<(), StorageError> {
        if let Some(archive) = &old.archive_path {
            remove_if_exists(archive)?;
        }
        remove_if_exists(&old.archive_destination())?;
        remove_tree(&old.output_root)?;
        Ok(())
    }
}

fn view(status: &JobStatus, progress: ProgressSnapshot, ready: bool) -> StatusView {
    StatusView {
        job_id: status.job_id.clone(),
        order_id: status.order_id.clone(),
        done: progress.done,
        total: progress.total,
        failed: progress.failed,
        percentage: progress.percentage(),
        ready,
        archive_path: ready.then(|| status.archive_destination()),
        started_at: status.started_at,
        finished_at: status.finished_at,
    }
}
