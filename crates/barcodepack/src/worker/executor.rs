use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::WorkerConfig;
use crate::error::{FinalizeError, WorkerError};
use crate::finalize::{FinalizeOutcome, Finalizer};
use crate::job::{ChunkCompletion, ChunkWorkItem, ChunkWorker};
use crate::progress::{PackageEvent, ProgressReporter};
use crate::worker::task::{WorkItem, WorkOutcome, WorkResult};

/// Attempt limits applied to every work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub chunk_budget: Duration,
    pub finalize_budget: Duration,
    /// Wait before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            chunk_budget: Duration::from_secs(config.chunk_budget_secs),
            finalize_budget: Duration::from_secs(config.finalize_budget_secs),
            backoff: Duration::from_millis(500),
        }
    }

    fn pause(&self, attempt: u32) {
        if !self.backoff.is_zero() {
            std::thread::sleep(self.backoff * attempt);
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

/// Runs work items with retries. Shared by all pool threads.
pub struct WorkExecutor {
    chunks: ChunkWorker,
    finalizer: Finalizer,
    reporter: Arc<dyn ProgressReporter>,
    policy: RetryPolicy,
}

impl WorkExecutor {
    pub fn new(
        chunks: ChunkWorker,
        finalizer: Finalizer,
        reporter: Arc<dyn ProgressReporter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            chunks,
            finalizer,
            reporter,
            policy,
        }
    }

    pub fn finalizer(&self) -> &Finalizer {
        &self.finalizer
    }

    pub fn execute(&self, item: WorkItem) -> WorkResult {
        match item {
            WorkItem::Chunk(chunk) => self.execute_chunk(chunk),
            WorkItem::Finalize { job_id } => {
                let (attempts, result) = self.finalize_with_retries(&job_id);
                let outcome = match result {
                    Ok(outcome) => WorkOutcome::Finalized(outcome),
                    Err(e) => WorkOutcome::Failed {
                        error: e.to_string(),
                    },
                };
                WorkResult {
                    job_id,
                    chunk_index: None,
                    attempts,
                    outcome,
                }
            }
        }
    }

    fn execute_chunk(&self, item: ChunkWorkItem) -> WorkResult {
        let mut last_error = String::new();
        for attempt in 1..=self.policy.max_attempts {
            match self.chunks.run(&item, Some(self.policy.chunk_budget)) {
                Ok((report, completion)) => {
                    let finalize = self.finalize_if_last(&item.job_id, completion);
                    return WorkResult {
                        job_id: item.job_id,
                        chunk_index: Some(item.chunk_index),
                        attempts: attempt,
                        outcome: WorkOutcome::Chunk {
                            report,
                            completion,
                            finalize,
                        },
                    };
                }
                Err(e) => {
                    log::warn!(
                        "Chunk {} of job {} failed (attempt {}/{}): {}",
                        item.chunk_index,
                        item.job_id,
                        attempt,
                        self.policy.max_attempts,
                        e
                    );
                    last_error = e.to_string();
                    if attempt < self.policy.max_attempts {
                        self.policy.pause(attempt);
                    }
                }
            }
        }

        // Out of attempts: count the whole chunk as failed so the job can
        // still reach its total.
        let failures = item.range().code_count();
        let attempts = self.policy.max_attempts;
        match self.chunks.complete(&item, failures) {
            Ok(completion) => {
                log::error!(
                    "Chunk {} of job {} gave up after {} attempts, {} codes failed",
                    item.chunk_index,
                    item.job_id,
                    attempts,
                    failures
                );
                let finalize = self.finalize_if_last(&item.job_id, completion);
                WorkResult {
                    job_id: item.job_id,
                    chunk_index: Some(item.chunk_index),
                    attempts,
                    outcome: WorkOutcome::Exhausted {
                        completion,
                        finalize,
                        error: last_error,
                    },
                }
            }
            Err(e) => {
                let error = WorkerError::ChunkFailed {
                    job_id: item.job_id.clone(),
                    chunk_index: item.chunk_index,
                    reason: format!("{}; recording failed: {}", last_error, e),
                }
                .to_string();
                log::error!("{}", error);
                self.reporter.report(PackageEvent::JobFailed {
                    job_id: item.job_id.clone(),
                    error: error.clone(),
                });
                WorkResult {
                    job_id: item.job_id,
                    chunk_index: Some(item.chunk_index),
                    attempts,
                    outcome: WorkOutcome::Failed { error },
                }
            }
        }
    }

    /// Packages the job inline when `completion` recorded its last chunk.
    fn finalize_if_last(
        &self,
        job_id: &str,
        completion: ChunkCompletion,
    ) -> Option<FinalizeOutcome> {
        if !completion.completes_job() {
            return None;
        }
        log::info!(
            "Job {} completed all {} chunks, finalizing",
            job_id,
            completion.total
        );
        let (_, result) = self.finalize_with_retries(job_id);
        result.ok()
    }

    fn finalize_with_retries(&self, job_id: &str) -> (u32, Result<FinalizeOutcome, WorkerError>) {
        let mut last_error = String::new();
        for attempt in 1..=self.policy.max_attempts {
            let started = Instant::now();
            let error = match self.finalizer.finalize(job_id) {
                Ok(outcome) => {
                    let elapsed = started.elapsed();
                    if elapsed <= self.policy.finalize_budget
                        || outcome == FinalizeOutcome::AlreadyRunning
                    {
                        return (attempt, Ok(outcome));
                    }
                    WorkerError::FinalizeBudgetExceeded {
                        job_id: job_id.to_string(),
                        elapsed_ms: elapsed.as_millis(),
                    }
                    .to_string()
                }
                Err(e @ FinalizeError::JobNotFound(_)) => {
                    log::error!("Finalize of job {} abandoned: {}", job_id, e);
                    return (attempt, Err(self.finalize_failed(job_id, e.to_string())));
                }
                Err(e) => e.to_string(),
            };
            log::warn!(
                "Finalize of job {} failed (attempt {}/{}): {}",
                job_id,
                attempt,
                self.policy.max_attempts,
                error
            );
            last_error = error;
            if attempt < self.policy.max_attempts {
                self.policy.pause(attempt);
            }
        }
        (
            self.policy.max_attempts,
            Err(self.finalize_failed(job_id, last_error)),
        )
    }

    fn finalize_failed(&self, job_id: &str, reason: String) -> WorkerError {
        self.reporter.report(PackageEvent::JobFailed {
            job_id: job_id.to_string(),
            error: reason.clone(),
        });
        WorkerError::FinalizeFailed {
            job_id: job_id.to_string(),
            reason,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::Ordering;

    use tempfile::TempDir;

    use crate::archive::{ArchivePolicy, ZipArchiver};
    use crate::finalize::FinalizeSettings;
    use crate::job::chunk::tests::{stub_renderers, StubRenderer};
    use crate::job::partition;
    use crate::lock::MemoryLeaseLock;
    use crate::progress::{MemoryProgress, NoopProgress, ProgressAggregator};
    use crate::render::{OutputFormat, RendererSet};
    use crate::store::tests::sample_status;
    use crate::store::{MemoryStatusStore, StatusStore};

    pub(crate) struct Harness {
        pub _dir: TempDir,
        pub root: PathBuf,
        pub store: Arc<MemoryStatusStore>,
        pub aggregator: Arc<MemoryProgress>,
        pub lock: Arc<MemoryLeaseLock>,
        pub raster: Arc<StubRenderer>,
        pub executor: Arc<WorkExecutor>,
    }

    impl Harness {
        /// Job `j1` over `00000000001..=00000000005` split into chunks of two.
        pub(crate) fn new(renderers: Option<(RendererSet, Arc<StubRenderer>)>) -> Self {
            let dir = TempDir::new().unwrap();
            let root = dir.path().join("A100");
            std::fs::create_dir_all(&root).unwrap();

            let mut status = sample_status("j1", "A100");
            status.output_root = root.clone();
            let store = Arc::new(MemoryStatusStore::new());
            store.create(&status).unwrap();
            store.set_total_chunks("j1", 3).unwrap();
            let aggregator = Arc::new(MemoryProgress::new());
            aggregator.set_total("j1", 3);
            let lock = Arc::new(MemoryLeaseLock::new());

            let (renderers, raster) = renderers.unwrap_or_else(stub_renderers);
            let chunks = ChunkWorker::new(
                renderers,
                true,
                store.clone(),
                aggregator.clone(),
                Arc::new(NoopProgress),
            );
            let finalizer = Finalizer::new(
                store.clone(),
                aggregator.clone(),
                lock.clone(),
                Arc::new(ZipArchiver::new(ArchivePolicy::default())),
                FinalizeSettings::default(),
            );
            let policy = RetryPolicy {
                max_attempts: 2,
                backoff: Duration::ZERO,
                ..RetryPolicy::default()
            };
            let executor = Arc::new(WorkExecutor::new(
                chunks,
                finalizer,
                Arc::new(NoopProgress),
                policy,
            ));

            Self {
                _dir: dir,
                root,
                store,
                aggregator,
                lock,
                raster,
                executor,
            }
        }

        pub(crate) fn items(&self) -> Vec<ChunkWorkItem> {
            let status = self.store.get("j1").unwrap().unwrap();
            let (start, end) = (status.start.unwrap(), status.end.unwrap());
            partition(start, end, 2)
                .unwrap()
                .map(|range| ChunkWorkItem {
                    job_id: "j1".to_string(),
                    order_id: "A100".to_string(),
                    output_root: self.root.clone(),
                    chunk_index: range.index,
                    start: range.start,
                    end: range.end,
                    formats: status.formats,
                })
                .collect()
        }
    }

    #[test]
    fn test_last_chunk_finalizes_inline() {
        let h = Harness::new(None);
        let mut results: Vec<_> = h
            .items()
            .into_iter()
            .map(|item| h.executor.execute(WorkItem::Chunk(item)))
            .collect();

        assert!(results.iter().all(WorkResult::success));
        let last = results.pop().unwrap();
        let archive = last.finalize_outcome().and_then(|o| o.archive()).unwrap();
        assert!(archive.exists());
        assert!(results.iter().all(|r| r.finalize_outcome().is_none()));

        let status = h.store.get("j1").unwrap().unwrap();
        assert_eq!(status.completed_chunks, 3);
        assert!(status.is_finished());
    }

    #[test]
    fn test_redelivered_last_chunk_does_not_finalize_again() {
        let h = Harness::new(None);
        let items = h.items();
        for item in &items {
            h.executor.execute(WorkItem::Chunk(item.clone()));
        }
        let again = h.executor.execute(WorkItem::Chunk(items[2].clone()));
        assert!(again.success());
        assert!(again.finalize_outcome().is_none());
        assert_eq!(h.aggregator.read("j1").unwrap().done, 3);
    }

    #[test]
    fn test_exhausted_chunk_counts_all_codes_failed() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let h = Harness::new(None);
        let mut item = h.items().remove(0);
        item.output_root = blocker;

        let result = h.executor.execute(WorkItem::Chunk(item));
        assert_eq!(result.attempts, 2);
        assert!(matches!(result.outcome, WorkOutcome::Exhausted { .. }));

        let status = h.store.get("j1").unwrap().unwrap();
        assert_eq!(status.completed_chunks, 1);
        assert_eq!(status.failed_chunks, 2);
        assert_eq!(h.aggregator.read("j1").unwrap().failed, 2);
    }

    #[test]
    fn test_per_code_failure_is_not_retried() {
        let mut raster = StubRenderer::new(OutputFormat::Jpg);
        raster.fail_code = Some("000000000017".to_string());
        let raster = Arc::new(raster);
        let set = RendererSet::new(
            raster.clone(),
            Arc::new(StubRenderer::new(OutputFormat::Pdf)),
            Arc::new(StubRenderer::new(OutputFormat::Eps)),
        );
        let h = Harness::new(Some((set, raster)));

        let result = h.executor.execute(WorkItem::Chunk(h.items().remove(0)));
        assert_eq!(result.attempts, 1);
        // UPC and EAN raster for two codes.
        assert_eq!(h.raster.calls.load(Ordering::SeqCst), 4);
        assert_eq!(h.store.get("j1").unwrap().unwrap().failed_chunks, 1);
    }

    #[test]
    fn test_finalize_item_while_locked() {
        let h = Harness::new(None);
        let _held = crate::lock::LeaseGuard::try_acquire(
            h.lock.clone(),
            "finalize-j1",
            Duration::from_secs(60),
        )
        .unwrap()
        .unwrap();

        let result = h.executor.execute(WorkItem::finalize("j1"));
        assert!(matches!(
            result.outcome,
            WorkOutcome::Finalized(FinalizeOutcome::AlreadyRunning)
        ));
    }

    #[test]
    fn test_unknown_job_finalize_is_not_retried() {
        let h = Harness::new(None);
        let result = h.executor.execute(WorkItem::finalize("missing"));
        assert_eq!(result.attempts, 1);
        assert!(matches!(result.outcome, WorkOutcome::Failed { .. }));
    }

    #[test]
    fn test_missing_root_finalize_retries_then_fails() {
        let h = Harness::new(None);
        std::fs::remove_dir_all(&h.root).unwrap();
        let result = h.executor.execute(WorkItem::finalize("j1"));
        assert_eq!(result.attempts, 2);
        assert!(!result.success());
    }
}
