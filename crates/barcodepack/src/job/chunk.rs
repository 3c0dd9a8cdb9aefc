use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{BarcodePackError, RenderError, StoreError, WorkerError};
use crate::job::partition::ChunkWorkItem;
use crate::progress::{reconcile, PackageEvent, ProgressAggregator, ProgressReporter};
use crate::render::{artifact_path, format_dir, RendererSet};
use crate::storage::ensure_directory;
use crate::store::StatusStore;
use crate::symbology::{CodePair, Symbology};

/// Outcome of rendering one chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChunkReport {
    /// Artifacts written by this run.
    pub rendered: u64,
    /// Artifacts that already existed.
    pub skipped: u64,
    /// Codes with at least one artifact that could not be produced.
    pub failures: u64,
}

/// Job counters right after a chunk was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCompletion {
    /// False when this chunk index had already been recorded.
    pub first: bool,
    pub done: u64,
    pub total: u64,
}

impl ChunkCompletion {
    /// Whether this completion finished the job's last outstanding chunk.
    pub fn completes_job(&self) -> bool {
        self.first && self.total > 0 && self.done >= self.total
    }
}

/// Renders every code of a chunk and records the chunk exactly once.
pub struct ChunkWorker {
    renderers: RendererSet,
    make_ean13: bool,
    store: Arc<dyn StatusStore>,
    aggregator: Arc<dyn ProgressAggregator>,
    reporter: Arc<dyn ProgressReporter>,
}

impl ChunkWorker {
    pub fn new(
        renderers: RendererSet,
        make_ean13: bool,
        store: Arc<dyn StatusStore>,
        aggregator: Arc<dyn ProgressAggregator>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            renderers,
            make_ean13,
            store,
            aggregator,
            reporter,
        }
    }

    fn symbologies(&self) -> &'static [Symbology] {
        if self.make_ean13 {
            &Symbology::ALL
        } else {
            &[Symbology::UpcA]
        }
    }

    /// Renders all artifacts of the chunk, skipping those already on disk.
    ///
    /// Per-code failures are counted; failing to prepare the output
    /// directories aborts the chunk.
    pub fn render_chunk(&self, item: &ChunkWorkItem) -> Result<ChunkReport, RenderError> {
        let formats = item.formats.render_formats();
        for &symbology in self.symbologies() {
            for &format in &formats {
                ensure_directory(&format_dir(&item.output_root, symbology, format))?;
            }
        }

        let mut report = ChunkReport::default();
        for base in item.range().bases() {
            let base = base.to_string();
            let pair = match CodePair::from_base(&base) {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(base = %base, error = %e, "Skipping invalid base");
                    report.failures += 1;
                    continue;
                }
            };

            let mut failed = false;
            for &symbology in self.symbologies() {
                let code = pair.code(symbology);
                for &format in &formats {
                    let dest = artifact_path(&item.output_root, symbology, format, code);
                    if dest.exists() {
                        report.skipped += 1;
                        continue;
                    }
                    match self.renderers.get(format).render(code, &dest) {
                        Ok(()) => report.rendered += 1,
                        Err(e) => {
                            tracing::warn!(
                                code = %code,
                                path = %dest.display(),
                                error = %e,
                                "Failed to render artifact"
                            );
                            failed = true;
                        }
                    }
                }
            }
            if failed {
                report.failures += 1;
            }
        }
        Ok(report)
    }

    /// Records the chunk in durable status and, on its first completion
    /// only, bumps the fast counters.
    pub fn complete(
        &self,
        item: &ChunkWorkItem,
        failures: u64,
    ) -> Result<ChunkCompletion, StoreError> {
        let first = self
            .store
            .record_chunk(&item.job_id, item.chunk_index, failures)?;

        let completion = if first {
            if failures > 0 {
                self.aggregator.add_failed(&item.job_id, failures);
            }
            let done = self.aggregator.increment_done(&item.job_id);
            let total = match self.aggregator.read(&item.job_id) {
                Some(snapshot) if snapshot.total > 0 => snapshot.total,
                _ => self
                    .store
                    .get(&item.job_id)?
                    .map(|s| s.total_chunks)
                    .unwrap_or_default(),
            };
            ChunkCompletion { first, done, total }
        } else {
            tracing::debug!(
                job_id = %item.job_id,
                chunk_index = item.chunk_index,
                "Chunk redelivered, counters unchanged"
            );
            let durable = self
                .store
                .get(&item.job_id)?
                .ok_or_else(|| StoreError::NotFound(item.job_id.clone()))?;
            let snapshot = reconcile(
                self.aggregator.read(&item.job_id),
                durable.completed_chunks,
                durable.total_chunks,
                durable.failed_chunks,
            );
            ChunkCompletion {
                first,
                done: snapshot.done,
                total: snapshot.total,
            }
        };

        if first {
            self.reporter.report(PackageEvent::ChunkCompleted {
                job_id: item.job_id.clone(),
                chunk_index: item.chunk_index,
                failures,
                done: completion.done,
                total: completion.total,
            });
        }
        Ok(completion)
    }

    /// Renders and records one chunk.
    ///
    /// When rendering takes longer than `budget` the chunk is not recorded
    /// and the overrun is returned as an error, so the attempt can be retried.
    pub fn run(
        &self,
        item: &ChunkWorkItem,
        budget: Option<Duration>,
    ) -> Result<(ChunkReport, ChunkCompletion), BarcodePackError> {
        let span = tracing::info_span!(
            "chunk",
            job_id = %item.job_id,
            chunk_index = item.chunk_index
        );
        let _enter = span.enter();

        let started = Instant::now();
        let report = self.render_chunk(item)?;
        let elapsed = started.elapsed();
        if budget.is_some_and(|b| elapsed > b) {
            return Err(WorkerError::BudgetExceeded {
                job_id: item.job_id.clone(),
                chunk_index: item.chunk_index,
                elapsed_ms: elapsed.as_millis(),
            }
            .into());
        }

        let completion = self.complete(item, report.failures)?;
        tracing::info!(
            rendered = report.rendered,
            skipped = report.skipped,
            failures = report.failures,
            done = completion.done,
            total = completion.total,
            elapsed_ms = elapsed.as_millis() as u64,
            "Chunk finished"
        );
        Ok((report, completion))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, Ordering};

    use tempfile::TempDir;

    use crate::job::{BaseCode, FormatSet};
    use crate::progress::{MemoryProgress, NoopProgress};
    use crate::render::{OutputFormat, Renderer};
    use crate::store::tests::sample_status;
    use crate::store::MemoryStatusStore;

    /// Writes the code as the artifact body and counts calls.
    pub(crate) struct StubRenderer {
        pub format: OutputFormat,
        pub calls: AtomicU64,
        pub fail_code: Option<String>,
    }

    impl StubRenderer {
        pub(crate) fn new(format: OutputFormat) -> Self {
            Self {
                format,
                calls: AtomicU64::new(0),
                fail_code: None,
            }
        }
    }

    impl Renderer for StubRenderer {
        fn format(&self) -> OutputFormat {
            self.format
        }

        fn render(&self, code: &str, dest: &Path) -> Result<(), RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_code.as_deref() == Some(code) {
                return Err(RenderError::Encode {
                    code: code.to_string(),
                    reason: "stub failure".to_string(),
                });
            }
            crate::storage::write_atomic(dest, code.as_bytes())?;
            Ok(())
        }
    }

    pub(crate) fn stub_renderers() -> (RendererSet, Arc<StubRenderer>) {
        let raster = Arc::new(StubRenderer::new(OutputFormat::Jpg));
        let set = RendererSet::new(
            raster.clone(),
            Arc::new(StubRenderer::new(OutputFormat::Pdf)),
            Arc::new(StubRenderer::new(OutputFormat::Eps)),
        );
        (set, raster)
    }

    fn item(root: &Path, index: u64, start: u64, end: u64) -> ChunkWorkItem {
        ChunkWorkItem {
            job_id: "j1".to_string(),
            order_id: "A100".to_string(),
            output_root: root.to_path_buf(),
            chunk_index: index,
            start: BaseCode::from_u64(start).unwrap(),
            end: BaseCode::from_u64(end).unwrap(),
            formats: FormatSet::raster_only(),
        }
    }

    struct Fixture {
        worker: ChunkWorker,
        raster: Arc<StubRenderer>,
        store: Arc<MemoryStatusStore>,
        aggregator: Arc<MemoryProgress>,
    }

    fn fixture(renderers: Option<(RendererSet, Arc<StubRenderer>)>, total: u64) -> Fixture {
        let (renderers, raster) = renderers.unwrap_or_else(stub_renderers);
        let store = Arc::new(MemoryStatusStore::new());
        store.create(&sample_status("j1", "A100")).unwrap();
        store.set_total_chunks("j1", total).unwrap();
        let aggregator = Arc::new(MemoryProgress::new());
        aggregator.set_total("j1", total);
        let worker = ChunkWorker::new(
            renderers,
            true,
            store.clone(),
            aggregator.clone(),
            Arc::new(NoopProgress),
        );
        Fixture {
            worker,
            raster,
            store,
            aggregator,
        }
    }

    #[test]
    fn test_render_chunk_writes_both_symbologies() {
        let dir = TempDir::new().unwrap();
        let f = fixture(None, 1);
        let report = f.worker.render_chunk(&item(dir.path(), 0, 1, 2)).unwrap();
        assert_eq!(report.rendered, 4);
        assert_eq!(report.failures, 0);
        assert!(dir.path().join("UPC-12/JPG/UPC-12-000000000017.jpg").exists());
        assert!(dir.path().join("EAN-13/JPG/EAN-13-0000000000017.jpg").exists());
    }

    #[test]
    fn test_existing_artifacts_are_skipped() {
        let dir = TempDir::new().unwrap();
        let f = fixture(None, 1);
        let chunk = item(dir.path(), 0, 1, 3);
        f.worker.render_chunk(&chunk).unwrap();
        let report = f.worker.render_chunk(&chunk).unwrap();
        assert_eq!(report.rendered, 0);
        assert_eq!(report.skipped, 6);
        assert_eq!(f.raster.calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_per_code_failures_do_not_abort() {
        let dir = TempDir::new().unwrap();
        let mut raster = StubRenderer::new(OutputFormat::Jpg);
        raster.fail_code = Some("000000000024".to_string());
        let raster = Arc::new(raster);
        let set = RendererSet::new(
            raster.clone(),
            Arc::new(StubRenderer::new(OutputFormat::Pdf)),
            Arc::new(StubRenderer::new(OutputFormat::Eps)),
        );
        let f = fixture(Some((set, raster)), 1);

        let report = f.worker.render_chunk(&item(dir.path(), 0, 1, 3)).unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(report.rendered, 5);
    }

    #[test]
    fn test_unpreparable_root_propagates() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let f = fixture(None, 1);
        let result = f.worker.render_chunk(&item(&blocker, 0, 1, 1));
        assert!(matches!(result, Err(RenderError::Storage(_))));
    }

    #[test]
    fn test_redelivery_counts_once() {
        let dir = TempDir::new().unwrap();
        let f = fixture(None, 2);
        let chunk = item(dir.path(), 0, 1, 2);

        let (_, first) = f.worker.run(&chunk, None).unwrap();
        assert!(first.first);
        assert!(!first.completes_job());

        let (_, again) = f.worker.run(&chunk, None).unwrap();
        assert!(!again.first);
        assert_eq!(again.done, 1);

        let (_, last) = f.worker.run(&item(dir.path(), 1, 3, 3), None).unwrap();
        assert!(last.completes_job());

        assert_eq!(f.aggregator.read("j1").unwrap().done, 2);
        assert_eq!(f.store.get("j1").unwrap().unwrap().completed_chunks, 2);
    }

    #[test]
    fn test_last_chunk_completes_after_early_package() {
        let dir = TempDir::new().unwrap();
        let f = fixture(None, 3);
        f.worker.run(&item(dir.path(), 0, 1, 1), None).unwrap();
        // A watchdog finalize packaged the job before the rest arrived.
        f.aggregator.mark_complete("j1");

        let (_, second) = f.worker.run(&item(dir.path(), 1, 2, 2), None).unwrap();
        assert_eq!(second.done, 2);
        assert!(!second.completes_job());

        let (_, last) = f.worker.run(&item(dir.path(), 2, 3, 3), None).unwrap();
        assert_eq!((last.done, last.total), (3, 3));
        assert!(last.completes_job());
        assert_eq!(f.aggregator.read("j1").unwrap().done, 3);
    }

    #[test]
    fn test_budget_overrun_leaves_chunk_unrecorded() {
        let dir = TempDir::new().unwrap();
        let f = fixture(None, 1);
        let result = f.worker.run(&item(dir.path(), 0, 1, 2), Some(Duration::ZERO));
        assert!(matches!(
            result,
            Err(BarcodePackError::Worker(WorkerError::BudgetExceeded { chunk_index: 0, .. }))
        ));
        assert_eq!(f.store.get("j1").unwrap().unwrap().completed_chunks, 0);
        assert_eq!(f.aggregator.read("j1").unwrap().done, 0);
    }

    #[test]
    fn test_failures_reach_both_counters() {
        let dir = TempDir::new().unwrap();
        let f = fixture(None, 1);
        f.worker.complete(&item(dir.path(), 0, 1, 5), 5).unwrap();
        assert_eq!(f.aggregator.read("j1").unwrap().failed, 5);
        assert_eq!(f.store.get("j1").unwrap().unwrap().failed_chunks, 5);
    }

    #[test]
    fn test_upc_only() {
        let dir = TempDir::new().unwrap();
        let (set, _) = stub_renderers();
        let worker = ChunkWorker::new(
            set,
            false,
            Arc::new(MemoryStatusStore::new()),
            Arc::new(MemoryProgress::new()),
            Arc::new(NoopProgress),
        );
        let report = worker.render_chunk(&item(dir.path(), 0, 1, 2)).unwrap();
        assert_eq!(report.rendered, 2);
        assert!(!dir.path().join("EAN-13").exists());
    }
}
