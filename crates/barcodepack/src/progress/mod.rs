//! Per-job progress counters shared by concurrent chunk workers.

pub mod events;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;

pub use events::{BroadcastProgress, NoopProgress, PackageEvent, ProgressReporter};

/// Point-in-time view of a job's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub done: u64,
    pub total: u64,
    pub failed: u64,
}

impl ProgressSnapshot {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.done >= self.total
    }

    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.done.min(self.total) as f64 * 100.0 / self.total as f64 * 10.0).round() / 10.0
    }
}

/// Fast, concurrency-safe job counters.
///
/// Increments are atomic on the implementation side; callers never
/// read-modify-write.
pub trait ProgressAggregator: Send + Sync {
    fn set_total(&self, job_id: &str, total: u64);

    /// Adds one completed chunk and returns the new `done` count.
    fn increment_done(&self, job_id: &str) -> u64;

    /// Adds `n` failures and returns the new failure count.
    fn add_failed(&self, job_id: &str, n: u64) -> u64;

    fn read(&self, job_id: &str) -> Option<ProgressSnapshot>;

    /// Flags the job as packaged; reads report `done` as at least `total`
    /// from then on while the chunk count itself is left alone.
    fn mark_complete(&self, job_id: &str);

    fn forget(&self, job_id: &str);
}

#[derive(Default)]
struct Counters {
    done: AtomicU64,
    total: AtomicU64,
    failed: AtomicU64,
    complete: AtomicBool,
}

/// In-process aggregator backed by atomics.
#[derive(Default)]
pub struct MemoryProgress {
    jobs: RwLock<HashMap<String, Arc<Counters>>>,
}

impl MemoryProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, job_id: &str) -> Arc<Counters> {
        if let Ok(jobs) = self.jobs.read() {
            if let Some(c) = jobs.get(job_id) {
                return Arc::clone(c);
            }
        }
        match self.jobs.write() {
            Ok(mut jobs) => Arc::clone(jobs.entry(job_id.to_string()).or_default()),
            Err(poisoned) => {
                let mut jobs = poisoned.into_inner();
                Arc::clone(jobs.entry(job_id.to_string()).or_default())
            }
        }
    }
}

impl ProgressAggregator for MemoryProgress {
    fn set_total(&self, job_id: &str, total: u64) {
        self.counters(job_id).total.store(total, Ordering::SeqCst);
    }

    fn increment_done(&self, job_id: &str) -> u64 {
        self.counters(job_id).done.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn add_failed(&self, job_id: &str, n: u64) -> u64 {
        self.counters(job_id).failed.fetch_add(n, Ordering::SeqCst) + n
    }

    fn read(&self, job_id: &str) -> Option<ProgressSnapshot> {
        let jobs = self.jobs.read().ok()?;
        jobs.get(job_id).map(|c| {
            let done = c.done.load(Ordering::SeqCst);
            let total = c.total.load(Ordering::SeqCst);
            ProgressSnapshot {
                done: if c.complete.load(Ordering::SeqCst) {
                    done.max(total)
                } else {
                    done
                },
                total,
                failed: c.failed.load(Ordering::SeqCst),
            }
        })
    }

    fn mark_complete(&self, job_id: &str) {
        self.counters(job_id).complete.store(true, Ordering::SeqCst);
    }

    fn forget(&self, job_id: &str) {
        if let Ok(mut jobs) = self.jobs.write() {
            jobs.remove(job_id);
        }
    }
}

/// Merges the fast counters with the durable status.
///
/// The larger `done` wins; a missing or zero cache total falls back to the
/// durable total.
pub fn reconcile(
    cached: Option<ProgressSnapshot>,
    durable_done: u64,
    durable_total: u64,
    durable_failed: u64,
) -> ProgressSnapshot {
    let cached = cached.unwrap_or_default();
    ProgressSnapshot {
        done: cached.done.max(durable_done),
        total: if cached.total > 0 {
            cached.total
        } else {
            durable_total
        },
        failed: cached.failed.max(durable_failed),
    }
}
