//! Backup completion detector.
//!
//! The worker that finishes a job's last chunk normally triggers finalize.
//! The watchdog polls the job's counters at a fixed interval so a lost
//! trigger still ends in a package.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::config::WatchdogConfig;
use crate::error::{StoreError, WorkerError};
use crate::progress::{reconcile, ProgressAggregator};
use crate::store::StatusStore;

/// Something that can queue a finalize for a job.
pub trait FinalizeDispatch: Send + Sync {
    fn dispatch_finalize(&self, job_id: &str) -> Result<(), WorkerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Polling,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogSettings {
    pub interval: Duration,
    pub max_lifetime: Duration,
}

impl WatchdogSettings {
    pub fn from_config(config: &WatchdogConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            max_lifetime: Duration::from_secs(config.max_lifetime_secs),
        }
    }
}

pub struct Watchdog {
    job_id: String,
    store: Arc<dyn StatusStore>,
    aggregator: Arc<dyn ProgressAggregator>,
    dispatcher: Arc<dyn FinalizeDispatch>,
    settings: WatchdogSettings,
}

impl Watchdog {
    pub fn new(
        job_id: impl Into<String>,
        store: Arc<dyn StatusStore>,
        aggregator: Arc<dyn ProgressAggregator>,
        dispatcher: Arc<dyn FinalizeDispatch>,
        settings: WatchdogSettings,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            store,
            aggregator,
            dispatcher,
            settings,
        }
    }

    /// One check of the job. Dispatches finalize at most once, on the poll
    /// that first sees every chunk done.
    pub fn poll_once(&self) -> Result<WatchState, StoreError> {
        let Some(status) = self.store.get(&self.job_id)? else {
            log::warn!("Watchdog: job {} no longer exists", self.job_id);
            return Ok(WatchState::Terminal);
        };

        if status.archive_destination().exists() {
            log::debug!("Watchdog: job {} already packaged", self.job_id);
            return Ok(WatchState::Terminal);
        }

        let progress = reconcile(
            self.aggregator.read(&self.job_id),
            status.completed_chunks,
            status.total_chunks,
            status.failed_chunks,
        );
        log::debug!(
            "Watchdog: job {} at {}/{} chunks",
            self.job_id,
            progress.done,
            progress.total
        );

        if progress.is_complete() {
            log::info!(
                "Watchdog: all chunks of job {} done, dispatching finalize",
                self.job_id
            );
            if let Err(e) = self.dispatcher.dispatch_finalize(&self.job_id) {
                log::error!("Watchdog: failed to dispatch finalize for {}: {}", self.job_id, e);
            }
            return Ok(WatchState::Terminal);
        }

        Ok(WatchState::Polling)
    }

    /// Polls until terminal, stopped, or out of lifetime. The first poll
    /// happens one interval after start.
    pub fn run(&self, stop: &Receiver<()>) -> WatchState {
        let started = Instant::now();
        loop {
            match stop.recv_timeout(self.settings.interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    log::debug!("Watchdog for job {} stopped", self.job_id);
                    return WatchState::Polling;
                }
            }

            match self.poll_once() {
                Ok(WatchState::Terminal) => return WatchState::Terminal,
                Ok(WatchState::Polling) => {}
                Err(e) => log::warn!("Watchdog: status read for {} failed: {}", self.job_id, e),
            }

            if started.elapsed() >= self.settings.max_lifetime {
                log::warn!(
                    "Watchdog: giving up on job {} after {:?}",
                    self.job_id,
                    self.settings.max_lifetime
                );
                return WatchState::Polling;
            }
        }
    }

    /// Runs the watchdog on its own thread.
    pub fn spawn(self) -> std::io::Result<WatchdogHandle> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let name = format!("watchdog-{}", self.job_id.chars().take(8).collect::<String>());
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || self.run(&stop_rx))?;
        Ok(WatchdogHandle {
            stop: stop_tx,
            handle,
        })
    }
}

pub struct WatchdogHandle {
    stop: Sender<()>,
    handle: JoinHandle<WatchState>,
}

impl WatchdogHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the watchdog if still running and returns its final state.
    pub fn stop(self) -> WatchState {
        let _ = self.stop.try_send(());
        match self.handle.join() {
            Ok(state) => state,
            Err(_) => {
                log::error!("Watchdog thread panicked");
                WatchState::Polling
            }
        }
    }
}
