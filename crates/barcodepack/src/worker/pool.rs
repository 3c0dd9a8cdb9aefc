use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::watchdog::FinalizeDispatch;
use crate::worker::executor::WorkExecutor;
use crate::worker::task::{WorkItem, WorkResult};

/// How long a dispatcher waits for queue space before giving up.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// How often an idle worker rechecks the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed set of threads draining one bounded queue of work items.
///
/// Results go out on a second bounded queue; somebody must keep reading it
/// or workers stall once it fills up.
pub struct WorkerPool {
    queue: Sender<WorkItem>,
    results: Receiver<WorkResult>,
    threads: Vec<JoinHandle<()>>,
    stopping: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` threads sharing one executor.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(executor: Arc<WorkExecutor>, worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (queue, inbox) = bounded::<WorkItem>(worker_count * 2);
        let (outbox, results) = bounded::<WorkResult>(worker_count * 2);
        let stopping = Arc::new(AtomicBool::new(false));

        let threads = (0..worker_count)
            .map(|id| {
                let worker = Worker {
                    id,
                    inbox: inbox.clone(),
                    outbox: outbox.clone(),
                    stopping: Arc::clone(&stopping),
                    executor: Arc::clone(&executor),
                };
                thread::spawn(move || worker.run())
            })
            .collect();

        info!("Worker pool up with {} threads", worker_count);
        Self {
            queue,
            results,
            threads,
            stopping,
        }
    }

    /// Queues an item, blocking while the queue is full.
    pub fn submit(&self, item: WorkItem) -> Result<(), WorkerError> {
        if self.is_shutdown() {
            return Err(WorkerError::ChannelClosed);
        }
        self.queue.send(item).map_err(|_| WorkerError::ChannelClosed)
    }

    /// A handle that lets other threads queue finalize requests.
    pub fn dispatcher(&self) -> PoolDispatcher {
        PoolDispatcher {
            queue: self.queue.clone(),
            stopping: Arc::clone(&self.stopping),
        }
    }

    /// Another receiver on the result stream, for a draining thread.
    pub fn results(&self) -> Receiver<WorkResult> {
        self.results.clone()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<WorkResult> {
        self.results.recv_timeout(timeout).ok()
    }

    /// Stops accepting items. Threads exit after their current item.
    pub fn shutdown(&self) {
        info!("Worker pool stopping");
        self.stopping.store(true, Ordering::Relaxed);
    }

    /// Closes the queue and joins every thread.
    pub fn wait(self) {
        drop(self.queue);
        let count = self.threads.len();
        for (id, handle) in self.threads.into_iter().enumerate() {
            if let Err(e) = handle.join() {
                error!("Worker {} panicked: {:?}", id, e);
            }
        }
        info!("Worker pool stopped, {} threads joined", count);
    }

    pub fn is_shutdown(&self) -> bool {
        self.stopping.load(Ordering::Relaxed)
    }
}

/// Queues `WorkItem::Finalize` on a running pool.
#[derive(Clone)]
pub struct PoolDispatcher {
    queue: Sender<WorkItem>,
    stopping: Arc<AtomicBool>,
}

impl FinalizeDispatch for PoolDispatcher {
    fn dispatch_finalize(&self, job_id: &str) -> Result<(), WorkerError> {
        if self.stopping.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }
        self.queue
            .send_timeout(WorkItem::finalize(job_id), DISPATCH_TIMEOUT)
            .map_err(|_| WorkerError::ChannelClosed)
    }
}

struct Worker {
    id: usize,
    inbox: Receiver<WorkItem>,
    outbox: Sender<WorkResult>,
    stopping: Arc<AtomicBool>,
    executor: Arc<WorkExecutor>,
}

impl Worker {
    fn run(self) {
        while !self.stopping.load(Ordering::Relaxed) {
            let item = match self.inbox.recv_timeout(POLL_INTERVAL) {
                Ok(item) => item,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            debug!(
                "Worker {} took job {} chunk {:?}",
                self.id,
                item.job_id(),
                item.chunk_index()
            );
            let result = self.executor.execute(item);
            if self.outbox.send(result).is_err() {
                error!("Worker {}: result stream closed, exiting", self.id);
                break;
            }
        }
        debug!("Worker {} exited", self.id);
    }
}
