//! Thread pool that renders chunks and runs finalize requests.

pub mod executor;
pub mod pool;
pub mod task;

pub use executor::{RetryPolicy, WorkExecutor};
pub use pool::{PoolDispatcher, WorkerPool};
pub use task::{WorkItem, WorkOutcome, WorkResult};
