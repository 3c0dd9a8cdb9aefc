//! Job intake, range partitioning and per-chunk rendering.

pub mod chunk;
pub mod partition;
pub mod spec;

pub use chunk::{ChunkCompletion, ChunkReport, ChunkWorker};
pub use partition::{chunk_count, partition, ChunkRange, ChunkRanges, ChunkWorkItem};
pub use spec::{BaseCode, CallbackTarget, FormatSet, JobRequest, JobSpec};
