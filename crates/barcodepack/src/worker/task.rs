use crate::finalize::FinalizeOutcome;
use crate::job::{ChunkCompletion, ChunkReport, ChunkWorkItem};

/// A message consumed by the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    Chunk(ChunkWorkItem),
    Finalize { job_id: String },
}

impl WorkItem {
    pub fn finalize(job_id: impl Into<String>) -> Self {
        WorkItem::Finalize {
            job_id: job_id.into(),
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            WorkItem::Chunk(item) => &item.job_id,
            WorkItem::Finalize { job_id } => job_id,
        }
    }

    pub fn chunk_index(&self) -> Option<u64> {
        match self {
            WorkItem::Chunk(item) => Some(item.chunk_index),
            WorkItem::Finalize { .. } => None,
        }
    }
}

#[derive(Debug)]
pub enum WorkOutcome {
    /// The chunk rendered and was recorded. `finalize` is set when this
    /// chunk was the job's last and the package step ran inline.
    Chunk {
        report: ChunkReport,
        completion: ChunkCompletion,
        finalize: Option<FinalizeOutcome>,
    },
    /// Every attempt failed; the chunk was recorded with all its codes
    /// counted as failures.
    Exhausted {
        completion: ChunkCompletion,
        finalize: Option<FinalizeOutcome>,
        error: String,
    },
    Finalized(FinalizeOutcome),
    Failed { error: String },
}

#[derive(Debug)]
pub struct WorkResult {
    pub job_id: String,
    pub chunk_index: Option<u64>,
    pub attempts: u32,
    pub outcome: WorkOutcome,
}

impl WorkResult {
    pub fn success(&self) -> bool {
        matches!(
            self.outcome,
            WorkOutcome::Chunk { .. } | WorkOutcome::Finalized(_)
        )
    }

    /// The finalize outcome produced by this item, inline or explicit.
    pub fn finalize_outcome(&self) -> Option<&FinalizeOutcome> {
        match &self.outcome {
            WorkOutcome::Chunk { finalize, .. } | WorkOutcome::Exhausted { finalize, .. } => {
                finalize.as_ref()
            }
            WorkOutcome::Finalized(outcome) => Some(outcome),
            WorkOutcome::Failed { .. } => None,
        }
    }
}
