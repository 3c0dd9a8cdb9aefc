use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::JobSpecError;
use crate::job::spec::{BaseCode, FormatSet};

/// One contiguous sub-range of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: u64,
    pub start: BaseCode,
    pub end: BaseCode,
}

impl ChunkRange {
    pub fn code_count(&self) -> u64 {
        self.end.value() - self.start.value() + 1
    }

    pub fn bases(&self) -> impl Iterator<Item = BaseCode> {
        let start = self.start;
        (0..self.code_count()).filter_map(move |i| start.offset(i))
    }
}

/// A unit of work for one chunk worker invocation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkWorkItem {
    pub job_id: String,
    pub order_id: String,
    pub output_root: PathBuf,
    pub chunk_index: u64,
    pub start: BaseCode,
    pub end: BaseCode,
    pub formats: FormatSet,
}

impl ChunkWorkItem {
    pub fn range(&self) -> ChunkRange {
        ChunkRange {
            index: self.chunk_index,
            start: self.start,
            end: self.end,
        }
    }
}

pub fn chunk_count(start: BaseCode, end: BaseCode, chunk_size: u64) -> u64 {
    if chunk_size == 0 || start > end {
        return 0;
    }
    (end.value() - start.value() + 1).div_ceil(chunk_size)
}

/// Splits `[start, end]` into consecutive ranges of at most `chunk_size` codes.
///
/// The ranges are produced lazily, so a job spanning the whole code space
/// costs nothing up front.
pub fn partition(
    start: BaseCode,
    end: BaseCode,
    chunk_size: u64,
) -> Result<ChunkRanges, JobSpecError> {
    if chunk_size == 0 {
        return Err(JobSpecError::ZeroChunkSize);
    }
    if start > end {
        return Err(JobSpecError::RangeOrder {
            start: start.to_string(),
            end: end.to_string(),
        });
    }
    Ok(ChunkRanges {
        cursor: Some(start.value()),
        end: end.value(),
        chunk_size,
        index: 0,
    })
}

/// Iterator over the chunks of a validated range, in index order.
#[derive(Debug, Clone)]
pub struct ChunkRanges {
    cursor: Option<u64>,
    end: u64,
    chunk_size: u64,
    index: u64,
}

impl ChunkRanges {
    /// Chunks not yet yielded.
    pub fn remaining(&self) -> u64 {
        self.cursor
            .map_or(0, |c| (self.end - c + 1).div_ceil(self.chunk_size))
    }
}

impl Iterator for ChunkRanges {
    type Item = ChunkRange;

    fn next(&mut self) -> Option<ChunkRange> {
        let cursor = self.cursor?;
        let last = cursor.saturating_add(self.chunk_size - 1).min(self.end);
        self.cursor = (last < self.end).then(|| last + 1);
        // Both bounds lie within a validated range, so they are valid bases.
        let range = ChunkRange {
            index: self.index,
            start: BaseCode::from_u64(cursor)?,
            end: BaseCode::from_u64(last)?,
        };
        self.index += 1;
        Some(range)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match usize::try_from(self.remaining()) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}
