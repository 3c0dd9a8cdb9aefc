use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::db::{job_repo, job_repo::JobRow, Database, DatabaseError};
use crate::error::StoreError;
use crate::job::{BaseCode, CallbackTarget, FormatSet};
use crate::store::{JobStatus, StatusStore};

/// Status store on the SQLite database.
#[derive(Clone)]
pub struct SqliteStatusStore {
    db: Database,
}

impl SqliteStatusStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn require(&self, job_id: &str) -> Result<(), StoreError> {
        match job_repo::find_by_id(&self.db, job_id)? {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(job_id.to_string())),
        }
    }
}

fn to_row(status: &JobStatus) -> Result<JobRow, DatabaseError> {
    let formats = serde_json::to_string(&status.formats).map_err(|e| DatabaseError::Corrupt {
        column: "formats",
        reason: e.to_string(),
    })?;
    Ok(JobRow {
        id: status.job_id.clone(),
        order_id: status.order_id.clone(),
        output_root: status.output_root.to_string_lossy().into_owned(),
        start_base: status.start.map(|b| b.to_string()),
        end_base: status.end.map(|b| b.to_string()),
        formats,
        callback_url: status.callback.as_ref().map(|c| c.url.clone()),
        callback_token: status.callback.as_ref().and_then(|c| c.token.clone()),
        total_chunks: status.total_chunks,
        completed_chunks: status.completed_chunks,
        failed_chunks: status.failed_chunks,
        archive_path: status
            .archive_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned()),
        started_at: status.started_at.to_rfc3339(),
        finished_at: status.finished_at.map(|t| t.to_rfc3339()),
    })
}

fn parse_time(column: &'static str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Corrupt {
            column,
            reason: e.to_string(),
        })
}

fn parse_base(column: &'static str, value: Option<&str>) -> Result<Option<BaseCode>, DatabaseError> {
    value
        .map(|v| {
            BaseCode::parse(v).ok_or_else(|| DatabaseError::Corrupt {
                column,
                reason: format!("'{}' is not an 11-digit base", v),
            })
        })
        .transpose()
}

fn from_row(row: JobRow) -> Result<JobStatus, DatabaseError> {
    let formats: FormatSet =
        serde_json::from_str(&row.formats).map_err(|e| DatabaseError::Corrupt {
            column: "formats",
            reason: e.to_string(),
        })?;
    let finished_at = row
        .finished_at
        .as_deref()
        .map(|t| parse_time("finished_at", t))
        .transpose()?;
    Ok(JobStatus {
        start: parse_base("start_base", row.start_base.as_deref())?,
        end: parse_base("end_base", row.end_base.as_deref())?,
        formats,
        callback: row.callback_url.map(|url| CallbackTarget {
            url,
            token: row.callback_token,
        }),
        started_at: parse_time("started_at", &row.started_at)?,
        finished_at,
        archive_path: row.archive_path.map(PathBuf::from),
        output_root: PathBuf::from(row.output_root),
        job_id: row.id,
        order_id: row.order_id,
        total_chunks: row.total_chunks,
        completed_chunks: row.completed_chunks,
        failed_chunks: row.failed_chunks,
    })
}

impl StatusStore for SqliteStatusStore {
    fn create(&self, status: &JobStatus) -> Result<(), StoreError> {
        if job_repo::find_by_id(&self.db, &status.job_id)?.is_some() {
            return Err(StoreError::Duplicate(status.job_id.clone()));
        }
        job_repo::insert(&self.db, &to_row(status)?)?;
        Ok(())
    }

    fn get(&self, job_id: &str) -> Result<Option<JobStatus>, StoreError> {
        match job_repo::find_by_id(&self.db, job_id)? {
            Some(row) => Ok(Some(from_row(row)?)),
            None => Ok(None),
        }
    }

    fn set_total_chunks(&self, job_id: &str, total: u64) -> Result<(), StoreError> {
        if job_repo::set_total_chunks(&self.db, job_id, total)? {
            Ok(())
        } else {
            Err(StoreError::NotFound(job_id.to_string()))
        }
    }

    fn record_chunk(
        &self,
        job_id: &str,
        chunk_index: u64,
        failures: u64,
    ) -> Result<bool, StoreError> {
        self.require(job_id)?;
        let first = job_repo::record_chunk(
            &self.db,
            job_id,
            chunk_index,
            failures,
            &Utc::now().to_rfc3339(),
        )?;
        if !first {
            log::debug!(
                "Chunk {} of job {} was already recorded",
                chunk_index,
                job_id
            );
        }
        Ok(first)
    }

    fn mark_finished(
        &self,
        job_id: &str,
        archive_path: &Path,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated = job_repo::mark_finished(
            &self.db,
            job_id,
            &archive_path.to_string_lossy(),
            &finished_at.to_rfc3339(),
        )?;
        if updated {
            Ok(())
        } else {
            Err(StoreError::NotFound(job_id.to_string()))
        }
    }

    fn find_by_order(&self, order_id: &str) -> Result<Vec<JobStatus>, StoreError> {
        let rows = job_repo::find_by_order(&self.db, order_id)?;
        let statuses = rows
            .into_iter()
            .map(from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(statuses)
    }

    fn delete(&self, job_id: &str) -> Result<bool, StoreError> {
        Ok(job_repo::delete(&self.db, job_id)?)
    }
}
