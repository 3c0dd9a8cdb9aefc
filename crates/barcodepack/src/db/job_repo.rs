//! Job repository: rows of the `jobs` and `chunk_completions` tables.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub order_id: String,
    pub output_root: String,
    pub start_base: Option<String>,
    pub end_base: Option<String>,
    /// JSON-encoded format selection.
    pub formats: String,
    pub callback_url: Option<String>,
    pub callback_token: Option<String>,
    pub total_chunks: u64,
    pub completed_chunks: u64,
    pub failed_chunks: u64,
    pub archive_path: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            order_id: row.get("order_id")?,
            output_root: row.get("output_root")?,
            start_base: row.get("start_base")?,
            end_base: row.get("end_base")?,
            formats: row.get("formats")?,
            callback_url: row.get("callback_url")?,
            callback_token: row.get("callback_token")?,
            total_chunks: row.get("total_chunks")?,
            completed_chunks: row.get("completed_chunks")?,
            failed_chunks: row.get("failed_chunks")?,
            archive_path: row.get("archive_path")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
        })
    }
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, order_id, output_root, start_base, end_base, formats,
             callback_url, callback_token, total_chunks, completed_chunks, failed_chunks,
             archive_path, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                job.id,
                job.order_id,
                job.output_root,
                job.start_base,
                job.end_base,
                job.formats,
                job.callback_url,
                job.callback_token,
                job.total_chunks,
                job.completed_chunks,
                job.failed_chunks,
                job.archive_path,
                job.started_at,
                job.finished_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// All jobs for an order, oldest first.
pub fn find_by_order(db: &Database, order_id: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM jobs WHERE order_id = ?1 ORDER BY started_at ASC, id ASC")?;
        let rows = stmt
            .query_map(params![order_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Sets the planned chunk count. Returns false if the job does not exist.
pub fn set_total_chunks(db: &Database, id: &str, total: u64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET total_chunks = ?2 WHERE id = ?1",
            params![id, total],
        )?;
        Ok(changed > 0)
    })
}

/// Records a chunk completion exactly once.
///
/// Returns `true` only for the first completion of `(job_id, chunk_index)`;
/// redelivered chunks leave the counters untouched.
pub fn record_chunk(
    db: &Database,
    job_id: &str,
    chunk_index: u64,
    failures: u64,
    completed_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO chunk_completions (job_id, chunk_index, failures, completed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![job_id, chunk_index, failures, completed_at],
        )?;
        if inserted > 0 {
            tx.execute(
                "UPDATE jobs SET completed_chunks = completed_chunks + 1,
                 failed_chunks = failed_chunks + ?2 WHERE id = ?1",
                params![job_id, failures],
            )?;
        }
        tx.commit()?;
        Ok(inserted > 0)
    })
}

/// Stamps the archive location and completion time.
pub fn mark_finished(
    db: &Database,
    id: &str,
    archive_path: &str,
    finished_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET archive_path = ?2, finished_at = ?3 WHERE id = ?1",
            params![id, archive_path, finished_at],
        )?;
        Ok(changed > 0)
    })
}

/// Deletes a job and its chunk completions.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}
