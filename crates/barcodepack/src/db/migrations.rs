//! Versioned status schema.
//!
//! Each step runs in its own transaction together with its row in
//! `schema_steps`, so a crash never leaves a half-applied step behind.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

struct Step {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const STEPS: &[Step] = &[
    Step {
        version: 1,
        name: "jobs",
        sql: include_str!("sql/001_create_jobs.sql"),
    },
    Step {
        version: 2,
        name: "chunk_completions",
        sql: include_str!("sql/002_create_chunk_completions.sql"),
    },
];

/// Highest schema version this build knows.
pub const LATEST: u32 = 2;

/// Highest applied step, or 0 on a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_steps",
        [],
        |r| r.get(0),
    )?)
}

/// Applies every pending step and returns how many ran.
pub fn migrate(conn: &mut Connection) -> Result<usize, DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_steps (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let found = schema_version(conn)?;
    if found > LATEST {
        return Err(DatabaseError::SchemaTooNew {
            found,
            supported: LATEST,
        });
    }

    let mut applied = 0;
    for step in STEPS.iter().filter(|s| s.version > found) {
        let failed = |source| DatabaseError::Migration {
            version: step.version,
            name: step.name,
            source,
        };
        let tx = conn.transaction().map_err(failed)?;
        tx.execute_batch(step.sql).map_err(failed)?;
        tx.execute(
            "INSERT INTO schema_steps (version, name) VALUES (?1, ?2)",
            params![step.version, step.name],
        )
        .map_err(failed)?;
        tx.commit().map_err(failed)?;
        log::info!("Status schema now at v{} ({})", step.version, step.name);
        applied += 1;
    }
    Ok(applied)
}
