//! Database migrations
//!
//! Idempotent schema migrations for the embedded store (§4.3a), mirroring
//! the `CREATE TABLE IF NOT EXISTS` + `schema_migrations` version-tracking
//! shape, rewritten for the `jobs`/`runs`/`extensions` schema of §6.

use rusqlite::Connection;
use crate::DbResult;

/// Migration version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> DbResult<()> {
    // Create migrations table if not exists
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Migration to version 1: jobs, runs, extensions, run-id counter
fn migrate_v1(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(
        "
        -- Jobs collection (§6): schedule + target + owner
        CREATE TABLE IF NOT EXISTS jobs (
            job_id INTEGER PRIMARY KEY,
            job_name TEXT,
            schedule TEXT NOT NULL,
            command TEXT NOT NULL,
            node_name TEXT NOT NULL,
            node_port INTEGER NOT NULL,
            database TEXT NOT NULL,
            user_name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        );

        -- Uniqueness on (job_name, user_name) when job_name is present.
        CREATE UNIQUE INDEX IF NOT EXISTS jobs_name_user_unique
            ON jobs (job_name, user_name)
            WHERE job_name IS NOT NULL;

        -- Extension table (§6a): per-job mode / timezone offset
        CREATE TABLE IF NOT EXISTS extensions (
            job_id INTEGER PRIMARY KEY REFERENCES jobs(job_id) ON DELETE CASCADE,
            mode TEXT NOT NULL DEFAULT 'timing',
            timezone_offset INTEGER
        );

        -- Append-only run log (§6). No job_pid column: runs execute through
        -- the Session trait, never as a forked OS process, so there is no
        -- pid to record.
        CREATE TABLE IF NOT EXISTS runs (
            run_id INTEGER PRIMARY KEY,
            job_id INTEGER NOT NULL,
            database TEXT NOT NULL,
            user_name TEXT NOT NULL,
            command TEXT NOT NULL,
            status TEXT NOT NULL,
            return_message TEXT,
            start_time TEXT,
            end_time TEXT
        );

        CREATE INDEX IF NOT EXISTS runs_job_id_idx ON runs (job_id, run_id DESC);

        -- Monotonic run-id counter (next_run_id, §4.3)
        CREATE TABLE IF NOT EXISTS run_id_counter (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            next_value INTEGER NOT NULL
        );
        INSERT OR IGNORE INTO run_id_counter (id, next_value) VALUES (1, 1);

        -- Record migration
        INSERT INTO schema_migrations (version, applied_at)
        VALUES (1, datetime('now'));
        "
    )?;

    tracing::info!("applied migration v1: jobs/runs/extensions schema");
    Ok(())
}

/// Get current schema version
pub fn current_version(conn: &Connection) -> DbResult<i32> {
    let version = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?;

    Ok(version)
}

/// Check if migrations are needed
pub fn needs_migration(conn: &Connection) -> DbResult<bool> {
    let current = current_version(conn)?;
    Ok(current < CURRENT_VERSION)
}
