//! SQLite implementation of `JobStore`.
//!
//! Grounded on the teacher's `jobqueue-db/src/sqlite.rs` for the
//! connection-wrapping and row-mapping shape (a single
//! `Arc<Mutex<Connection>>`, WAL pragmas, migrations run at construction
//! time). All SQL here is parameterized — the teacher's `search_jobs`/
//! `get_jobs_by_tag` string-interpolation pattern is not reused.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use cronq_core::job::{JobDef, JobId, JobPatch, RunId, RunPatch, RunRecord, RunStatus};
use cronq_core::store::{Identity, JobIdOrName, JobStore};
use cronq_core::{schedule, CronError, Result};

use crate::migrations::run_migrations;
use crate::DbResult;

/// SQLite-based job store.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    dirty: AtomicBool,
    /// Identities treated as privileged for the `enable_superuser_jobs`
    /// policy below (§4.3, §6a). Empty by default: nobody is privileged
    /// for the purposes of this check until configured.
    superuser_names: Vec<String>,
    /// When false, a job whose owner is in `superuser_names` is rejected on
    /// `insert_job` and skipped (with a warning) by `list_jobs`.
    enable_superuser_jobs: bool,
}

impl SqliteStore {
    pub fn new(path: impl AsRef<Path>) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> DbResult<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dirty: AtomicBool::new(true),
            superuser_names: Vec::new(),
            enable_superuser_jobs: true,
        })
    }

    /// Applies the `database.superuser_names`/`database.enable_superuser_jobs`
    /// settings (§6a) to this store's insert/list behavior.
    pub fn with_superuser_policy(mut self, superuser_names: Vec<String>, enable_superuser_jobs: bool) -> Self {
        self.superuser_names = superuser_names;
        self.enable_superuser_jobs = enable_superuser_jobs;
        self
    }

    fn is_superuser(&self, user_name: &str) -> bool {
        self.superuser_names.iter().any(|n| n == user_name)
    }

    /// Attempts to acquire the startup mutual-exclusion lock described in
    /// the Open Question resolution for `mark_pending_runs_failed`: a
    /// `BEGIN IMMEDIATE` transaction used purely as a lock, so only the
    /// first scheduler process after a crash performs the sweep.
    pub async fn try_acquire_startup_lock(&self) -> DbResult<bool> {
        let conn = self.conn.lock().await;
        match conn.execute_batch("BEGIN IMMEDIATE; COMMIT;") {
            Ok(()) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::DatabaseBusy =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Trims the `runs` table to the most recent `keep` rows.
    pub async fn trim_runs(&self, keep: u64) -> DbResult<u64> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM runs WHERE run_id NOT IN (
                SELECT run_id FROM runs ORDER BY run_id DESC LIMIT ?1
            )",
            params![keep as i64],
        )?;
        Ok(deleted as u64)
    }

    fn row_to_job_def(row: &rusqlite::Row) -> rusqlite::Result<JobDefRow> {
        Ok(JobDefRow {
            job_id: row.get("job_id")?,
            job_name: row.get("job_name")?,
            schedule_text: row.get("schedule")?,
            command: row.get("command")?,
            node_name: row.get("node_name")?,
            node_port: row.get::<_, i64>("node_port")? as u16,
            database: row.get("database")?,
            user_name: row.get("user_name")?,
            active: row.get::<_, i64>("active")? != 0,
            timezone_offset: row.get("timezone_offset")?,
        })
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }
}

struct JobDefRow {
    job_id: i64,
    job_name: Option<String>,
    schedule_text: String,
    command: String,
    node_name: String,
    node_port: u16,
    database: String,
    user_name: String,
    active: bool,
    timezone_offset: Option<i64>,
}

impl JobDefRow {
    fn into_job_def(self) -> Result<JobDef> {
        // A schedule that fails to re-parse at load time is retained with
        // a never-firing schedule and a warning rather than dropped.
        let schedule = match schedule::parse(&self.schedule_text) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(
                    job_id = self.job_id,
                    error = %e,
                    "job has an unparseable schedule at load time; retaining with a never-firing schedule"
                );
                schedule::parse("0 0 31 2 *").expect("literal fallback schedule must parse")
            }
        };

        Ok(JobDef {
            job_id: JobId(self.job_id),
            schedule_text: self.schedule_text,
            schedule,
            command: self.command,
            node_name: self.node_name,
            node_port: self.node_port,
            database: self.database,
            user_name: self.user_name,
            job_name: self.job_name,
            active: self.active,
            timezone_offset_hours: self.timezone_offset.map(|v| v as i8),
        })
    }
}

fn check_permission(caller: &Identity, owner: &str, action: &str) -> Result<()> {
    if caller.user_name == owner || caller.is_privileged {
        return Ok(());
    }
    Err(CronError::PermissionDenied {
        action: action.to_string(),
    })
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn list_jobs(&self) -> Result<Vec<JobDef>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT j.job_id, j.job_name, j.schedule, j.command, j.node_name,
                        j.node_port, j.database, j.user_name, j.active,
                        e.timezone_offset
                 FROM jobs j LEFT JOIN extensions e ON e.job_id = j.job_id
                 ORDER BY j.job_id",
            )
            .map_err(sqlite_err)?;

        let rows = stmt
            .query_map([], Self::row_to_job_def)
            .map_err(sqlite_err)?;

        let mut jobs = Vec::new();
        for row in rows {
            let row = row.map_err(sqlite_err)?;
            if !self.enable_superuser_jobs && self.is_superuser(&row.user_name) {
                tracing::warn!(
                    job_id = row.job_id,
                    user_name = %row.user_name,
                    "skipping job owned by a superuser identity because enable_superuser_jobs is false"
                );
                continue;
            }
            jobs.push(row.into_job_def()?);
        }
        Ok(jobs)
    }

    async fn insert_job(
        &self,
        caller: &Identity,
        schedule: &str,
        command: &str,
        database: &str,
        user_name: &str,
        job_name: Option<&str>,
        active: bool,
        timezone_offset_hours: Option<i8>,
    ) -> Result<JobId> {
        if user_name != caller.user_name && !caller.is_privileged {
            return Err(CronError::PermissionDenied {
                action: "schedule a job for another user".to_string(),
            });
        }
        if !self.enable_superuser_jobs && self.is_superuser(user_name) {
            return Err(CronError::PermissionDenied {
                action: format!("schedule a job owned by superuser identity {user_name:?} while enable_superuser_jobs is false"),
            });
        }
        if let Some(hours) = timezone_offset_hours {
            validate_timezone_offset(hours)?;
        }

        schedule::parse(schedule)?;

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO jobs (job_name, schedule, command, node_name, node_port, database, user_name, active)
             VALUES (?1, ?2, ?3, 'localhost', 5432, ?4, ?5, ?6)",
            params![job_name, schedule, command, database, user_name, active as i64],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                CronError::Internal(format!("job name already in use for this user: {job_name:?}"))
            }
            other => sqlite_err(other),
        })?;

        let job_id = conn.last_insert_rowid();

        if let Some(hours) = timezone_offset_hours {
            conn.execute(
                "INSERT INTO extensions (job_id, timezone_offset) VALUES (?1, ?2)
                 ON CONFLICT(job_id) DO UPDATE SET timezone_offset = excluded.timezone_offset",
                params![job_id, hours as i64],
            )
            .map_err(sqlite_err)?;
        }

        drop(conn);
        self.mark_dirty();
        Ok(JobId(job_id))
    }

    async fn alter_job(&self, caller: &Identity, job_id: JobId, patch: JobPatch) -> Result<()> {
        if let Some(ref sched) = patch.schedule {
            schedule::parse(sched)?;
        }
        if let Some(Some(hours)) = patch.timezone_offset_hours {
            validate_timezone_offset(hours)?;
        }

        let conn = self.conn.lock().await;
        let owner: String = conn
            .query_row(
                "SELECT user_name FROM jobs WHERE job_id = ?1",
                params![job_id.0],
                |r| r.get(0),
            )
            .optional()
            .map_err(sqlite_err)?
            .ok_or_else(|| CronError::NotFound(format!("job {job_id}")))?;

        check_permission(caller, &owner, "alter job")?;

        if let Some(ref sched) = patch.schedule {
            conn.execute(
                "UPDATE jobs SET schedule = ?1 WHERE job_id = ?2",
                params![sched, job_id.0],
            )
            .map_err(sqlite_err)?;
        }
        if let Some(ref command) = patch.command {
            conn.execute(
                "UPDATE jobs SET command = ?1 WHERE job_id = ?2",
                params![command, job_id.0],
            )
            .map_err(sqlite_err)?;
        }
        if let Some(ref database) = patch.database {
            conn.execute(
                "UPDATE jobs SET database = ?1 WHERE job_id = ?2",
                params![database, job_id.0],
            )
            .map_err(sqlite_err)?;
        }
        if let Some(ref new_user) = patch.user_name {
            if new_user != &caller.user_name && !caller.is_privileged {
                return Err(CronError::PermissionDenied {
                    action: "reassign job owner".to_string(),
                });
            }
            conn.execute(
                "UPDATE jobs SET user_name = ?1 WHERE job_id = ?2",
                params![new_user, job_id.0],
            )
            .map_err(sqlite_err)?;
        }
        if let Some(active) = patch.active {
            conn.execute(
                "UPDATE jobs SET active = ?1 WHERE job_id = ?2",
                params![active as i64, job_id.0],
            )
            .map_err(sqlite_err)?;
        }
        if let Some(ref name) = patch.job_name {
            conn.execute(
                "UPDATE jobs SET job_name = ?1 WHERE job_id = ?2",
                params![name, job_id.0],
            )
            .map_err(sqlite_err)?;
        }
        if let Some(offset) = patch.timezone_offset_hours {
            conn.execute(
                "INSERT INTO extensions (job_id, timezone_offset) VALUES (?1, ?2)
                 ON CONFLICT(job_id) DO UPDATE SET timezone_offset = excluded.timezone_offset",
                params![job_id.0, offset.map(|h| h as i64)],
            )
            .map_err(sqlite_err)?;
        }

        drop(conn);
        self.mark_dirty();
        Ok(())
    }

    async fn delete_job(&self, caller: &Identity, id_or_name: JobIdOrName) -> Result<()> {
        let conn = self.conn.lock().await;

        let (job_id, owner): (i64, String) = match &id_or_name {
            JobIdOrName::Id(id) => conn
                .query_row(
                    "SELECT job_id, user_name FROM jobs WHERE job_id = ?1",
                    params![id.0],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()
                .map_err(sqlite_err)?
                .ok_or_else(|| CronError::NotFound(format!("job {id}")))?,
            JobIdOrName::Name(name) => conn
                .query_row(
                    "SELECT job_id, user_name FROM jobs WHERE job_name = ?1",
                    params![name],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()
                .map_err(sqlite_err)?
                .ok_or_else(|| CronError::NotFound(format!("job {name}")))?,
        };

        check_permission(caller, &owner, "delete job")?;

        conn.execute("DELETE FROM jobs WHERE job_id = ?1", params![job_id])
            .map_err(sqlite_err)?;

        drop(conn);
        self.mark_dirty();
        Ok(())
    }

    async fn next_run_id(&self) -> Result<RunId> {
        let conn = self.conn.lock().await;
        let id: Option<i64> = conn
            .query_row(
                "UPDATE run_id_counter SET next_value = next_value + 1
                 WHERE id = 1 RETURNING next_value - 1",
                [],
                |r| r.get(0),
            )
            .optional()
            .map_err(sqlite_err)?;
        Ok(RunId(id.unwrap_or(0)))
    }

    async fn insert_run(
        &self,
        run_id: RunId,
        job_id: JobId,
        database: &str,
        user_name: &str,
        command: &str,
        status: RunStatus,
    ) -> Result<()> {
        if !run_id.is_logged() {
            return Ok(());
        }
        let conn = self.conn.lock().await;
        if let Err(e) = conn.execute(
            "INSERT INTO runs (run_id, job_id, database, user_name, command, status, start_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_id.0,
                job_id.0,
                database,
                user_name,
                command,
                status.as_str(),
                Utc::now().to_rfc3339(),
            ],
        ) {
            tracing::warn!(error = %e, run_id = run_id.0, "insert_run failed; swallowed");
        }
        Ok(())
    }

    async fn update_run(&self, run_id: RunId, patch: RunPatch) -> Result<()> {
        if !run_id.is_logged() {
            return Ok(());
        }
        let conn = self.conn.lock().await;
        let result = conn.execute(
            "UPDATE runs SET
                status = COALESCE(?2, status),
                return_message = COALESCE(?3, return_message),
                end_time = COALESCE(?4, end_time)
             WHERE run_id = ?1",
            params![
                run_id.0,
                patch.status.map(|s| s.as_str()),
                patch.return_message,
                patch.end_time.map(|t| t.to_rfc3339()),
            ],
        );
        if let Err(e) = result {
            tracing::warn!(error = %e, run_id = run_id.0, "update_run failed; swallowed");
        }
        Ok(())
    }

    async fn list_runs(&self, job_id: JobId, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT run_id, job_id, database, user_name, command, status,
                        return_message, start_time, end_time
                 FROM runs WHERE job_id = ?1 ORDER BY run_id DESC LIMIT ?2",
            )
            .map_err(sqlite_err)?;

        let rows = stmt
            .query_map(params![job_id.0, limit as i64], |row| {
                let status_text: String = row.get(5)?;
                let start: Option<String> = row.get(7)?;
                let end: Option<String> = row.get(8)?;
                Ok(RunRecord {
                    run_id: RunId(row.get(0)?),
                    job_id: JobId(row.get(1)?),
                    database: row.get(2)?,
                    user_name: row.get(3)?,
                    command: row.get(4)?,
                    status: RunStatus::parse(&status_text).unwrap_or(RunStatus::Failed),
                    return_message: row.get(6)?,
                    start_time: start.and_then(|s| parse_rfc3339(&s)),
                    end_time: end.and_then(|s| parse_rfc3339(&s)),
                })
            })
            .map_err(sqlite_err)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(row.map_err(sqlite_err)?);
        }
        Ok(runs)
    }

    async fn mark_pending_runs_failed(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE runs SET status = 'failed', return_message = 'server restarted', end_time = ?1
                 WHERE status IN ('starting', 'running')",
                params![Utc::now().to_rfc3339()],
            )
            .map_err(sqlite_err)?;
        Ok(updated as u64)
    }

    fn invalidate(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    fn take_invalidation(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn sqlite_err(e: rusqlite::Error) -> CronError {
    CronError::StoreTransient(e.to_string())
}

/// Extensions table range (§6a): `timezone_offset ∈ [-12, 12]`.
fn validate_timezone_offset(hours: i8) -> Result<()> {
    if !(-12..=12).contains(&hours) {
        return Err(CronError::Config(format!(
            "timezone_offset_hours must be between -12 and 12, got {hours}"
        )));
    }
    Ok(())
}
