//! The job store adapter trait (§4.3). The host database engine's catalog
//! is out of scope; any durable backend behind this trait is acceptable,
//! grounded the way `jobqueue-core::traits::JobStore` structures pluggable
//! storage backends.

use async_trait::async_trait;

use crate::error::Result;
use crate::job::{JobDef, JobId, JobPatch, RunId, RunPatch, RunRecord, RunStatus};

/// Identity of the caller invoking a mutating store operation, used for
/// the permission discipline in §4.3.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_name: String,
    pub is_privileged: bool,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Snapshot of all jobs (active and inactive); the registry filters on
    /// `active` itself (§4.4).
    async fn list_jobs(&self) -> Result<Vec<JobDef>>;

    /// Validates `schedule` via the parser, assigns a new `JobId`, and
    /// persists the row. Fails with `InvalidSchedule` without writing
    /// anything if parsing fails.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<JobId>;

    /// Partial update; re-validates `patch.schedule` if present. Fails with
    /// `NotFound` or `PermissionDenied`.
    async fn alter_job(&self, caller: &Identity, job_id: JobId, patch: JobPatch) -> Result<()>;

    /// Permission-checked deletion by id or unique job name.
    async fn delete_job(&self, caller: &Identity, id_or_name: JobIdOrName) -> Result<()>;

    /// Monotonic run-id counter; `RunId(0)` if the run-detail store is
    /// unavailable.
    async fn next_run_id(&self) -> Result<RunId>;

    /// Append-only; best effort (never propagated to the event loop).
    async fn insert_run(
        &self,
        run_id: RunId,
        job_id: JobId,
        database: &str,
        user_name: &str,
        command: &str,
        status: RunStatus,
    ) -> Result<()>;

    /// Best effort.
    async fn update_run(&self, run_id: RunId, patch: RunPatch) -> Result<()>;

    /// Lists the most recent runs for a job, most recent first.
    async fn list_runs(&self, job_id: JobId, limit: usize) -> Result<Vec<RunRecord>>;

    /// On startup, transitions all rows in `{starting, running}` to
    /// `failed` with `"server restarted"` (§4.3, §9 Open Question: guarded
    /// by a process-level lock upstream of this call).
    async fn mark_pending_runs_failed(&self) -> Result<u64>;

    /// Idempotent "registry is dirty" signal (§4.4).
    fn invalidate(&self);

    /// Consumes and clears the invalidation flag; `true` if a reload is due.
    fn take_invalidation(&self) -> bool;
}

/// A job may be addressed by id or by its (optional) unique name.
#[derive(Debug, Clone)]
pub enum JobIdOrName {
    Id(JobId),
    Name(String),
}
