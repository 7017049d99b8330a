//! Job and run identifiers, and the immutable `JobDef` snapshot produced by
//! the store adapter (§3).

use serde::{Deserialize, Serialize};

use crate::schedule::Schedule;

/// A 64-bit job identifier, stable across restarts (assigned from a
/// persistent sequence, mirroring `cron.jobid_seq`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 64-bit run identifier. `RunId(0)` means "not logged" (§3): the run
/// detail store was unavailable when the run started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub i64);

impl RunId {
    pub const NONE: RunId = RunId(0);

    pub fn is_logged(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The run-log status column (§6's `status` enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Starting,
    Connecting,
    Sending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Starting => "starting",
            RunStatus::Connecting => "connecting",
            RunStatus::Sending => "sending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "starting" => RunStatus::Starting,
            "connecting" => RunStatus::Connecting,
            "sending" => RunStatus::Sending,
            "running" => RunStatus::Running,
            "succeeded" => RunStatus::Succeeded,
            "failed" => RunStatus::Failed,
            _ => return None,
        })
    }

    /// Rows in these statuses are what `mark_pending_runs_failed` looks for
    /// on startup (§4.3).
    pub fn is_in_flight(&self) -> bool {
        matches!(self, RunStatus::Starting | RunStatus::Running)
    }
}

/// Immutable snapshot of one registered job, as produced by the store
/// adapter and consumed by the registry (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct JobDef {
    pub job_id: JobId,
    pub schedule_text: String,
    pub schedule: Schedule,
    pub command: String,
    pub node_name: String,
    pub node_port: u16,
    pub database: String,
    pub user_name: String,
    pub job_name: Option<String>,
    pub active: bool,
    /// Extension (§6a): a fixed per-job UTC offset applied before schedule
    /// matching. `None` means UTC, unshifted.
    pub timezone_offset_hours: Option<i8>,
}

/// Fields a caller may update via `alter_job`; `None` leaves the column
/// unchanged. `timezone_offset_hours: Some(None)` clears the offset back to
/// unshifted UTC.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub schedule: Option<String>,
    pub command: Option<String>,
    pub database: Option<String>,
    pub user_name: Option<String>,
    pub active: Option<bool>,
    pub job_name: Option<Option<String>>,
    pub timezone_offset_hours: Option<Option<i8>>,
}

/// One row in the run-detail log (§6's `runs` collection).
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: RunId,
    pub job_id: JobId,
    pub database: String,
    pub user_name: String,
    pub command: String,
    pub status: RunStatus,
    pub return_message: Option<String>,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Partial update applied by `update_run` on a terminal transition.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub return_message: Option<String>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
}
