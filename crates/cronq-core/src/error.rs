//! Error types for cronq
//!
//! This module defines all error types used throughout the scheduler.

use thiserror::Error;

/// Result type alias using CronError
pub type Result<T> = std::result::Result<T, CronError>;

/// Main error enum for all cronq operations.
///
/// Variants map 1:1 onto the error kinds enumerated by the scheduler
/// design: caller-visible kinds are returned from store operations,
/// internal kinds are recorded on a task and never propagated out of
/// the event loop.
#[derive(Error, Debug)]
pub enum CronError {
    /// The schedule text failed to parse.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(#[from] crate::schedule::ScheduleParseError),

    /// No job/run with the given identifier or name exists.
    #[error("not found: {0}")]
    NotFound(String),

    /// The invoking identity may not perform this action.
    #[error("permission denied: {action}")]
    PermissionDenied { action: String },

    /// Opening a session to the target database failed.
    #[error("connection failed")]
    ConnectFailed,

    /// The connect/send deadline elapsed before the session was usable.
    #[error("connection timeout")]
    ConnectTimeout,

    /// Sending the command failed after a connection was established.
    #[error("send failed")]
    SendFailed,

    /// The connection was lost while a result was outstanding.
    #[error("connection lost")]
    ConnectionLost,

    /// The session reported a fatal/bad-response result.
    #[error("result fatal: {0}")]
    ResultFatal(String),

    /// The session attempted to enter COPY mode, which is unsupported.
    #[error("COPY not supported")]
    CopyUnsupported,

    /// The task's job was deactivated or removed while it was in flight.
    #[error("job cancelled")]
    JobCancelled,

    /// A persistence failure that is logged and swallowed by the store
    /// adapter; never seen outside of `tracing::warn!` output.
    #[error("store error: {0}")]
    StoreTransient(String),

    /// A malformed or out-of-range configuration value.
    #[error("config error: {0}")]
    Config(String),

    /// Catch-all for conditions that should not occur.
    #[error("internal error: {0}")]
    Internal(String),

    /// IO error (config file access, lock file, etc).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CronError {
    /// Whether a caller retrying the same operation might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed
                | Self::ConnectTimeout
                | Self::ConnectionLost
                | Self::StoreTransient(_)
        )
    }

    /// Stable machine-readable error code, used in CLI output and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidSchedule(_) => "INVALID_SCHEDULE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::ConnectFailed => "CONNECT_FAILED",
            Self::ConnectTimeout => "CONNECT_TIMEOUT",
            Self::SendFailed => "SEND_FAILED",
            Self::ConnectionLost => "CONNECTION_LOST",
            Self::ResultFatal(_) => "RESULT_FATAL",
            Self::CopyUnsupported => "COPY_UNSUPPORTED",
            Self::JobCancelled => "JOB_CANCELLED",
            Self::StoreTransient(_) => "STORE_TRANSIENT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// The literal `return_message` recorded against a run when a task
    /// fails with this error, matching the strings used by the task
    /// state machine's tests and the original scheduler's log output.
    pub fn run_message(&self) -> String {
        match self {
            Self::ConnectFailed => "connection failed".to_string(),
            Self::ConnectTimeout => "connection timeout".to_string(),
            Self::SendFailed => "send failed".to_string(),
            Self::ConnectionLost => "connection lost".to_string(),
            Self::JobCancelled => "job cancelled".to_string(),
            Self::CopyUnsupported => "COPY not supported".to_string(),
            other => other.to_string(),
        }
    }
}
