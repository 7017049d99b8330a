//! cronq-core
//!
//! Core types shared by the scheduler, store, and CLI: the cron schedule
//! parser, wall-clock utilities, the job/run data model, the store
//! adapter trait, configuration, and the crate-wide error type.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────┐     ┌───────────────┐     ┌──────────────┐
//! │  cronctl  │────>│ cronq-store   │<────│ cronq-scheduler │
//! └───────────┘     └───────────────┘     └──────────────┘
//!        │                  │                     │
//!        └──────────────────┴─────────────────────┘
//!                     cronq-core (this crate)
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod schedule;
pub mod store;
pub mod time;

pub use error::{CronError, Result};
pub use job::{JobDef, JobId, JobPatch, RunId, RunPatch, RunRecord, RunStatus};
pub use schedule::{Schedule, ScheduleFlags, ScheduleParseError};
pub use store::{Identity, JobIdOrName, JobStore};
pub use time::{classify_clock, minute_end, minute_start, minutes_between, ClockProgress};
pub use config::SchedulerConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
