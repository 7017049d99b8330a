//! The scheduler: registry, tick, task state machine, session trait, and the
//! single-threaded event loop that drives them all (§4.4-§4.7).
//!
//! # Architecture
//!
//! ```text
//! EventLoop::step_once
//!   1. JobStore::take_invalidation -> Registry::reload
//!   2. tick (SchedulerClock) -> per-task pending_run_count
//!   3. bounded wait (minute boundary / task deadline / MAX_WAIT)
//!   4. CronTask::step, once per task
//! ```

pub mod eventloop;
pub mod registry;
pub mod session;
pub mod task;
pub mod tick;

pub use eventloop::EventLoop;
pub use registry::Registry;
pub use session::{MockSession, MockSessionFactory, Readiness, Session, SessionFactory, SessionOutcome, SqliteSession, SqliteSessionFactory};
pub use task::{CronTask, PollingStatus, TaskState};
pub use tick::{tick, SchedulerClock};
