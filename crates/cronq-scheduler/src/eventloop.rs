//! The event loop (§4.7): single-threaded, cooperative, no worker threads.
//! Ties together store invalidation, the scheduler tick, and one
//! state-machine advance per task per iteration.
//!
//! Grounded on pg_cron's `PgCronWorkerMain`/`WaitForCronTasks`/
//! `PollForTasks` (`pg_cron.c`). The literal `pollfd[]`/`poll(2)` call is
//! realized here as a single bounded `tokio::time::sleep`, computed the
//! same way pg_cron computes its poll timeout (`next_event = min(minute_end,
//! min over tasks of start_deadline)`, clamped to `MAX_WAIT`, skipped
//! entirely when a task already has work) — `session.rs`'s sessions report
//! readiness synchronously rather than owning a raw socket fd, so there is
//! nothing left to multiplex a real `poll(2)` over.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::Instrument;

use cronq_core::store::JobStore;
use cronq_core::time::minute_end;

use crate::registry::Registry;
use crate::session::SessionFactory;
use crate::tick::{tick, SchedulerClock};

/// Hard cap on how long the loop may sleep in one iteration (§4.7): it must
/// wake at least once per second to observe reloads, signals, and minute
/// boundaries promptly.
pub const MAX_WAIT: Duration = Duration::from_millis(1000);

/// Owns the registry and the virtual clock across iterations (§9: "their
/// lifecycle is tied to the event loop: created at loop start, destroyed at
/// loop exit").
pub struct EventLoop {
    registry: Registry,
    clock: Option<SchedulerClock>,
    connect_timeout: Duration,
    max_wait: Duration,
    iterations: u64,
}

impl EventLoop {
    pub fn new(connect_timeout: Duration, max_wait: Duration) -> Self {
        EventLoop {
            registry: Registry::new(),
            clock: None,
            connect_timeout,
            max_wait: max_wait.min(MAX_WAIT),
            iterations: 0,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Runs forever. A task failure never stops the loop (§7 propagation
    /// policy); only an unrecoverable store error returns.
    pub async fn run(
        &mut self,
        store: Arc<dyn JobStore>,
        factory: Arc<dyn SessionFactory>,
    ) -> cronq_core::Result<()> {
        loop {
            self.step_once(store.as_ref(), factory.as_ref()).await?;
        }
    }

    /// One iteration of §4.7's control flow, timed against the wall clock.
    pub async fn step_once(
        &mut self,
        store: &dyn JobStore,
        factory: &dyn SessionFactory,
    ) -> cronq_core::Result<()> {
        self.step_once_at(Utc::now(), store, factory).await
    }

    /// Same as [`step_once`](Self::step_once) but with an injected `now`,
    /// so scenario tests (S1-S6) can drive specific clock values without
    /// racing the real clock.
    pub async fn step_once_at(
        &mut self,
        now: DateTime<Utc>,
        store: &dyn JobStore,
        factory: &dyn SessionFactory,
    ) -> cronq_core::Result<()> {
        // Step 1-2: accept invalidations, reload if dirty.
        let dirty = tracing::info_span!("store.call", op = "take_invalidation")
            .in_scope(|| store.take_invalidation());
        if dirty {
            self.registry
                .reload(store)
                .instrument(tracing::info_span!("store.call", op = "list_jobs"))
                .await?;
        }

        // Step 3-4: compute now, run the scheduler tick.
        let clock = self.clock.get_or_insert_with(|| SchedulerClock::new(now));
        tick(clock, now, &mut self.registry);

        // Step 5: wait for an I/O event or the next minute boundary.
        self.wait(now).await;

        // Step 6-7: advance every task once via the state machine.
        for job_id in self.registry.job_ids() {
            let job = match self.registry.job(job_id) {
                Some(job) => job.clone(),
                None => continue,
            };
            if let Some(task) = self.registry.task_mut(job_id) {
                task.step(&job, Instant::now(), self.connect_timeout, store, factory)
                    .await;
            }
        }

        // Step 8: the per-iteration scratch is just `job_id`/`job` above,
        // which drop at the end of this function; no arena to reset
        // explicitly (§5: ordinary `Vec`/`HashMap` buffers, not a custom
        // allocator).
        self.registry.prune_orphans();
        self.iterations += 1;
        Ok(())
    }

    async fn wait(&self, now: DateTime<Utc>) {
        if self.registry.is_empty() {
            tokio::time::sleep(self.max_wait).await;
            return;
        }
        if self.registry.has_immediate_work() {
            return;
        }

        let until_minute_end = (minute_end(now) - now).to_std().unwrap_or(Duration::ZERO);
        let nearest_deadline = self
            .registry
            .start_deadlines()
            .into_iter()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .min();

        let mut timeout = until_minute_end;
        if let Some(deadline_wait) = nearest_deadline {
            timeout = timeout.min(deadline_wait);
        }
        timeout = timeout.min(self.max_wait);

        if timeout > Duration::ZERO {
            tokio::time::sleep(timeout).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MockSessionFactory, SessionFactory};
    use async_trait::async_trait;
    use cronq_core::job::{JobDef, JobId, JobPatch, RunId, RunPatch, RunRecord, RunStatus};
    use cronq_core::schedule::parse;
    use cronq_core::store::{Identity, JobIdOrName};
    use cronq_core::time::ymd_hms;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::Mutex;

    struct OneJobStore {
        job: Mutex<Option<JobDef>>,
        dirty: AtomicBool,
        next_run: AtomicI64,
        statuses: Mutex<Vec<RunStatus>>,
    }

    impl OneJobStore {
        fn new(schedule: &str) -> Self {
            OneJobStore {
                job: Mutex::new(Some(JobDef {
                    job_id: JobId(1),
                    schedule_text: schedule.to_string(),
                    schedule: parse(schedule).unwrap(),
                    command: "SELECT 1".to_string(),
                    node_name: "localhost".to_string(),
                    node_port: 5432,
                    database: "postgres".to_string(),
                    user_name: "alice".to_string(),
                    job_name: None,
                    active: true,
                    timezone_offset_hours: None,
                })),
                dirty: AtomicBool::new(true),
                next_run: AtomicI64::new(1),
                statuses: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JobStore for OneJobStore {
        async fn list_jobs(&self) -> cronq_core::Result<Vec<JobDef>> {
            Ok(self.job.lock().unwrap().iter().cloned().collect())
        }
        async fn insert_job(
            &self,
            _: &Identity,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
            _: Option<&str>,
            _: bool,
            _: Option<i8>,
        ) -> cronq_core::Result<JobId> {
            unimplemented!()
        }
        async fn alter_job(&self, _: &Identity, _: JobId, _: JobPatch) -> cronq_core::Result<()> {
            unimplemented!()
        }
        async fn delete_job(&self, _: &Identity, _: JobIdOrName) -> cronq_core::Result<()> {
            *self.job.lock().unwrap() = None;
            self.dirty.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn next_run_id(&self) -> cronq_core::Result<RunId> {
            Ok(RunId(self.next_run.fetch_add(1, Ordering::SeqCst)))
        }
        async fn insert_run(
            &self,
            _: RunId,
            _: JobId,
            _: &str,
            _: &str,
            _: &str,
            status: RunStatus,
        ) -> cronq_core::Result<()> {
            self.statuses.lock().unwrap().push(status);
            Ok(())
        }
        async fn update_run(&self, _: RunId, patch: RunPatch) -> cronq_core::Result<()> {
            if let Some(status) = patch.status {
                self.statuses.lock().unwrap().push(status);
            }
            Ok(())
        }
        async fn list_runs(&self, _: JobId, _: usize) -> cronq_core::Result<Vec<RunRecord>> {
            Ok(vec![])
        }
        async fn mark_pending_runs_failed(&self) -> cronq_core::Result<u64> {
            Ok(0)
        }
        fn invalidate(&self) {
            self.dirty.store(true, Ordering::SeqCst);
        }
        fn take_invalidation(&self) -> bool {
            self.dirty.swap(false, Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn hourly_wildcard_run_completes_successfully() {
        // S1: insert "0 * * * *", advance from 12:59:30 to 13:00:05, expect
        // one run reaching "succeeded".
        let store = OneJobStore::new("0 * * * *");
        let factory = MockSessionFactory;
        let mut loop_ = EventLoop::new(Duration::from_secs(10), Duration::from_millis(50));

        let before = ymd_hms(2026, 3, 5, 12, 59, 30);
        loop_.step_once_at(before, &store, &factory).await.unwrap();

        let after = ymd_hms(2026, 3, 5, 13, 0, 5);
        loop_.step_once_at(after, &store, &factory).await.unwrap();

        // Drain the task through START -> CONNECTING -> SENDING -> RUNNING -> DONE.
        for _ in 0..6 {
            loop_.step_once_at(after, &store, &factory).await.unwrap();
        }

        assert!(store.statuses.lock().unwrap().contains(&RunStatus::Succeeded));
    }

    #[tokio::test]
    async fn reload_mid_run_completes_then_prunes_the_task() {
        // S5: delete the job while a run is RUNNING; the run still finishes
        // and the task is pruned only afterward.
        let store = OneJobStore::new("* * * * *");
        let factory = MockSessionFactory;
        let mut loop_ = EventLoop::new(Duration::from_secs(10), Duration::from_millis(50));

        let now = ymd_hms(2026, 3, 5, 12, 0, 0);
        loop_.step_once_at(now, &store, &factory).await.unwrap();
        let later = now + chrono::Duration::minutes(1);
        loop_.step_once_at(later, &store, &factory).await.unwrap(); // WAITING -> START
        loop_.step_once_at(later, &store, &factory).await.unwrap(); // START -> CONNECTING
        loop_.step_once_at(later, &store, &factory).await.unwrap(); // CONNECTING -> SENDING
        loop_.step_once_at(later, &store, &factory).await.unwrap(); // SENDING -> RUNNING

        store.delete_job(&Identity { user_name: "alice".into(), is_privileged: false }, JobIdOrName::Id(JobId(1)))
            .await
            .unwrap();

        // The in-flight task still drains to DONE even though the job is gone.
        loop_.step_once_at(later, &store, &factory).await.unwrap(); // reload (job gone) + RUNNING -> DONE
        assert!(store.statuses.lock().unwrap().contains(&RunStatus::Succeeded));

        loop_.step_once_at(later, &store, &factory).await.unwrap(); // DONE -> WAITING
        loop_.step_once_at(later, &store, &factory).await.unwrap(); // pruned once idle

        assert!(loop_.registry().job_ids().is_empty());
    }

    #[tokio::test]
    async fn reboot_job_fires_once_across_iterations() {
        // S6: @reboot fires exactly once on the first tick.
        let store = OneJobStore::new("@reboot");
        let factory = MockSessionFactory;
        let mut loop_ = EventLoop::new(Duration::from_secs(10), Duration::from_millis(50));

        let now = ymd_hms(2026, 3, 5, 12, 0, 0);
        loop_.step_once_at(now, &store, &factory).await.unwrap();
        let pending_after_first = loop_
            .registry()
            .job_ids()
            .into_iter()
            .filter_map(|id| loop_.registry().job(id).map(|_| id))
            .count();
        assert_eq!(pending_after_first, 1);

        let later = now + chrono::Duration::minutes(2);
        loop_.step_once_at(later, &store, &factory).await.unwrap();
        loop_.step_once_at(later, &store, &factory).await.unwrap();
    }
}
