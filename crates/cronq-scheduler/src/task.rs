//! The per-job task state machine (§4.6): drives each job through
//! connect → send → run → collect, one advance per event-loop iteration.
//!
//! Grounded on pg_cron's `ManageCronTask`/`CronTaskState` (`pg_cron.c`,
//! `include/pg_cron.h`): the same transition table and the same literal
//! `return_message` strings (`"connection failed"`, `"connection
//! timeout"`, `"connection lost"`, `"job cancelled"`, `"COPY not
//! supported"`), reached here via `CronError::run_message()` instead of
//! inline string literals.

use std::task::Poll;
use std::time::{Duration, Instant};

use chrono::Utc;

use cronq_core::job::{JobDef, JobId, RunId, RunPatch, RunStatus};
use cronq_core::store::JobStore;
use cronq_core::CronError;
use tracing::Instrument;

use crate::session::{Readiness, Session, SessionFactory, SessionOutcome};

/// One state of the transition table in §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Waiting,
    Start,
    Connecting,
    Sending,
    Running,
    Error,
    Done,
}

/// Mirrors the wire library's non-blocking handshake status, used only for
/// observability (`status`/`runs` CLI output); the event loop itself reads
/// `Session::readiness()` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingStatus {
    None,
    Read,
    Write,
    Ok,
    Failed,
}

/// Mutable execution state for one job (§3's `CronTask`).
pub struct CronTask {
    pub job_id: JobId,
    pub run_id: RunId,
    pub state: TaskState,
    pub pending_run_count: u32,
    pub connection: Option<Box<dyn Session>>,
    pub polling_status: PollingStatus,
    pub start_deadline: Option<Instant>,
    pub is_socket_ready: bool,
    pub is_active: bool,
    pub error_message: Option<String>,
}

impl CronTask {
    pub fn new(job_id: JobId) -> Self {
        CronTask {
            job_id,
            run_id: RunId::NONE,
            state: TaskState::Waiting,
            pending_run_count: 0,
            connection: None,
            polling_status: PollingStatus::None,
            start_deadline: None,
            is_socket_ready: false,
            is_active: true,
            error_message: None,
        }
    }

    fn deadline_expired(&self, now: Instant) -> bool {
        self.start_deadline.map(|d| now >= d).unwrap_or(false)
    }

    /// Advances this task by exactly one state, consistent with "each task
    /// advances at most once per event-loop iteration" (§4.6).
    pub async fn step(
        &mut self,
        job: &JobDef,
        now: Instant,
        connect_timeout: Duration,
        store: &dyn JobStore,
        factory: &dyn SessionFactory,
    ) {
        let from_state = self.state;
        let span = tracing::info_span!(
            "task.step",
            job_id = job.job_id.0,
            from_state = ?from_state,
            to_state = tracing::field::Empty,
        );
        async {
            self.step_inner(job, now, connect_timeout, store, factory).await;
            tracing::Span::current().record("to_state", tracing::field::debug(self.state));
        }
        .instrument(span)
        .await
    }

    async fn step_inner(
        &mut self,
        job: &JobDef,
        now: Instant,
        connect_timeout: Duration,
        store: &dyn JobStore,
        factory: &dyn SessionFactory,
    ) {
        if !self.is_active && self.is_in_flight() {
            self.fail(store, CronError::JobCancelled).await;
            return;
        }

        match self.state {
            TaskState::Waiting => {
                if self.pending_run_count > 0 {
                    self.pending_run_count -= 1;
                    self.state = TaskState::Start;
                }
            }

            TaskState::Start => {
                self.run_id = store.next_run_id().await.unwrap_or(RunId::NONE);
                let _ = store
                    .insert_run(
                        self.run_id,
                        job.job_id,
                        &job.database,
                        &job.user_name,
                        &job.command,
                        RunStatus::Starting,
                    )
                    .await;

                self.connection = Some(factory.open(job));
                self.start_deadline = Some(now + connect_timeout);
                self.polling_status = PollingStatus::None;
                self.state = TaskState::Connecting;
            }

            TaskState::Connecting => {
                if self.deadline_expired(now) {
                    self.fail(store, CronError::ConnectTimeout).await;
                    return;
                }
                let session = self
                    .connection
                    .as_mut()
                    .expect("CONNECTING state implies an open session");

                match session.poll_connect() {
                    Poll::Pending => {
                        self.polling_status = readiness_to_status(session.readiness());
                    }
                    Poll::Ready(Ok(())) => {
                        self.polling_status = PollingStatus::Ok;
                        self.start_deadline = Some(now + connect_timeout);
                        self.state = TaskState::Sending;
                    }
                    Poll::Ready(Err(_)) => {
                        self.fail(store, CronError::ConnectFailed).await;
                    }
                }
            }

            TaskState::Sending => {
                if self.deadline_expired(now) {
                    self.fail(store, CronError::ConnectTimeout).await;
                    return;
                }
                let command = job.command.clone();
                let session = self
                    .connection
                    .as_mut()
                    .expect("SENDING state implies an open session");

                match session.poll_send(&command) {
                    Poll::Pending => {
                        self.polling_status = readiness_to_status(session.readiness());
                    }
                    Poll::Ready(Ok(())) => {
                        self.polling_status = PollingStatus::Ok;
                        self.start_deadline = None;
                        let _ = store
                            .update_run(
                                self.run_id,
                                RunPatch {
                                    status: Some(RunStatus::Running),
                                    ..Default::default()
                                },
                            )
                            .await;
                        self.state = TaskState::Running;
                    }
                    Poll::Ready(Err(_)) => {
                        self.fail(store, CronError::SendFailed).await;
                    }
                }
            }

            TaskState::Running => {
                let session = self
                    .connection
                    .as_mut()
                    .expect("RUNNING state implies an open session");

                match session.poll_result() {
                    Poll::Pending => {
                        self.polling_status = readiness_to_status(session.readiness());
                    }
                    Poll::Ready(None) => {
                        self.succeed(store).await;
                    }
                    Poll::Ready(Some(Err(_))) => {
                        self.fail(store, CronError::ConnectionLost).await;
                    }
                    Poll::Ready(Some(Ok(outcome))) => match outcome {
                        SessionOutcome::Fatal(message) => {
                            self.fail(store, CronError::ResultFatal(message)).await;
                        }
                        SessionOutcome::Copy => {
                            self.fail(store, CronError::CopyUnsupported).await;
                        }
                        SessionOutcome::Tuples | SessionOutcome::CommandOk | SessionOutcome::Empty => {
                            // Nonfatal; keep draining until poll_result reports None.
                        }
                    },
                }
            }

            TaskState::Error => {
                self.state = TaskState::Done;
            }

            TaskState::Done => {
                self.reinitialize();
            }
        }
    }

    /// States in which deactivation should force an immediate cancellation.
    /// `RUNNING` is deliberately excluded: once a command has been sent, the
    /// run is left to finish and report its real outcome even if its job is
    /// deleted mid-flight (scenario S5) — only the states that precede
    /// actually dispatching the command get cut short.
    fn is_in_flight(&self) -> bool {
        matches!(
            self.state,
            TaskState::Waiting | TaskState::Start | TaskState::Connecting | TaskState::Sending
        )
    }

    async fn fail(&mut self, store: &dyn JobStore, error: CronError) {
        let message = error.run_message();
        self.error_message = Some(message.clone());
        self.connection = None;
        self.polling_status = PollingStatus::Failed;
        self.start_deadline = None;
        let _ = store
            .update_run(
                self.run_id,
                RunPatch {
                    status: Some(RunStatus::Failed),
                    return_message: Some(message),
                    end_time: Some(Utc::now()),
                },
            )
            .await;
        self.state = TaskState::Error;
    }

    async fn succeed(&mut self, store: &dyn JobStore) {
        self.connection = None;
        self.polling_status = PollingStatus::Ok;
        let _ = store
            .update_run(
                self.run_id,
                RunPatch {
                    status: Some(RunStatus::Succeeded),
                    return_message: None,
                    end_time: Some(Utc::now()),
                },
            )
            .await;
        self.state = TaskState::Done;
    }

    /// `DONE -> WAITING` (§4.6): resets per-run scratch but preserves
    /// `pending_run_count`, which is decremented instead at the
    /// `WAITING -> START` transition above.
    fn reinitialize(&mut self) {
        self.run_id = RunId::NONE;
        self.connection = None;
        self.polling_status = PollingStatus::None;
        self.start_deadline = None;
        self.is_socket_ready = false;
        self.error_message = None;
        self.state = TaskState::Waiting;
    }
}

fn readiness_to_status(readiness: Readiness) -> PollingStatus {
    match readiness {
        Readiness::Read => PollingStatus::Read,
        Readiness::Write => PollingStatus::Write,
        Readiness::None => PollingStatus::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MockSession, MockSessionFactory, SessionOutcome};
    use cronq_core::job::JobId as CoreJobId;
    use cronq_core::schedule::parse;
    use cronq_core::store::Identity;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn test_job() -> JobDef {
        JobDef {
            job_id: CoreJobId(1),
            schedule_text: "* * * * *".to_string(),
            schedule: parse("* * * * *").unwrap(),
            command: "SELECT 1".to_string(),
            node_name: "localhost".to_string(),
            node_port: 5432,
            database: "postgres".to_string(),
            user_name: "alice".to_string(),
            job_name: None,
            active: true,
            timezone_offset_hours: None,
        }
    }

    /// An in-memory `JobStore` used only to observe run-log writes from
    /// these unit tests; the real adapter is exercised in `cronq-store`.
    struct RecordingStore {
        next_id: Mutex<i64>,
        runs: Mutex<HashMap<i64, (RunStatus, Option<String>)>>,
    }

    impl RecordingStore {
        fn new() -> Self {
            RecordingStore {
                next_id: Mutex::new(1),
                runs: Mutex::new(HashMap::new()),
            }
        }

        fn status_of(&self, run_id: RunId) -> Option<(RunStatus, Option<String>)> {
            self.runs.lock().unwrap().get(&run_id.0).cloned()
        }
    }

    #[async_trait::async_trait]
    impl JobStore for RecordingStore {
        async fn list_jobs(&self) -> cronq_core::Result<Vec<JobDef>> {
            Ok(vec![])
        }
        async fn insert_job(
            &self,
            _caller: &Identity,
            _schedule: &str,
            _command: &str,
            _database: &str,
            _user_name: &str,
            _job_name: Option<&str>,
            _active: bool,
            _: Option<i8>,
        ) -> cronq_core::Result<CoreJobId> {
            unimplemented!()
        }
        async fn alter_job(
            &self,
            _caller: &Identity,
            _job_id: CoreJobId,
            _patch: cronq_core::job::JobPatch,
        ) -> cronq_core::Result<()> {
            unimplemented!()
        }
        async fn delete_job(
            &self,
            _caller: &Identity,
            _id_or_name: cronq_core::store::JobIdOrName,
        ) -> cronq_core::Result<()> {
            unimplemented!()
        }
        async fn next_run_id(&self) -> cronq_core::Result<RunId> {
            let mut next = self.next_id.lock().unwrap();
            let id = *next;
            *next += 1;
            Ok(RunId(id))
        }
        async fn insert_run(
            &self,
            run_id: RunId,
            _job_id: CoreJobId,
            _database: &str,
            _user_name: &str,
            _command: &str,
            status: RunStatus,
        ) -> cronq_core::Result<()> {
            self.runs.lock().unwrap().insert(run_id.0, (status, None));
            Ok(())
        }
        async fn update_run(&self, run_id: RunId, patch: RunPatch) -> cronq_core::Result<()> {
            let mut runs = self.runs.lock().unwrap();
            let entry = runs.entry(run_id.0).or_insert((RunStatus::Starting, None));
            if let Some(status) = patch.status {
                entry.0 = status;
            }
            if patch.return_message.is_some() {
                entry.1 = patch.return_message;
            }
            Ok(())
        }
        async fn list_runs(&self, _job_id: CoreJobId, _limit: usize) -> cronq_core::Result<Vec<cronq_core::job::RunRecord>> {
            Ok(vec![])
        }
        async fn mark_pending_runs_failed(&self) -> cronq_core::Result<u64> {
            Ok(0)
        }
        fn invalidate(&self) {}
        fn take_invalidation(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn three_pending_runs_drain_to_waiting_with_increasing_run_ids() {
        let job = test_job();
        let store = RecordingStore::new();
        let factory = MockSessionFactory;
        let mut task = CronTask::new(job.job_id);
        task.pending_run_count = 3;

        for _ in 0..3 {
            // WAITING -> START -> CONNECTING -> SENDING -> RUNNING -> DONE -> WAITING
            for _ in 0..6 {
                task.step(&job, Instant::now(), Duration::from_secs(10), &store, &factory).await;
            }
        }

        assert_eq!(task.state, TaskState::Waiting);
        assert_eq!(task.pending_run_count, 0);

        let runs = store.runs.lock().unwrap();
        assert_eq!(runs.len(), 3);
        let mut run_ids: Vec<i64> = runs.keys().copied().collect();
        run_ids.sort();
        assert_eq!(run_ids, vec![1, 2, 3]);
        for status in runs.values() {
            assert_eq!(status.0, RunStatus::Succeeded);
        }
    }

    #[tokio::test]
    async fn deactivating_during_connecting_cancels_with_job_cancelled() {
        let job = test_job();
        let store = RecordingStore::new();
        let mut task = CronTask::new(job.job_id);
        task.pending_run_count = 1;

        let factory = MockSessionFactory;
        task.step(&job, Instant::now(), Duration::from_secs(10), &store, &factory).await; // START
        task.step(&job, Instant::now(), Duration::from_secs(10), &store, &factory).await; // -> CONNECTING (mock connects instantly so may already be SENDING)

        task.is_active = false;
        let run_id = task.run_id;
        task.step(&job, Instant::now(), Duration::from_secs(10), &store, &factory).await;

        assert_eq!(task.state, TaskState::Error);
        assert_eq!(task.error_message.as_deref(), Some("job cancelled"));
        assert_eq!(store.status_of(run_id).unwrap().0, RunStatus::Failed);
        assert_eq!(store.status_of(run_id).unwrap().1.as_deref(), Some("job cancelled"));
    }

    #[tokio::test]
    async fn connect_refusal_cycles_through_error_to_waiting() {
        // S4: the target refuses the connection outright. Expect
        // START -> CONNECTING -> ERROR -> DONE -> WAITING with a "connection
        // failed" run row, and the next pending run attempted normally.
        struct FailingFactory;
        impl crate::session::SessionFactory for FailingFactory {
            fn open(&self, _job: &JobDef) -> Box<dyn crate::session::Session> {
                Box::new(MockSession::failing_to_connect())
            }
        }

        let job = test_job();
        let store = RecordingStore::new();
        let factory = FailingFactory;
        let mut task = CronTask::new(job.job_id);
        task.pending_run_count = 1;

        task.step(&job, Instant::now(), Duration::from_secs(10), &store, &factory).await; // WAITING -> START
        task.step(&job, Instant::now(), Duration::from_secs(10), &store, &factory).await; // START -> CONNECTING
        let run_id = task.run_id;
        task.step(&job, Instant::now(), Duration::from_secs(10), &store, &factory).await; // CONNECTING -> ERROR

        assert_eq!(task.state, TaskState::Error);
        assert_eq!(task.error_message.as_deref(), Some("connection failed"));
        assert_eq!(store.status_of(run_id).unwrap().0, RunStatus::Failed);
        assert_eq!(store.status_of(run_id).unwrap().1.as_deref(), Some("connection failed"));

        task.step(&job, Instant::now(), Duration::from_secs(10), &store, &factory).await; // ERROR -> DONE
        task.step(&job, Instant::now(), Duration::from_secs(10), &store, &factory).await; // DONE -> WAITING

        assert_eq!(task.state, TaskState::Waiting);
        assert_eq!(task.pending_run_count, 0);
    }

    #[tokio::test]
    async fn exceeding_connect_timeout_in_sending_yields_connection_timeout() {
        let job = test_job();
        let store = RecordingStore::new();
        let mut task = CronTask::new(job.job_id);
        task.pending_run_count = 1;
        task.connection = Some(Box::new(MockSession::immediate_success(vec![SessionOutcome::CommandOk])));

        // Drive to SENDING manually with an already-expired deadline.
        task.state = TaskState::Sending;
        task.start_deadline = Some(Instant::now() - Duration::from_millis(1));

        let factory = MockSessionFactory;
        task.step(&job, Instant::now(), Duration::from_secs(10), &store, &factory).await;

        assert_eq!(task.state, TaskState::Error);
        assert_eq!(task.error_message.as_deref(), Some("connection timeout"));
        assert!(task.connection.is_none());
    }
}
